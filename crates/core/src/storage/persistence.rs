//! Disk persistence for the graph binary (`index.bin`).
//!
//! The graph is serialized with bincode and framed as
//! `[magic "PANN"][u32 version LE][bincode payload][magic "PCR1"][u32 CRC32 BE]`.
//! Writes use atomic temp-file + rename so a crash never leaves a torn file
//! under the final name.

use crate::error::{AnnError, Result};
use crate::hnsw::HnswIndex;
use std::fs;
use std::io;
use std::path::Path;

/// Leading magic of a graph binary.
const GRAPH_MAGIC: &[u8; 4] = b"PANN";

/// Bumped whenever the serialized graph layout changes.
const GRAPH_FORMAT_VERSION: u32 = 1;

/// Magic bytes before the CRC32 footer.
const GRAPH_CRC_MAGIC: &[u8; 4] = b"PCR1";

const HEADER_LEN: usize = 8;
const FOOTER_LEN: usize = 8;

/// Encode a graph into the framed `index.bin` byte layout.
pub fn encode_graph(graph: &HnswIndex) -> Result<Vec<u8>> {
    let payload = bincode::serialize(graph).map_err(|e| io::Error::other(e.to_string()))?;
    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    out.extend_from_slice(GRAPH_MAGIC);
    out.extend_from_slice(&GRAPH_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(GRAPH_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Decode and verify a framed graph. Any framing, checksum, decoding, or
/// structural failure is a [`AnnError::MalformedArtifact`].
pub fn decode_graph(raw: &[u8]) -> Result<HnswIndex> {
    if raw.len() < HEADER_LEN + FOOTER_LEN {
        return Err(AnnError::MalformedArtifact(format!(
            "graph binary too short ({} bytes)",
            raw.len()
        )));
    }
    if &raw[..4] != GRAPH_MAGIC {
        return Err(AnnError::MalformedArtifact(
            "graph binary has wrong magic bytes".to_string(),
        ));
    }
    let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if version != GRAPH_FORMAT_VERSION {
        return Err(AnnError::MalformedArtifact(format!(
            "unsupported graph format version {version} (expected {GRAPH_FORMAT_VERSION})"
        )));
    }

    let footer = raw.len() - FOOTER_LEN;
    if &raw[footer..footer + 4] != GRAPH_CRC_MAGIC {
        return Err(AnnError::MalformedArtifact(
            "graph binary is missing its CRC32 footer".to_string(),
        ));
    }
    let payload = &raw[HEADER_LEN..footer];
    let stored_crc = u32::from_be_bytes([
        raw[footer + 4],
        raw[footer + 5],
        raw[footer + 6],
        raw[footer + 7],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(AnnError::MalformedArtifact(format!(
            "graph CRC32 mismatch: expected {:#010x}, got {:#010x}",
            stored_crc, computed_crc
        )));
    }
    tracing::debug!("Graph CRC32 verified: {:#010x}", stored_crc);

    let graph: HnswIndex = bincode::deserialize(payload)
        .map_err(|e| AnnError::MalformedArtifact(format!("graph decode failed: {e}")))?;
    graph
        .validate()
        .map_err(|e| AnnError::MalformedArtifact(format!("graph validation failed: {e}")))?;
    Ok(graph)
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(tmp_path, path)
}

/// Save a graph to `path` atomically. Returns the number of bytes written.
pub fn save_graph(graph: &HnswIndex, path: &Path) -> Result<usize> {
    let bytes = encode_graph(graph)?;
    write_atomic(path, &bytes)?;
    Ok(bytes.len())
}

/// Load and verify the graph stored at `path`.
pub fn load_graph(path: &Path) -> Result<HnswIndex> {
    let raw = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            AnnError::MalformedArtifact(format!("graph binary {} not found", path.display()))
        }
        _ => AnnError::Io(e),
    })?;
    decode_graph(&raw)
}
