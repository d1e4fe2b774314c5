//! Embedding matrices and the input files they are read from.
//!
//! An embedding directory holds `embeddings.npy` (an `(N, D)` float32 matrix)
//! and `user_ids.json` (a JSON array of N external IDs, row-aligned with the
//! matrix). A headerless fvecs-style binary (`[u32 count][u32 dim][f32 data]`,
//! little-endian) is accepted as an alternative matrix format.

use crate::config::{EMBEDDINGS_FILE, USER_IDS_FILE};
use crate::error::{AnnError, Result};
use std::fs;
use std::path::Path;

/// Dense row-major matrix of f32 embeddings, one row per external ID.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    dim: usize,
}

impl EmbeddingMatrix {
    /// Wrap a flat row-major buffer. `data.len()` must be a multiple of `dim`.
    pub fn new(data: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(AnnError::InvalidInput("embedding dimension is 0".to_string()));
        }
        if data.len() % dim != 0 {
            return Err(AnnError::InvalidInput(format!(
                "buffer of {} floats is not a whole number of {}-dim rows",
                data.len(),
                dim
            )));
        }
        Ok(Self { data, dim })
    }

    /// Stack rows into a matrix; every row must have the same width.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).ok_or_else(|| {
            AnnError::InvalidInput("cannot infer dimension from zero rows".to_string())
        })?;
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(AnnError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(data, dim)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Position of the first NaN or infinite component, as `(row, col)`.
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.data
            .iter()
            .position(|x| !x.is_finite())
            .map(|i| (i / self.dim, i % self.dim))
    }

    /// Largest `| ‖row‖ - 1 |` over all rows. Zero for a unit-normalized matrix.
    pub fn max_norm_deviation(&self) -> f32 {
        self.rows()
            .map(|r| (r.iter().map(|x| x * x).sum::<f32>().sqrt() - 1.0).abs())
            .fold(0.0, f32::max)
    }
}

/// Read a NumPy `.npy` file holding a 2-D little-endian float32 C-order array.
pub fn read_npy(path: &Path) -> Result<EmbeddingMatrix> {
    let raw = fs::read(path)?;
    parse_npy(&raw).map_err(|e| match e {
        AnnError::InvalidInput(msg) => {
            AnnError::InvalidInput(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

fn parse_npy(raw: &[u8]) -> Result<EmbeddingMatrix> {
    let bad = |msg: &str| AnnError::InvalidInput(format!("invalid .npy: {msg}"));

    if raw.len() < 10 || &raw[..6] != b"\x93NUMPY" {
        return Err(bad("missing magic bytes"));
    }
    let (header_len, header_start): (usize, usize) = match raw[6] {
        1 => (u16::from_le_bytes([raw[8], raw[9]]) as usize, 10),
        2 | 3 => {
            if raw.len() < 12 {
                return Err(bad("file too small for v2 header"));
            }
            (
                u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize,
                12,
            )
        }
        v => return Err(bad(&format!("unsupported version {v}"))),
    };
    let data_offset = header_start
        .checked_add(header_len)
        .ok_or_else(|| bad("header length overflows"))?;
    if raw.len() < data_offset {
        return Err(bad("header extends past end of file"));
    }
    let header = std::str::from_utf8(&raw[header_start..data_offset])
        .map_err(|_| bad("header is not UTF-8"))?;

    let descr = header_field(header, "descr").ok_or_else(|| bad("no 'descr' field"))?;
    if descr != "<f4" && descr != "|f4" {
        return Err(bad(&format!("only float32 ('<f4') is supported, got '{descr}'")));
    }
    let fortran =
        header_field(header, "fortran_order").ok_or_else(|| bad("no 'fortran_order' field"))?;
    if fortran != "False" {
        return Err(bad("only C-order arrays are supported"));
    }
    let (rows, dim) = header_shape(header).ok_or_else(|| bad("shape must be (N, D)"))?;

    let body = &raw[data_offset..];
    let needed = matrix_bytes(rows, dim)
        .ok_or_else(|| bad(&format!("shape ({rows}, {dim}) is too large")))?;
    if body.len() < needed {
        return Err(bad(&format!(
            "expected {needed} data bytes, found {}",
            body.len()
        )));
    }
    let data = body[..needed]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    EmbeddingMatrix::new(data, dim)
}

/// Value of `'field': value` in a `.npy` header dict, with quotes stripped.
fn header_field<'h>(header: &'h str, field: &str) -> Option<&'h str> {
    let key = format!("'{field}':");
    let start = header.find(&key)? + key.len();
    let rest = &header[start..];
    let end = rest.find([',', '}'])?;
    Some(rest[..end].trim().trim_matches('\''))
}

fn header_shape(header: &str) -> Option<(usize, usize)> {
    let start = header.find("'shape':")?;
    let rest = &header[start..];
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let dims: Vec<usize> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match dims.as_slice() {
        &[rows, dim] if dim > 0 => Some((rows, dim)),
        _ => None,
    }
}

/// Byte length of a `rows x dim` f32 matrix, or `None` if it overflows `usize`.
fn matrix_bytes(rows: usize, dim: usize) -> Option<usize> {
    rows.checked_mul(dim)?.checked_mul(std::mem::size_of::<f32>())
}

/// Read a `[u32 count LE][u32 dim LE][f32 LE data]` binary matrix.
pub fn read_fvecs(path: &Path) -> Result<EmbeddingMatrix> {
    let raw = fs::read(path)?;
    if raw.len() < 8 {
        return Err(AnnError::InvalidInput(format!(
            "{}: too short for a matrix header",
            path.display()
        )));
    }
    let count = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let dim = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    let body = &raw[8..];
    let needed = matrix_bytes(count, dim).ok_or_else(|| {
        AnnError::InvalidInput(format!(
            "{}: header size {count}x{dim} is too large",
            path.display()
        ))
    })?;
    if body.len() != needed {
        return Err(AnnError::InvalidInput(format!(
            "{}: header says {count}x{dim} floats but body holds {} bytes",
            path.display(),
            body.len()
        )));
    }
    let data = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    EmbeddingMatrix::new(data, dim)
}

/// Write a matrix in the `read_fvecs` layout.
pub fn write_fvecs(matrix: &EmbeddingMatrix, path: &Path) -> Result<()> {
    let mut out = Vec::with_capacity(8 + matrix.as_slice().len() * 4);
    out.extend_from_slice(&(matrix.len() as u32).to_le_bytes());
    out.extend_from_slice(&(matrix.dim() as u32).to_le_bytes());
    for x in matrix.as_slice() {
        out.extend_from_slice(&x.to_le_bytes());
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read a JSON array of external ID strings.
pub fn read_ids(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|e| {
        AnnError::InvalidInput(format!(
            "{}: expected a JSON array of strings: {e}",
            path.display()
        ))
    })
}

/// Read a matrix, picking the format from the file extension
/// (`.npy`, otherwise fvecs).
pub fn read_matrix(path: &Path) -> Result<EmbeddingMatrix> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => read_npy(path),
        _ => read_fvecs(path),
    }
}

/// Load `embeddings.npy` and `user_ids.json` from an embedding directory.
pub fn load_embedding_dir(dir: &Path) -> Result<(EmbeddingMatrix, Vec<String>)> {
    let matrix = read_npy(&dir.join(EMBEDDINGS_FILE))?;
    let ids = read_ids(&dir.join(USER_IDS_FILE))?;
    Ok((matrix, ids))
}
