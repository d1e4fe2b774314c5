//! Bidirectional map between internal graph handles and external profile IDs.
//!
//! Handles are dense (`0..N`) and follow the order of the build input. The map
//! is rebuilt wholesale on every build and restored verbatim on load; it is
//! never edited in place.

use crate::error::{AnnError, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    /// External ID per handle. Indexed by handle.
    external: Vec<String>,
    /// Inverse of `external`.
    handles: HashMap<String, u32>,
}

impl IdMap {
    /// Enumeration bijection: `ids[i]` gets handle `i`. Duplicate IDs are rejected.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self> {
        let mut external = Vec::with_capacity(ids.len());
        let mut handles = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let id = id.as_ref();
            if let Some(prev) = handles.insert(id.to_string(), i as u32) {
                return Err(AnnError::InvalidInput(format!(
                    "duplicate external id '{id}' at positions {prev} and {i}"
                )));
            }
            external.push(id.to_string());
        }
        Ok(Self { external, handles })
    }

    /// Rebuilds the map from a sidecar's `{"<handle>": "<id>"}` object.
    ///
    /// Every handle in `0..expected_len` must appear exactly once and every
    /// external ID must be unique.
    pub fn from_sidecar(entries: HashMap<String, String>, expected_len: usize) -> Result<Self> {
        if entries.len() != expected_len {
            return Err(AnnError::MalformedArtifact(format!(
                "id_to_user has {} entries but metadata records {} elements",
                entries.len(),
                expected_len
            )));
        }
        let mut slots: Vec<Option<String>> = vec![None; expected_len];
        for (key, id) in entries {
            let handle: usize = key.parse().map_err(|_| {
                AnnError::MalformedArtifact(format!("id_to_user key '{key}' is not an integer"))
            })?;
            let slot = slots.get_mut(handle).ok_or_else(|| {
                AnnError::MalformedArtifact(format!(
                    "handle {handle} outside 0..{expected_len}"
                ))
            })?;
            if slot.replace(id).is_some() {
                return Err(AnnError::MalformedArtifact(format!(
                    "handle {handle} appears twice"
                )));
            }
        }
        let ids: Vec<String> = slots.into_iter().flatten().collect();
        if ids.len() != expected_len {
            return Err(AnnError::MalformedArtifact(
                "id_to_user does not cover every handle".to_string(),
            ));
        }
        Self::from_ids(&ids).map_err(|e| match e {
            AnnError::InvalidInput(msg) => AnnError::MalformedArtifact(msg),
            other => other,
        })
    }

    pub fn len(&self) -> usize {
        self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.external.is_empty()
    }

    /// External ID for a handle.
    #[inline]
    pub fn external(&self, handle: u32) -> Option<&str> {
        self.external.get(handle as usize).map(String::as_str)
    }

    /// Handle for an external ID.
    pub fn handle(&self, id: &str) -> Option<u32> {
        self.handles.get(id).copied()
    }

    /// `(handle, external_id)` pairs in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.external
            .iter()
            .enumerate()
            .map(|(i, id)| (i as u32, id.as_str()))
    }
}

/// Serializes as the sidecar's `{"0": "...", "1": "...", ...}` object, in
/// handle order.
impl Serialize for IdMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (handle, id) in self.iter() {
            map.serialize_entry(&handle.to_string(), id)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_enumeration_order() {
        let map = IdMap::from_ids(&["u-a", "u-b", "u-c"]).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.external(0), Some("u-a"));
        assert_eq!(map.external(2), Some("u-c"));
        assert_eq!(map.handle("u-b"), Some(1));
        assert_eq!(map.external(3), None);
        assert_eq!(map.handle("nope"), None);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = IdMap::from_ids(&["x", "y", "x"]).unwrap_err();
        assert!(matches!(err, AnnError::InvalidInput(_)));
    }

    #[test]
    fn test_serializes_in_handle_order() {
        let ids: Vec<String> = (0..12).map(|i| format!("user-{i}")).collect();
        let map = IdMap::from_ids(&ids).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.starts_with(r#"{"0":"user-0","1":"user-1","2":"user-2""#));
        assert!(json.ends_with(r#""11":"user-11"}"#));
    }

    #[test]
    fn test_sidecar_restores_verbatim() {
        let map = IdMap::from_sidecar(sidecar(&[("1", "b"), ("0", "a"), ("2", "c")]), 3).unwrap();
        assert_eq!(map, IdMap::from_ids(&["a", "b", "c"]).unwrap());
    }

    #[test]
    fn test_sidecar_rejects_gaps_and_bad_keys() {
        assert!(IdMap::from_sidecar(sidecar(&[("0", "a"), ("2", "c")]), 2).is_err());
        assert!(IdMap::from_sidecar(sidecar(&[("zero", "a")]), 1).is_err());
        assert!(IdMap::from_sidecar(sidecar(&[("0", "a")]), 2).is_err());
    }

    #[test]
    fn test_sidecar_rejects_duplicate_external_ids() {
        let err = IdMap::from_sidecar(sidecar(&[("0", "a"), ("1", "a")]), 2).unwrap_err();
        assert!(matches!(err, AnnError::MalformedArtifact(_)));
    }
}
