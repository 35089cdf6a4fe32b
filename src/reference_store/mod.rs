/// Reference Segment Store
///
/// Durable `{hash, path}` records for one tenant, kept as JSON arrays in
/// rotating segment files (`references/ref_001.json`, `ref_002.json`, ...).
///
/// # Design Rules
///
/// 1. Object hashes are unique across all of a tenant's segments.
/// 2. A segment never grows to or past the rotation threshold; the record
///    that would push it over starts the next segment.
/// 3. Every read-modify-write runs under the tenant lock.
/// 4. Segments are replaced whole (temp file + rename), never edited in place.
/// 5. Readers take no lock.

pub mod intent;
pub mod lock;
pub mod segment;
pub mod store;

pub use store::ReferenceStore;

use crate::error::{GatewayError, GatewayResult};
use crate::hashing;
use serde::{Deserialize, Serialize};

/// A durable mapping from an object hash to its logical path within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub hash: String,
    pub path: String,
}

impl Reference {
    /// Build a reference, validating the hash and normalizing the path
    pub fn new(hash: &str, path: &str) -> GatewayResult<Self> {
        validate_hash(hash)?;
        Ok(Self {
            hash: hash.to_string(),
            path: normalize_path(path)?,
        })
    }
}

/// Reject anything that is not a canonical 64-hex object hash
pub fn validate_hash(hash: &str) -> GatewayResult<()> {
    if hashing::is_valid_hash(hash) {
        Ok(())
    } else {
        Err(GatewayError::InvalidHash(hash.to_string()))
    }
}

/// Trim leading/trailing slashes from a tenant-relative logical path
pub fn normalize_path(path: &str) -> GatewayResult<String> {
    let trimmed = path.trim().trim_matches('/');

    if trimmed.is_empty() {
        return Err(GatewayError::InvalidPath("path cannot be empty".to_string()));
    }

    if trimmed.split('/').any(|part| part == "..") {
        return Err(GatewayError::InvalidPath(format!(
            "path cannot contain '..': {}",
            path
        )));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/img/a.png").unwrap(), "img/a.png");
        assert_eq!(normalize_path("img/a.png/").unwrap(), "img/a.png");
        assert_eq!(normalize_path("  //docs//  ").unwrap(), "docs");
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path("a/../b").is_err());
    }

    #[test]
    fn test_reference_new_validates_hash() {
        let hash = "ab".repeat(32);
        let reference = Reference::new(&hash, "/x/y.pdf").unwrap();
        assert_eq!(reference.path, "x/y.pdf");

        assert!(matches!(
            Reference::new("d1292a5312c69108", "x"),
            Err(GatewayError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_reference_serialization_shape() {
        let reference = Reference::new(&"0".repeat(64), "a/b.png").unwrap();
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value, serde_json::json!({"hash": "0".repeat(64), "path": "a/b.png"}));
    }
}
