/// Tenant Directory Manager
///
/// Each tenant owns a namespace directory named after its short hash:
///
/// ```text
/// {storage}/{tenant_hash}/
///     config/permissions.json
///     config/tenant_config.json
///     references/ref_001.json ...
///     files/{aa}/{object_hash}
///     metadata/{object_hash}.json
/// ```

pub mod registry;
pub mod structure;

pub use registry::TenantRegistry;
pub use structure::{ensure_structure, load_permissions};

use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_DIR: &str = "config";
pub const REFERENCES_DIR: &str = "references";
pub const FILES_DIR: &str = "files";
pub const METADATA_DIR: &str = "metadata";
pub const PERMISSIONS_FILE: &str = "permissions.json";
pub const TENANT_CONFIG_FILE: &str = "tenant_config.json";

/// A resolved tenant: its short hash and namespace root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tenant {
    pub hash: String,
    pub path: PathBuf,
}

impl Tenant {
    pub fn new(hash: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            path: path.into(),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path.join(CONFIG_DIR)
    }

    pub fn references_dir(&self) -> PathBuf {
        self.path.join(REFERENCES_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.path.join(FILES_DIR)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.path.join(METADATA_DIR)
    }

    pub fn permissions_file(&self) -> PathBuf {
        self.config_dir().join(PERMISSIONS_FILE)
    }

    pub fn tenant_config_file(&self) -> PathBuf {
        self.config_dir().join(TENANT_CONFIG_FILE)
    }
}

/// Read-only view of the trusted domain -> tenant map
///
/// Construction and refresh of the map happen elsewhere; callers only ever
/// look tenants up through this trait.
pub trait TenantLookup: Send + Sync {
    /// Find the active tenant registered for a domain
    fn lookup(&self, domain: &str) -> Option<Tenant>;

    /// All active tenants
    fn tenants(&self) -> Vec<Tenant>;
}

/// Resolve a domain to its tenant, failing with `Unauthorized` for unknown domains
pub fn resolve_tenant(lookup: &dyn TenantLookup, domain: &str) -> GatewayResult<Tenant> {
    lookup
        .lookup(domain)
        .ok_or_else(|| GatewayError::Unauthorized(domain.to_string()))
}

/// Per-tenant upload permissions (`config/permissions.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "video/mp4".to_string(),
                "application/pdf".to_string(),
            ],
        }
    }
}

impl Permissions {
    /// Check an upload's size and declared MIME type against these permissions
    pub fn check(&self, size: u64, mime_type: &str) -> GatewayResult<()> {
        if size > self.max_file_size {
            return Err(GatewayError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        if !self.allowed_mime_types.iter().any(|m| m == mime_type) {
            return Err(GatewayError::UnsupportedMediaType(mime_type.to_string()));
        }

        Ok(())
    }
}

/// Per-tenant descriptive config (`config/tenant_config.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
    pub active: bool,
}

#[cfg(test)]
impl TenantLookup for std::collections::BTreeMap<String, Tenant> {
    fn lookup(&self, domain: &str) -> Option<Tenant> {
        self.get(domain).cloned()
    }

    fn tenants(&self) -> Vec<Tenant> {
        self.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_tenant_layout() {
        let tenant = Tenant::new("d1292a5312c69108", "/srv/storage/d1292a5312c69108");
        assert_eq!(
            tenant.references_dir(),
            PathBuf::from("/srv/storage/d1292a5312c69108/references")
        );
        assert_eq!(
            tenant.permissions_file(),
            PathBuf::from("/srv/storage/d1292a5312c69108/config/permissions.json")
        );
    }

    #[test]
    fn test_resolve_unknown_domain_is_unauthorized() {
        let mut map = BTreeMap::new();
        map.insert(
            "http://localhost".to_string(),
            Tenant::new("t1", "/tmp/t1"),
        );

        assert_eq!(resolve_tenant(&map, "http://localhost").unwrap().hash, "t1");
        assert!(matches!(
            resolve_tenant(&map, "http://evil.example"),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_permissions_check() {
        let perms = Permissions::default();
        assert!(perms.check(1024, "image/png").is_ok());
        assert!(matches!(
            perms.check(perms.max_file_size + 1, "image/png"),
            Err(GatewayError::FileTooLarge { .. })
        ));
        assert!(matches!(
            perms.check(10, "application/x-msdownload"),
            Err(GatewayError::UnsupportedMediaType(_))
        ));
    }
}
