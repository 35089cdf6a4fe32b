/// Trusted domain -> tenant map
///
/// The whitelist (`tenants.json`) lists the domains allowed to use the
/// gateway. `refresh` turns it into `tenants_map.json`, assigning each new
/// domain a short tenant hash and provisioning its namespace.
use crate::{
    atomic_file::{read_json, write_json_atomic},
    config::StorageConfig,
    error::{GatewayError, GatewayResult},
    hashing,
    reference_store::{Reference, ReferenceStore},
    tenant::{ensure_structure, Permissions, Tenant, TenantLookup},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::fs;
use tracing::{debug, info, warn};

/// Whitelist document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantWhitelist {
    pub domains: Vec<String>,
}

/// One entry of the generated map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMapEntry {
    pub hash: String,
    pub path: PathBuf,
    pub active: bool,
}

/// Registry of tenants, backed by the map file
pub struct TenantRegistry {
    storage_directory: PathBuf,
    tenants_file: PathBuf,
    map_file: PathBuf,
    defaults: Permissions,
    map: RwLock<BTreeMap<String, TenantMapEntry>>,
}

impl TenantRegistry {
    /// Create an empty registry
    pub fn new(storage: &StorageConfig, defaults: Permissions) -> Self {
        Self {
            storage_directory: storage.storage_directory.clone(),
            tenants_file: storage.tenants_file.clone(),
            map_file: storage.tenant_map_file.clone(),
            defaults,
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load a previously generated map from disk, returning the number of tenants
    pub async fn load(&self) -> GatewayResult<usize> {
        let mut map: BTreeMap<String, TenantMapEntry> =
            read_json(&self.map_file).await?.unwrap_or_default();
        map.retain(|domain, entry| {
            let valid = hashing::is_valid_short_hash(&entry.hash);
            if !valid {
                warn!("Ignoring tenant {} with malformed hash '{}'", domain, entry.hash);
            }
            valid
        });
        let count = map.len();
        self.replace_map(map)?;
        Ok(count)
    }

    /// Rebuild the map from the whitelist
    ///
    /// Known domains keep their hash (and get their namespace recreated if it
    /// went missing); new domains get a fresh short hash. Domains dropped from
    /// the whitelist disappear from the map.
    pub async fn refresh(&self) -> GatewayResult<BTreeMap<String, TenantMapEntry>> {
        let whitelist: TenantWhitelist = read_json(&self.tenants_file)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Tenant whitelist not found".to_string()))?;

        let existing: BTreeMap<String, TenantMapEntry> =
            read_json(&self.map_file).await?.unwrap_or_default();

        let mut map = BTreeMap::new();
        for domain in whitelist.domains {
            let hash = match existing.get(&domain) {
                Some(entry) if hashing::is_valid_short_hash(&entry.hash) => entry.hash.clone(),
                _ => {
                    let hash = hashing::short_hash(&domain);
                    info!("Registering new tenant {} for domain {}", hash, domain);
                    hash
                }
            };

            let path = self.storage_directory.join(&hash);
            let tenant = Tenant::new(hash, path);
            ensure_structure(&tenant, &domain, &self.defaults).await?;

            map.insert(
                domain,
                TenantMapEntry {
                    hash: tenant.hash,
                    path: tenant.path,
                    active: true,
                },
            );
        }

        if let Some(parent) = self.map_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Write(format!("{}: {}", parent.display(), e)))?;
        }
        write_json_atomic(&self.map_file, &map).await?;

        info!("Tenant map refreshed with {} tenant(s)", map.len());
        self.replace_map(map.clone())?;

        Ok(map)
    }

    /// Find which tenant owns an object hash
    pub async fn find_tenant_by_hash(
        &self,
        store: &ReferenceStore,
        hash: &str,
    ) -> GatewayResult<(Tenant, Reference)> {
        for tenant in self.tenants() {
            match store.find_by_hash(&tenant, hash).await {
                Ok(reference) => return Ok((tenant, reference)),
                Err(GatewayError::NotFound(_)) | Err(GatewayError::StoreUnavailable(_)) => {
                    debug!("Hash {} not owned by tenant {}", hash, tenant.hash);
                }
                Err(e) => return Err(e),
            }
        }

        Err(GatewayError::NotFound(format!("File with hash '{}' not found", hash)))
    }

    fn replace_map(&self, map: BTreeMap<String, TenantMapEntry>) -> GatewayResult<()> {
        let mut guard = self
            .map
            .write()
            .map_err(|e| GatewayError::Internal(format!("Tenant map lock poisoned: {}", e)))?;
        *guard = map;
        Ok(())
    }
}

impl TenantLookup for TenantRegistry {
    fn lookup(&self, domain: &str) -> Option<Tenant> {
        let map = self.map.read().ok()?;
        map.get(domain)
            .filter(|entry| entry.active)
            .map(|entry| Tenant::new(entry.hash.clone(), entry.path.clone()))
    }

    fn tenants(&self) -> Vec<Tenant> {
        match self.map.read() {
            Ok(map) => map
                .values()
                .filter(|entry| entry.active)
                .map(|entry| Tenant::new(entry.hash.clone(), entry.path.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use tempfile::tempdir;

    async fn setup(domains: &[&str]) -> (tempfile::TempDir, GatewayConfig) {
        let dir = tempdir().unwrap();
        let config = GatewayConfig::with_data_directory(dir.path());
        std::fs::create_dir_all(config.storage.tenants_file.parent().unwrap()).unwrap();
        let whitelist = TenantWhitelist {
            domains: domains.iter().map(|d| d.to_string()).collect(),
        };
        write_json_atomic(&config.storage.tenants_file, &whitelist)
            .await
            .unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_refresh_provisions_tenants() {
        let (_dir, config) = setup(&["http://localhost", "https://app.example"]).await;
        let registry = TenantRegistry::new(&config.storage, Permissions::default());

        let map = registry.refresh().await.unwrap();
        assert_eq!(map.len(), 2);

        let tenant = registry.lookup("http://localhost").unwrap();
        assert!(hashing::is_valid_short_hash(&tenant.hash));
        assert!(tenant.references_dir().is_dir());
        assert!(tenant.permissions_file().is_file());
        assert!(registry.lookup("http://unknown").is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_existing_hashes() {
        let (_dir, config) = setup(&["http://localhost"]).await;
        let registry = TenantRegistry::new(&config.storage, Permissions::default());
        let first = registry.refresh().await.unwrap();

        // Namespace deleted out from under the gateway
        let hash = first["http://localhost"].hash.clone();
        std::fs::remove_dir_all(config.storage.storage_directory.join(&hash)).unwrap();

        let second = registry.refresh().await.unwrap();
        assert_eq!(second["http://localhost"].hash, hash);
        assert!(config.storage.storage_directory.join(&hash).join("references").is_dir());
    }

    #[tokio::test]
    async fn test_load_reads_persisted_map() {
        let (_dir, config) = setup(&["http://localhost"]).await;
        let registry = TenantRegistry::new(&config.storage, Permissions::default());
        registry.refresh().await.unwrap();

        let reloaded = TenantRegistry::new(&config.storage, Permissions::default());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(
            reloaded.lookup("http://localhost"),
            registry.lookup("http://localhost")
        );
    }

    #[tokio::test]
    async fn test_malformed_hashes_in_map_are_not_trusted() {
        let (_dir, config) = setup(&["http://localhost", "http://evil"]).await;
        let registry = TenantRegistry::new(&config.storage, Permissions::default());
        registry.refresh().await.unwrap();

        let mut map: BTreeMap<String, TenantMapEntry> =
            read_json(&config.storage.tenant_map_file).await.unwrap().unwrap();
        map.get_mut("http://evil").unwrap().hash = "../outside".to_string();
        write_json_atomic(&config.storage.tenant_map_file, &map)
            .await
            .unwrap();

        let reloaded = TenantRegistry::new(&config.storage, Permissions::default());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert!(reloaded.lookup("http://evil").is_none());

        // A refresh assigns the domain a well-formed hash again
        let refreshed = reloaded.refresh().await.unwrap();
        assert!(hashing::is_valid_short_hash(&refreshed["http://evil"].hash));
        assert!(reloaded.lookup("http://evil").is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_whitelist_fails() {
        let dir = tempdir().unwrap();
        let config = GatewayConfig::with_data_directory(dir.path());
        let registry = TenantRegistry::new(&config.storage, Permissions::default());
        assert!(matches!(
            registry.refresh().await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_tenant_by_hash() {
        let (_dir, config) = setup(&["http://a", "http://b"]).await;
        let registry = TenantRegistry::new(&config.storage, Permissions::default());
        registry.refresh().await.unwrap();
        let store = ReferenceStore::new(config.storage.max_reference_file_size, 5);

        let tenant_b = registry.lookup("http://b").unwrap();
        let hash = hashing::new_hash("x.png");
        store.append(&tenant_b, &hash, "img/x.png").await.unwrap();

        let (owner, reference) = registry.find_tenant_by_hash(&store, &hash).await.unwrap();
        assert_eq!(owner, tenant_b);
        assert_eq!(reference.path, "img/x.png");

        let missing = registry
            .find_tenant_by_hash(&store, &hashing::new_hash("y"))
            .await;
        assert!(matches!(missing, Err(GatewayError::NotFound(_))));
    }
}
