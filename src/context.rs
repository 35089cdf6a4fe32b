/// Application context and dependency injection
use crate::{
    blob_store::{DiskFileBackend, FileBackend},
    config::GatewayConfig,
    error::{GatewayError, GatewayResult},
    metrics,
    reference_store::ReferenceStore,
    resolver::UploadResolver,
    tenant::{load_permissions, resolve_tenant, Permissions, Tenant, TenantRegistry},
};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<TenantRegistry>,
    pub store: Arc<ReferenceStore>,
    pub backend: Arc<dyn FileBackend>,
    pub resolver: Arc<UploadResolver>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: GatewayConfig) -> GatewayResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create storage root if it doesn't exist
        fs::create_dir_all(&config.storage.storage_directory)
            .await
            .map_err(|e| {
                GatewayError::Internal(format!(
                    "Failed to create storage directory {}: {}",
                    config.storage.storage_directory.display(),
                    e
                ))
            })?;

        // Initialize tenant registry from the persisted map
        let registry = Arc::new(TenantRegistry::new(&config.storage, config.defaults.clone()));
        let loaded = registry.load().await?;
        info!("Loaded {} tenant(s) from {}", loaded, config.storage.tenant_map_file.display());

        // Rebuild the map from the whitelist when one is present
        if config.storage.tenants_file.is_file() {
            match registry.refresh().await {
                Ok(map) => metrics::TENANTS_ACTIVE.set(map.len() as i64),
                Err(e) => warn!("Tenant map refresh failed, serving persisted map: {}", e),
            }
        } else {
            warn!(
                "No tenant whitelist at {}, serving persisted map only",
                config.storage.tenants_file.display()
            );
            metrics::TENANTS_ACTIVE.set(loaded as i64);
        }

        // Initialize reference store and file backend
        let store = Arc::new(ReferenceStore::new(
            config.storage.max_reference_file_size,
            config.storage.lock_timeout_secs,
        ));
        let backend: Arc<dyn FileBackend> = Arc::new(DiskFileBackend::new());
        let resolver = Arc::new(UploadResolver::new(Arc::clone(&store), Arc::clone(&backend)));

        Ok(Self {
            config: Arc::new(config),
            registry,
            store,
            backend,
            resolver,
        })
    }

    /// Resolve a request's domain to its tenant
    pub fn tenant_for(&self, domain: &str) -> GatewayResult<Tenant> {
        resolve_tenant(self.registry.as_ref(), domain)
    }

    /// Effective upload permissions of a tenant
    pub async fn permissions_for(&self, tenant: &Tenant) -> GatewayResult<Permissions> {
        load_permissions(tenant, &self.config.defaults).await
    }
}
