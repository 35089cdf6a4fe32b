/// Tenant namespace provisioning
use crate::{
    atomic_file::{read_json, write_json_atomic},
    error::{GatewayError, GatewayResult},
    tenant::{
        Permissions, Tenant, TenantConfig, CONFIG_DIR, FILES_DIR, METADATA_DIR, REFERENCES_DIR,
    },
};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Create the namespace directories and default documents for a tenant
///
/// Idempotent: existing directories are left alone and existing documents
/// are never overwritten.
pub async fn ensure_structure(
    tenant: &Tenant,
    display_name: &str,
    defaults: &Permissions,
) -> GatewayResult<()> {
    for dir in [CONFIG_DIR, REFERENCES_DIR, FILES_DIR, METADATA_DIR] {
        let dir = tenant.path.join(dir);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::Write(format!("{}: {}", dir.display(), e)))?;
    }

    let permissions_file = tenant.permissions_file();
    if !exists(&permissions_file).await? {
        write_json_atomic(&permissions_file, defaults).await?;
        info!("Wrote default permissions for tenant {}", tenant.hash);
    }

    let tenant_config_file = tenant.tenant_config_file();
    if !exists(&tenant_config_file).await? {
        let config = TenantConfig {
            display_name: display_name.to_string(),
            registered_at: Utc::now(),
            active: true,
        };
        write_json_atomic(&tenant_config_file, &config).await?;
    }

    Ok(())
}

/// Permissions document as stored; missing fields fall back to the gateway defaults
#[derive(Debug, Default, Deserialize)]
struct StoredPermissions {
    max_file_size: Option<u64>,
    allowed_mime_types: Option<Vec<String>>,
}

/// Load a tenant's permissions, filling gaps from `defaults`
pub async fn load_permissions(
    tenant: &Tenant,
    defaults: &Permissions,
) -> GatewayResult<Permissions> {
    let stored: StoredPermissions = read_json(&tenant.permissions_file())
        .await?
        .unwrap_or_default();

    Ok(Permissions {
        max_file_size: stored.max_file_size.unwrap_or(defaults.max_file_size),
        allowed_mime_types: stored
            .allowed_mime_types
            .unwrap_or_else(|| defaults.allowed_mime_types.clone()),
    })
}

async fn exists(path: &Path) -> GatewayResult<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| GatewayError::Read(format!("{}: {}", path.display(), e)))
}
