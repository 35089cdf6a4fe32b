/// Disk-based file backend
use crate::{
    atomic_file::write_bytes_atomic,
    blob_store::FileBackend,
    error::{GatewayError, GatewayResult},
    reference_store::validate_hash,
    tenant::Tenant,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Disk storage backend
///
/// Objects are sharded by the first two hash characters inside the
/// tenant's `files/` directory: `{tenant}/files/{aa}/{hash}`.
#[derive(Clone, Default)]
pub struct DiskFileBackend;

impl DiskFileBackend {
    pub fn new() -> Self {
        Self
    }

    /// On-disk location of an object
    pub fn object_path(&self, tenant: &Tenant, hash: &str) -> GatewayResult<PathBuf> {
        validate_hash(hash)?;
        Ok(tenant.files_dir().join(&hash[0..2]).join(hash))
    }
}

#[async_trait]
impl FileBackend for DiskFileBackend {
    async fn put(&self, tenant: &Tenant, hash: &str, data: &[u8]) -> GatewayResult<()> {
        let path = self.object_path(tenant, hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                GatewayError::Write(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        write_bytes_atomic(&path, data).await
    }

    async fn get(&self, tenant: &Tenant, hash: &str) -> GatewayResult<Option<Vec<u8>>> {
        let path = self.object_path(tenant, hash)?;

        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::Read(format!("{}: {}", path.display(), e))),
        }
    }

    async fn delete(&self, tenant: &Tenant, hash: &str) -> GatewayResult<()> {
        let path = self.object_path(tenant, hash)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::Write(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
