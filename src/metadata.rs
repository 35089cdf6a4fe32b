/// Per-object metadata documents (`metadata/<hash>.json`)
///
/// Metadata is advisory: the reference store never reads it, retrieval uses
/// it for `Content-Type` and the download filename.
use crate::{
    atomic_file::{read_json, write_json_atomic},
    error::{GatewayError, GatewayResult},
    reference_store::validate_hash,
    tenant::Tenant,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Descriptive record of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl FileMetadata {
    /// Metadata for a file received now
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            uploaded_at: Utc::now(),
        }
    }
}

fn metadata_path(tenant: &Tenant, hash: &str) -> GatewayResult<PathBuf> {
    validate_hash(hash)?;
    Ok(tenant.metadata_dir().join(format!("{}.json", hash)))
}

/// Write (or overwrite) the metadata of an object
pub async fn save(tenant: &Tenant, hash: &str, metadata: &FileMetadata) -> GatewayResult<()> {
    let path = metadata_path(tenant, hash)?;
    fs::create_dir_all(tenant.metadata_dir())
        .await
        .map_err(|e| GatewayError::Write(format!("{}: {}", tenant.metadata_dir().display(), e)))?;
    write_json_atomic(&path, metadata).await
}

/// Read the metadata of an object, `None` if it has none
pub async fn load(tenant: &Tenant, hash: &str) -> GatewayResult<Option<FileMetadata>> {
    read_json(&metadata_path(tenant, hash)?).await
}

/// Delete the metadata of an object; a missing document is not an error
pub async fn remove(tenant: &Tenant, hash: &str) -> GatewayResult<()> {
    let path = metadata_path(tenant, hash)?;
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GatewayError::Write(format!("{}: {}", path.display(), e))),
    }
}
