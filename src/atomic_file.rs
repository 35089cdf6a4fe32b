/// Whole-file JSON persistence helpers
///
/// Writers go through a hidden temp file in the target's directory which is
/// synced and then renamed over the target, so a concurrent reader sees
/// either the old complete document or the new one.
use crate::error::{GatewayError, GatewayResult};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Serialize a value as pretty JSON
pub fn encode_pretty<T: Serialize + ?Sized>(value: &T) -> GatewayResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| GatewayError::Encode(e.to_string()))
}

/// Write bytes to `path` via temp-file-then-rename
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> GatewayResult<()> {
    let tmp_path = temp_path_for(path);

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        // Never leave the temp file behind
        let _ = fs::remove_file(&tmp_path).await;
        return Err(GatewayError::Write(format!("{}: {}", path.display(), e)));
    }

    Ok(())
}

/// Serialize `value` and write it atomically
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> GatewayResult<()> {
    let bytes = encode_pretty(value)?;
    write_bytes_atomic(path, &bytes).await
}

/// Read and decode a JSON document, `Ok(None)` if the file does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> GatewayResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GatewayError::Read(format!("{}: {}", path.display(), e))),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GatewayError::Decode(format!("{}: {}", path.display(), e)))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}.tmp", name, &unique[..8]))
}
