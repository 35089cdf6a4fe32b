/// Write-ahead intent for the two-segment replace operation
///
/// A replace removes one reference and appends another, possibly touching
/// two segment files. The intent is written before either change and
/// deleted after both succeed. While it exists, the pre-replace state is
/// the authoritative one: readers see the old reference, and the next writer
/// to take the tenant lock rolls any half-applied change back.
use crate::{
    atomic_file::{read_json, write_json_atomic},
    error::{GatewayError, GatewayResult},
    reference_store::Reference,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const INTENT_FILE: &str = "replace.intent.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceIntent {
    /// Reference being retired
    pub remove: Reference,
    /// Reference taking its place
    pub add: Reference,
}

impl ReplaceIntent {
    /// Whether a reader must skip this on-disk reference
    pub fn hides(&self, reference: &Reference) -> bool {
        reference.hash == self.add.hash
    }
}

pub fn intent_path(references_dir: &Path) -> PathBuf {
    references_dir.join(INTENT_FILE)
}

pub async fn read_intent(references_dir: &Path) -> GatewayResult<Option<ReplaceIntent>> {
    read_json(&intent_path(references_dir)).await
}

pub async fn write_intent(references_dir: &Path, intent: &ReplaceIntent) -> GatewayResult<()> {
    write_json_atomic(&intent_path(references_dir), intent).await
}

pub async fn clear_intent(references_dir: &Path) -> GatewayResult<()> {
    let path = intent_path(references_dir);
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GatewayError::Write(format!("{}: {}", path.display(), e))),
    }
}
