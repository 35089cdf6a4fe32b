/// Upload conflict resolution
///
/// An upload to a path nobody owns goes straight through. An upload to a
/// taken path stops with a `Conflict` and mutates nothing; the caller then
/// resubmits the same upload with one of three decisions.
use crate::{
    blob_store::FileBackend,
    error::{GatewayError, GatewayResult},
    hashing,
    metadata::{self, FileMetadata},
    metrics,
    reference_store::{normalize_path, Reference, ReferenceStore},
    tenant::Tenant,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What to do about a path that already has a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    /// Leave everything as it is
    Skip = 1,
    /// Keep the existing hash, replace its bytes
    Overwrite = 2,
    /// Drop the old reference, store the upload under a new hash
    Replace = 3,
}

impl UploadDecision {
    pub const ALL: [UploadDecision; 3] = [
        UploadDecision::Skip,
        UploadDecision::Overwrite,
        UploadDecision::Replace,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            UploadDecision::Skip => "Skip (do nothing)",
            UploadDecision::Overwrite => "Overwrite (keep the same hash)",
            UploadDecision::Replace => "Replace (create a new hash)",
        }
    }
}

impl TryFrom<u8> for UploadDecision {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(UploadDecision::Skip),
            2 => Ok(UploadDecision::Overwrite),
            3 => Ok(UploadDecision::Replace),
            other => Err(GatewayError::InvalidOption(other.to_string())),
        }
    }
}

impl std::str::FromStr for UploadDecision {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| GatewayError::InvalidOption(s.to_string()))
            .and_then(UploadDecision::try_from)
    }
}

/// One upload attempt
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: String,
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Where an upload attempt ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { hash: String, path: String },
    Conflict { current_hash: String, path: String },
    Skipped { hash: String, path: String },
    Overwritten { hash: String, path: String },
    Replaced { old_hash: String, hash: String, path: String },
}

impl UploadOutcome {
    /// Metric label
    pub fn name(&self) -> &'static str {
        match self {
            UploadOutcome::Uploaded { .. } => "uploaded",
            UploadOutcome::Conflict { .. } => "conflict",
            UploadOutcome::Skipped { .. } => "skipped",
            UploadOutcome::Overwritten { .. } => "overwritten",
            UploadOutcome::Replaced { .. } => "replaced",
        }
    }
}

/// Drives the reference store and the file backend for uploads
pub struct UploadResolver {
    store: Arc<ReferenceStore>,
    backend: Arc<dyn FileBackend>,
}

impl UploadResolver {
    pub fn new(store: Arc<ReferenceStore>, backend: Arc<dyn FileBackend>) -> Self {
        Self { store, backend }
    }

    /// Handle an upload, optionally resuming a conflict with a decision
    pub async fn upload(
        &self,
        tenant: &Tenant,
        request: UploadRequest,
        decision: Option<UploadDecision>,
    ) -> GatewayResult<UploadOutcome> {
        let path = normalize_path(&request.path)?;
        let size = request.data.len() as u64;

        let result = match decision {
            None => self.upload_new(tenant, path, &request).await,
            Some(decision) => self.resume(tenant, path, &request, decision).await,
        };

        match &result {
            Ok(outcome) => {
                let written = match outcome {
                    UploadOutcome::Conflict { .. } | UploadOutcome::Skipped { .. } => 0,
                    _ => size,
                };
                metrics::record_upload(outcome.name(), written);
            }
            Err(_) => metrics::record_upload("failed", 0),
        }
        result
    }

    async fn upload_new(
        &self,
        tenant: &Tenant,
        path: String,
        request: &UploadRequest,
    ) -> GatewayResult<UploadOutcome> {
        match self.store.find_by_path(tenant, &path).await {
            Ok(existing) => {
                info!("Upload to {} collides with {}", path, existing.hash);
                return Ok(UploadOutcome::Conflict {
                    current_hash: existing.hash,
                    path,
                });
            }
            Err(GatewayError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let hash = hashing::new_hash(&request.original_name);
        self.backend.put(tenant, &hash, &request.data).await?;

        match self.store.append(tenant, &hash, &path).await {
            Ok(reference) => {
                self.save_metadata(tenant, &reference.hash, request).await;
                info!(
                    "Uploaded {} to {} for tenant {}",
                    reference.hash, reference.path, tenant.hash
                );
                Ok(UploadOutcome::Uploaded {
                    hash: reference.hash,
                    path: reference.path,
                })
            }
            Err(GatewayError::Conflict { current_hash, .. }) => {
                // Lost a race for the path
                self.discard_bytes(tenant, &hash).await;
                Ok(UploadOutcome::Conflict { current_hash, path })
            }
            Err(e) => {
                self.discard_bytes(tenant, &hash).await;
                Err(e)
            }
        }
    }

    async fn resume(
        &self,
        tenant: &Tenant,
        path: String,
        request: &UploadRequest,
        decision: UploadDecision,
    ) -> GatewayResult<UploadOutcome> {
        let existing = self.store.find_by_path(tenant, &path).await?;

        match decision {
            UploadDecision::Skip => {
                info!("Upload to {} skipped by caller", path);
                Ok(UploadOutcome::Skipped {
                    hash: existing.hash,
                    path,
                })
            }
            UploadDecision::Overwrite => self.overwrite_existing(tenant, existing, request).await,
            UploadDecision::Replace => {
                let hash = hashing::new_hash(&request.original_name);
                self.backend.put(tenant, &hash, &request.data).await?;

                if let Err(e) = self.store.replace(tenant, &existing.hash, &hash, &path).await {
                    self.discard_bytes(tenant, &hash).await;
                    return Err(e);
                }

                self.save_metadata(tenant, &hash, request).await;
                if let Err(e) = self.backend.delete(tenant, &existing.hash).await {
                    warn!("Failed to delete replaced file {}: {}", existing.hash, e);
                }
                if let Err(e) = metadata::remove(tenant, &existing.hash).await {
                    warn!("Failed to delete metadata of {}: {}", existing.hash, e);
                }

                info!("Replaced {} with {} at {}", existing.hash, hash, path);
                Ok(UploadOutcome::Replaced {
                    old_hash: existing.hash,
                    hash,
                    path,
                })
            }
        }
    }

    /// Write new bytes under the hash of `existing`
    ///
    /// The bytes go down outside the tenant lock, so the reference is
    /// confirmed afterwards. If it was removed meanwhile, the rewritten
    /// bytes and metadata are deleted again and the upload is `NotFound`.
    async fn overwrite_existing(
        &self,
        tenant: &Tenant,
        existing: Reference,
        request: &UploadRequest,
    ) -> GatewayResult<UploadOutcome> {
        self.backend.put(tenant, &existing.hash, &request.data).await?;
        self.save_metadata(tenant, &existing.hash, request).await;

        if let Err(e) = self.store.confirm_reference(tenant, &existing.hash).await {
            warn!("Overwrite of {} lost its reference: {}", existing.hash, e);
            self.discard_bytes(tenant, &existing.hash).await;
            if let Err(e) = metadata::remove(tenant, &existing.hash).await {
                warn!("Failed to delete metadata of {}: {}", existing.hash, e);
            }
            return Err(e);
        }

        info!("Overwrote {} at {}", existing.hash, existing.path);
        Ok(UploadOutcome::Overwritten {
            hash: existing.hash,
            path: existing.path,
        })
    }

    async fn save_metadata(&self, tenant: &Tenant, hash: &str, request: &UploadRequest) {
        let record = FileMetadata::new(
            request.original_name.clone(),
            request.mime_type.clone(),
            request.data.len() as u64,
        );
        if let Err(e) = metadata::save(tenant, hash, &record).await {
            warn!("Failed to save metadata for {}: {}", hash, e);
        }
    }

    /// Compensate for bytes stored under a hash no reference points to
    async fn discard_bytes(&self, tenant: &Tenant, hash: &str) {
        if let Err(e) = self.backend.delete(tenant, hash).await {
            error!(
                "Failed to remove orphaned file {} for tenant {}: {}",
                hash, tenant.hash, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::DiskFileBackend;
    use crate::tenant::{ensure_structure, Permissions};
    use fs2::FileExt;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    async fn setup(
        lock_timeout_secs: u64,
    ) -> (TempDir, Tenant, Arc<ReferenceStore>, UploadResolver) {
        let dir = tempdir().unwrap();
        let tenant = Tenant::new("d1292a5312c69108", dir.path().join("d1292a5312c69108"));
        ensure_structure(&tenant, "http://localhost", &Permissions::default())
            .await
            .unwrap();
        let store = Arc::new(ReferenceStore::new(1_048_576, lock_timeout_secs));
        let resolver = UploadResolver::new(Arc::clone(&store), Arc::new(DiskFileBackend::new()));
        (dir, tenant, store, resolver)
    }

    fn request(path: &str, data: &[u8]) -> UploadRequest {
        UploadRequest {
            path: path.to_string(),
            original_name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            data: data.to_vec(),
        }
    }

    fn count_objects(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .map(|e| e.unwrap().path())
            .map(|p| if p.is_dir() { count_objects(&p) } else { 1 })
            .sum()
    }

    async fn bytes_of(tenant: &Tenant, hash: &str) -> Option<Vec<u8>> {
        DiskFileBackend::new().get(tenant, hash).await.unwrap()
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("1".parse::<UploadDecision>().unwrap(), UploadDecision::Skip);
        assert_eq!(UploadDecision::try_from(3).unwrap(), UploadDecision::Replace);
        assert!(matches!(
            UploadDecision::try_from(7),
            Err(GatewayError::InvalidOption(_))
        ));
        assert!(matches!(
            "two".parse::<UploadDecision>(),
            Err(GatewayError::InvalidOption(_))
        ));
        let ids: Vec<u8> = UploadDecision::ALL.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upload_then_conflict() {
        let (_dir, tenant, store, resolver) = setup(5).await;

        let first = resolver
            .upload(&tenant, request("/img/a.png", b"one"), None)
            .await
            .unwrap();
        let UploadOutcome::Uploaded { hash, path } = first else {
            panic!("expected Uploaded, got {:?}", first);
        };
        assert_eq!(path, "img/a.png");
        assert!(hashing::is_valid_hash(&hash));
        assert_eq!(bytes_of(&tenant, &hash).await, Some(b"one".to_vec()));
        assert_eq!(
            metadata::load(&tenant, &hash).await.unwrap().unwrap().size_bytes,
            3
        );

        let second = resolver
            .upload(&tenant, request("img/a.png", b"two"), None)
            .await
            .unwrap();
        assert_eq!(
            second,
            UploadOutcome::Conflict {
                current_hash: hash.clone(),
                path: "img/a.png".to_string()
            }
        );

        // Nothing changed
        assert_eq!(bytes_of(&tenant, &hash).await, Some(b"one".to_vec()));
        assert_eq!(count_objects(&tenant.files_dir()), 1);
        assert_eq!(store.find_by_path(&tenant, "img/a.png").await.unwrap().hash, hash);
    }

    #[tokio::test]
    async fn test_skip_changes_nothing() {
        let (_dir, tenant, store, resolver) = setup(5).await;
        resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await
            .unwrap();
        let hash = store.find_by_path(&tenant, "img/a.png").await.unwrap().hash;

        let outcome = resolver
            .upload(
                &tenant,
                request("img/a.png", b"two"),
                Some(UploadDecision::Skip),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Skipped { hash: h, .. } if h == hash));
        assert_eq!(bytes_of(&tenant, &hash).await, Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_hash() {
        let (_dir, tenant, store, resolver) = setup(5).await;
        resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await
            .unwrap();
        let hash = store.find_by_path(&tenant, "img/a.png").await.unwrap().hash;
        let segment = tenant.references_dir().join("ref_001.json");
        let segment_before = std::fs::read(&segment).unwrap();

        let outcome = resolver
            .upload(
                &tenant,
                request("img/a.png", b"two!"),
                Some(UploadDecision::Overwrite),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Overwritten {
                hash: hash.clone(),
                path: "img/a.png".to_string()
            }
        );
        assert_eq!(bytes_of(&tenant, &hash).await, Some(b"two!".to_vec()));
        assert_eq!(std::fs::read(&segment).unwrap(), segment_before);
        assert_eq!(
            metadata::load(&tenant, &hash).await.unwrap().unwrap().size_bytes,
            4
        );
    }

    #[tokio::test]
    async fn test_overwrite_after_concurrent_delete_leaves_nothing() {
        let (_dir, tenant, store, resolver) = setup(5).await;
        resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await
            .unwrap();
        let existing = store.find_by_path(&tenant, "img/a.png").await.unwrap();

        // A DELETE completes between the lookup and the byte write
        store.remove(&tenant, &existing.hash).await.unwrap();
        DiskFileBackend::new().delete(&tenant, &existing.hash).await.unwrap();
        metadata::remove(&tenant, &existing.hash).await.unwrap();

        let result = resolver
            .overwrite_existing(&tenant, existing.clone(), &request("img/a.png", b"two"))
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert_eq!(bytes_of(&tenant, &existing.hash).await, None);
        assert_eq!(metadata::load(&tenant, &existing.hash).await.unwrap(), None);
        assert_eq!(count_objects(&tenant.files_dir()), 0);
    }

    #[tokio::test]
    async fn test_replace_mints_new_hash() {
        let (_dir, tenant, store, resolver) = setup(5).await;
        resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await
            .unwrap();
        let old = store.find_by_path(&tenant, "img/a.png").await.unwrap().hash;

        let outcome = resolver
            .upload(
                &tenant,
                request("img/a.png", b"two"),
                Some(UploadDecision::Replace),
            )
            .await
            .unwrap();
        let UploadOutcome::Replaced { old_hash, hash, path } = outcome else {
            panic!("expected Replaced, got {:?}", outcome);
        };
        assert_eq!(old_hash, old);
        assert_ne!(hash, old);
        assert_eq!(path, "img/a.png");

        assert!(matches!(
            store.find_by_hash(&tenant, &old).await,
            Err(GatewayError::NotFound(_))
        ));
        assert_eq!(store.find_by_path(&tenant, "img/a.png").await.unwrap().hash, hash);
        assert_eq!(bytes_of(&tenant, &hash).await, Some(b"two".to_vec()));
        assert_eq!(bytes_of(&tenant, &old).await, None);
        assert_eq!(metadata::load(&tenant, &old).await.unwrap(), None);
        assert_eq!(count_objects(&tenant.files_dir()), 1);
    }

    #[tokio::test]
    async fn test_decision_without_existing_reference_is_not_found() {
        let (_dir, tenant, _store, resolver) = setup(5).await;

        for decision in UploadDecision::ALL {
            let result = resolver
                .upload(&tenant, request("img/none.png", b"x"), Some(decision))
                .await;
            assert!(matches!(result, Err(GatewayError::NotFound(_))));
        }
        assert_eq!(count_objects(&tenant.files_dir()), 0);
        assert!(!tenant.references_dir().join("ref_001.json").exists());
    }

    #[tokio::test]
    async fn test_failed_append_removes_stored_bytes() {
        let (_dir, tenant, store, resolver) = setup(1).await;

        let foreign = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(tenant.references_dir().join(".lock"))
            .unwrap();
        foreign.lock_exclusive().unwrap();

        let result = resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await;
        assert!(matches!(result, Err(GatewayError::LockTimeout(_))));
        assert_eq!(count_objects(&tenant.files_dir()), 0);

        FileExt::unlock(&foreign).unwrap();
        assert!(matches!(
            store.find_by_path(&tenant, "img/a.png").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_old_state() {
        let (_dir, tenant, store, resolver) = setup(1).await;
        resolver
            .upload(&tenant, request("img/a.png", b"one"), None)
            .await
            .unwrap();
        let old = store.find_by_path(&tenant, "img/a.png").await.unwrap().hash;

        let foreign = std::fs::OpenOptions::new()
            .write(true)
            .open(tenant.references_dir().join(".lock"))
            .unwrap();
        foreign.lock_exclusive().unwrap();

        let result = resolver
            .upload(
                &tenant,
                request("img/a.png", b"two"),
                Some(UploadDecision::Replace),
            )
            .await;
        assert!(matches!(result, Err(GatewayError::LockTimeout(_))));
        FileExt::unlock(&foreign).unwrap();

        assert_eq!(store.find_by_path(&tenant, "img/a.png").await.unwrap().hash, old);
        assert_eq!(bytes_of(&tenant, &old).await, Some(b"one".to_vec()));
        assert_eq!(count_objects(&tenant.files_dir()), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_uploads_to_one_path() {
        let (_dir, tenant, store, resolver) = setup(10).await;
        let resolver = Arc::new(resolver);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let resolver = Arc::clone(&resolver);
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                resolver
                    .upload(&tenant, request("img/race.png", &[i]), None)
                    .await
                    .unwrap()
            }));
        }

        let mut uploaded = 0;
        for handle in handles {
            if let UploadOutcome::Uploaded { .. } = handle.await.unwrap() {
                uploaded += 1;
            }
        }
        assert_eq!(uploaded, 1);
        assert!(store.find_by_path(&tenant, "img/race.png").await.is_ok());
        assert_eq!(count_objects(&tenant.files_dir()), 1);
    }
}
