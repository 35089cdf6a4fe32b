/// Reference store operations, all scoped to one tenant
use crate::{
    error::{GatewayError, GatewayResult},
    metrics,
    reference_store::{
        intent::{clear_intent, read_intent, write_intent, ReplaceIntent},
        lock::TenantLocks,
        normalize_path,
        segment::{
            encode_references, list_segments, most_recent, next_sequence, read_references,
            segment_file_name, write_segment, Segment, SegmentFile,
        },
        validate_hash, Reference,
    },
    tenant::Tenant,
};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// A segment file together with its decoded contents
struct LoadedSegment {
    file: SegmentFile,
    references: Vec<Reference>,
}

/// Rotating flat-file reference store
pub struct ReferenceStore {
    max_segment_size: u64,
    locks: TenantLocks,
}

impl ReferenceStore {
    /// Create a store rotating segments at `max_segment_size` bytes
    pub fn new(max_segment_size: u64, lock_timeout_secs: u64) -> Self {
        Self {
            max_segment_size,
            locks: TenantLocks::new(Duration::from_secs(lock_timeout_secs)),
        }
    }

    /// Load the segment new references go to
    ///
    /// That is the existing segment with the most recent modification time.
    /// A tenant without segments gets a synthesized, not yet written
    /// `ref_001.json`.
    pub async fn load_active_segment(&self, tenant: &Tenant) -> GatewayResult<Segment> {
        let dir = tenant.references_dir();
        let files = list_segments(&dir).await?;

        match most_recent(&files) {
            Some(file) => Ok(Segment {
                path: file.path.clone(),
                sequence: file.sequence,
                references: read_references(&file.path).await?,
            }),
            None => Ok(Segment {
                path: dir.join(segment_file_name(1)),
                sequence: 1,
                references: Vec::new(),
            }),
        }
    }

    /// Decide where `pending` gets written
    ///
    /// Returns `active` with `pending` appended while the segment has room.
    /// When the segment is already at the threshold on disk, or the updated
    /// array would reach it, an empty next segment is created and returned
    /// holding only `pending`; the full segment is left untouched.
    pub async fn rotate_if_full(
        &self,
        tenant: &Tenant,
        active: Segment,
        pending: Reference,
    ) -> GatewayResult<Segment> {
        let on_disk = match fs::metadata(&active.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(GatewayError::Read(format!(
                    "{}: {}",
                    active.path.display(),
                    e
                )))
            }
        };

        let mut references = active.references;
        references.push(pending);
        let serialized = encode_references(&references)?.len() as u64;

        // A lone record always stays put, even if it alone exceeds the threshold
        let fits = on_disk < self.max_segment_size
            && (serialized < self.max_segment_size || references.len() == 1);
        if fits {
            return Ok(Segment {
                path: active.path,
                sequence: active.sequence,
                references,
            });
        }

        let dir = tenant.references_dir();
        let files = list_segments(&dir).await?;
        let sequence = next_sequence(&files);
        let next = Segment {
            path: dir.join(segment_file_name(sequence)),
            sequence,
            references: Vec::new(),
        };
        write_segment(&next).await?;

        metrics::SEGMENT_ROTATIONS_TOTAL.inc();
        info!(
            "Tenant {} rotated reference segment {} -> {}",
            tenant.hash,
            segment_file_name(active.sequence),
            segment_file_name(sequence)
        );

        let pending = references.pop().ok_or_else(|| {
            GatewayError::Internal("pending reference vanished during rotation".to_string())
        })?;
        Ok(Segment {
            references: vec![pending],
            ..next
        })
    }

    /// Record a new `{hash, path}` reference
    ///
    /// Fails with `DuplicateHash` if any segment of the tenant already holds
    /// the hash, and with `Conflict` if another reference owns the path. The
    /// checks and the write happen under one lock, so two uploads racing for
    /// the same path cannot both succeed. On failure no file is touched.
    pub async fn append(
        &self,
        tenant: &Tenant,
        hash: &str,
        path: &str,
    ) -> GatewayResult<Reference> {
        let reference = Reference::new(hash, path)?;

        let _guard = self.locks.acquire(tenant).await?;
        self.recover(tenant).await?;

        let loaded = self.load_all(tenant).await?;
        ensure_path_free(&loaded, &reference.path, None)?;
        ensure_unique_hash(&loaded, &reference.hash)?;
        self.append_locked(tenant, reference).await
    }

    /// Return the live reference for `hash`, recovering any unfinished replace first
    ///
    /// Callers that wrote bytes outside the lock use this to learn whether
    /// the reference survived concurrent removals.
    pub async fn confirm_reference(&self, tenant: &Tenant, hash: &str) -> GatewayResult<Reference> {
        validate_hash(hash)?;

        let _guard = self.locks.acquire(tenant).await?;
        self.recover(tenant).await?;

        let loaded = self.load_all(tenant).await?;
        find_in(&loaded, |r| r.hash == hash)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("File with hash '{}' not found", hash)))
    }

    /// Find a reference by object hash across all segments
    pub async fn find_by_hash(&self, tenant: &Tenant, hash: &str) -> GatewayResult<Reference> {
        validate_hash(hash)?;
        debug!("Looking up hash {} for tenant {}", hash, tenant.hash);
        self.find_where(tenant, |r| r.hash == hash)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("File with hash '{}' not found", hash)))
    }

    /// Find a reference by logical path across all segments
    pub async fn find_by_path(&self, tenant: &Tenant, path: &str) -> GatewayResult<Reference> {
        let path = normalize_path(path)?;
        debug!("Looking up path {} for tenant {}", path, tenant.hash);
        self.find_where(tenant, |r| r.path == path)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("No file found at path '{}'", path)))
    }

    /// Remove the reference with this hash
    ///
    /// Segments are scanned in sequence order and only the first segment
    /// holding the hash is rewritten.
    pub async fn remove(&self, tenant: &Tenant, hash: &str) -> GatewayResult<Reference> {
        validate_hash(hash)?;

        let _guard = self.locks.acquire(tenant).await?;
        self.recover(tenant).await?;

        let loaded = self.load_all(tenant).await?;
        let removed = remove_from(&loaded, hash).await?;

        metrics::REFERENCE_WRITES_TOTAL
            .with_label_values(&["remove"])
            .inc();
        info!("Tenant {} removed reference {}", tenant.hash, hash);
        Ok(removed)
    }

    /// Point an existing reference at a new logical path
    pub async fn update_path(
        &self,
        tenant: &Tenant,
        hash: &str,
        new_path: &str,
    ) -> GatewayResult<Reference> {
        validate_hash(hash)?;
        let new_path = normalize_path(new_path)?;

        let _guard = self.locks.acquire(tenant).await?;
        self.recover(tenant).await?;

        let loaded = self.load_all(tenant).await?;
        ensure_path_free(&loaded, &new_path, Some(hash))?;

        for segment in &loaded {
            let Some(index) = segment.references.iter().position(|r| r.hash == hash) else {
                continue;
            };

            let mut references = segment.references.clone();
            references[index].path = new_path;
            let updated = references[index].clone();
            write_segment(&Segment {
                path: segment.file.path.clone(),
                sequence: segment.file.sequence,
                references,
            })
            .await?;

            metrics::REFERENCE_WRITES_TOTAL
                .with_label_values(&["move"])
                .inc();
            info!("Tenant {} moved {} to {}", tenant.hash, hash, updated.path);
            return Ok(updated);
        }

        Err(GatewayError::NotFound(format!(
            "Reference with hash '{}' not found",
            hash
        )))
    }

    /// Swap `old_hash` for a new reference as one staged operation
    ///
    /// A write-ahead intent is recorded first. If either segment write
    /// fails the change is rolled back, so the tenant ends up with either
    /// the old reference or the new one, never neither.
    pub async fn replace(
        &self,
        tenant: &Tenant,
        old_hash: &str,
        new_hash: &str,
        path: &str,
    ) -> GatewayResult<Reference> {
        validate_hash(old_hash)?;
        let replacement = Reference::new(new_hash, path)?;
        let dir = tenant.references_dir();

        let _guard = self.locks.acquire(tenant).await?;
        self.recover(tenant).await?;

        let loaded = self.load_all(tenant).await?;
        let old = find_in(&loaded, |r| r.hash == old_hash)
            .cloned()
            .ok_or_else(|| {
                GatewayError::NotFound(format!("Reference with hash '{}' not found", old_hash))
            })?;
        ensure_unique_hash(&loaded, &replacement.hash)?;

        let intent = ReplaceIntent {
            remove: old,
            add: replacement.clone(),
        };
        write_intent(&dir, &intent).await?;

        let applied = async {
            remove_from(&loaded, old_hash).await?;
            let stored = self.append_locked(tenant, replacement).await?;
            clear_intent(&dir).await?;
            Ok::<Reference, GatewayError>(stored)
        }
        .await;

        match applied {
            Ok(stored) => {
                metrics::REFERENCE_WRITES_TOTAL
                    .with_label_values(&["replace"])
                    .inc();
                info!(
                    "Tenant {} replaced reference {} with {}",
                    tenant.hash, old_hash, stored.hash
                );
                Ok(stored)
            }
            Err(e) => {
                warn!("Replace of {} failed, rolling back: {}", old_hash, e);
                match self.roll_back(tenant, &intent).await {
                    Ok(()) => {
                        if let Err(clear_err) = clear_intent(&dir).await {
                            warn!("Failed to clear replace intent: {}", clear_err);
                        }
                    }
                    Err(rollback_err) => {
                        warn!(
                            "Rollback of replace failed, intent left for recovery: {}",
                            rollback_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Write `reference` into the active segment, rotating if needed. Lock must be held.
    async fn append_locked(
        &self,
        tenant: &Tenant,
        reference: Reference,
    ) -> GatewayResult<Reference> {
        let active = self.load_active_segment(tenant).await?;
        let target = self.rotate_if_full(tenant, active, reference.clone()).await?;
        write_segment(&target).await?;

        metrics::REFERENCE_WRITES_TOTAL
            .with_label_values(&["append"])
            .inc();
        info!(
            "Tenant {} recorded {} -> {} in {}",
            tenant.hash,
            reference.hash,
            reference.path,
            segment_file_name(target.sequence)
        );
        Ok(reference)
    }

    async fn load_all(&self, tenant: &Tenant) -> GatewayResult<Vec<LoadedSegment>> {
        let files = list_segments(&tenant.references_dir()).await?;
        let mut loaded = Vec::with_capacity(files.len());
        for file in files {
            let references = read_references(&file.path).await?;
            loaded.push(LoadedSegment { file, references });
        }
        Ok(loaded)
    }

    async fn find_where<F>(&self, tenant: &Tenant, predicate: F) -> GatewayResult<Option<Reference>>
    where
        F: Fn(&Reference) -> bool,
    {
        let dir = tenant.references_dir();
        let files = list_segments(&dir).await?;
        let intent = read_intent(&dir).await?;

        for file in &files {
            let references = read_references(&file.path).await?;
            let hit = references.into_iter().find(|r| {
                predicate(r) && !intent.as_ref().is_some_and(|intent| intent.hides(r))
            });
            if hit.is_some() {
                return Ok(hit);
            }
        }

        // Mid-replace: the old reference is still the visible one
        Ok(intent
            .map(|intent| intent.remove)
            .filter(|removed| predicate(removed)))
    }

    /// Undo a half-applied replace left behind by a crash. Lock must be held.
    async fn recover(&self, tenant: &Tenant) -> GatewayResult<()> {
        let dir = tenant.references_dir();
        if let Some(intent) = read_intent(&dir).await? {
            warn!(
                "Tenant {} has an unfinished replace of {}, rolling back",
                tenant.hash, intent.remove.hash
            );
            self.roll_back(tenant, &intent).await?;
            clear_intent(&dir).await?;
        }
        Ok(())
    }

    async fn roll_back(&self, tenant: &Tenant, intent: &ReplaceIntent) -> GatewayResult<()> {
        let loaded = self.load_all(tenant).await?;
        if find_in(&loaded, |r| r.hash == intent.add.hash).is_some() {
            remove_from(&loaded, &intent.add.hash).await?;
        }

        let loaded = self.load_all(tenant).await?;
        if find_in(&loaded, |r| r.hash == intent.remove.hash).is_none() {
            self.append_locked(tenant, intent.remove.clone()).await?;
        }
        Ok(())
    }
}

fn find_in<F>(loaded: &[LoadedSegment], predicate: F) -> Option<&Reference>
where
    F: Fn(&Reference) -> bool,
{
    loaded
        .iter()
        .flat_map(|s| s.references.iter())
        .find(|r| predicate(r))
}

/// Fail with `Conflict` when a reference other than `owner` holds `path`
fn ensure_path_free(
    loaded: &[LoadedSegment],
    path: &str,
    owner: Option<&str>,
) -> GatewayResult<()> {
    match find_in(loaded, |r| r.path == path && Some(r.hash.as_str()) != owner) {
        Some(existing) => Err(GatewayError::Conflict {
            path: path.to_string(),
            current_hash: existing.hash.clone(),
        }),
        None => Ok(()),
    }
}

fn ensure_unique_hash(loaded: &[LoadedSegment], hash: &str) -> GatewayResult<()> {
    if find_in(loaded, |r| r.hash == hash).is_some() {
        return Err(GatewayError::DuplicateHash(hash.to_string()));
    }
    Ok(())
}

/// Drop `hash` from the first segment holding it and rewrite only that segment
async fn remove_from(loaded: &[LoadedSegment], hash: &str) -> GatewayResult<Reference> {
    for segment in loaded {
        let Some(index) = segment.references.iter().position(|r| r.hash == hash) else {
            continue;
        };

        let mut references = segment.references.clone();
        let removed = references.remove(index);
        write_segment(&Segment {
            path: segment.file.path.clone(),
            sequence: segment.file.sequence,
            references,
        })
        .await?;
        return Ok(removed);
    }

    Err(GatewayError::NotFound(format!(
        "Reference with hash '{}' not found",
        hash
    )))
}
