/// Per-tenant write lock
///
/// Two layers: an in-process async mutex per tenant (so tasks in this
/// process queue up instead of spinning on the file lock), and an advisory
/// exclusive `flock` on `references/.lock` shared with every other gateway
/// process using the same storage directory. The guard releases both on drop.
use crate::{
    error::{GatewayError, GatewayResult},
    metrics,
    tenant::Tenant,
};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

pub const LOCK_FILE: &str = ".lock";

/// Poll interval while another process holds the file lock
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Registry of per-tenant locks
pub struct TenantLocks {
    timeout: Duration,
    local: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one read-modify-write cycle
pub struct TenantLockGuard {
    file: File,
    _local: OwnedMutexGuard<()>,
}

impl TenantLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the exclusive write lock for a tenant
    pub async fn acquire(&self, tenant: &Tenant) -> GatewayResult<TenantLockGuard> {
        let started = Instant::now();
        let references_dir = tenant.references_dir();

        let local = {
            let mut map = self
                .local
                .lock()
                .map_err(|e| GatewayError::Internal(format!("Lock registry poisoned: {}", e)))?;
            Arc::clone(map.entry(references_dir.clone()).or_default())
        };

        let local_guard = tokio::time::timeout(self.timeout, local.lock_owned())
            .await
            .map_err(|_| GatewayError::LockTimeout(self.timeout.as_secs()))?;

        if !references_dir.is_dir() {
            return Err(GatewayError::StoreUnavailable(format!(
                "references directory not found: {}",
                references_dir.display()
            )));
        }

        let lock_path = references_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| GatewayError::Write(format!("{}: {}", lock_path.display(), e)))?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= self.timeout {
                        warn!(
                            "Timed out waiting for lock on tenant {} after {:?}",
                            tenant.hash, self.timeout
                        );
                        return Err(GatewayError::LockTimeout(self.timeout.as_secs()));
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(GatewayError::Write(format!("{}: {}", lock_path.display(), e)));
                }
            }
        }

        metrics::LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());

        Ok(TenantLockGuard {
            file,
            _local: local_guard,
        })
    }
}

impl Drop for TenantLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
