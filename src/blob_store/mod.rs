/// Object byte storage
///
/// Bytes live inside the owning tenant's namespace, keyed by object hash.
/// The reference store decides what a hash means; backends only move bytes.

pub mod disk;

pub use disk::DiskFileBackend;

use crate::{error::GatewayResult, tenant::Tenant};
use async_trait::async_trait;

/// File storage backend trait
#[async_trait]
pub trait FileBackend: Send + Sync {
    /// Store the bytes of an object, replacing any previous content
    async fn put(&self, tenant: &Tenant, hash: &str, data: &[u8]) -> GatewayResult<()>;

    /// Retrieve an object's bytes
    async fn get(&self, tenant: &Tenant, hash: &str) -> GatewayResult<Option<Vec<u8>>>;

    /// Delete an object's bytes; deleting a missing object is not an error
    async fn delete(&self, tenant: &Tenant, hash: &str) -> GatewayResult<()>;
}
