// Lock negotiation services: engine, policies, local primitives, managers

pub mod engine;
pub mod fifo_lock;
pub mod manager;
pub mod policy;
pub mod shared_lock;
pub mod state;

// Re-export commonly used types
pub use engine::{ClusterLockEngine, LockEngineConfig};
pub use manager::{ExclusiveLockManager, LockResult, SharedLockManager};

use async_trait::async_trait;
use trinco_api::NodeId;
use trinco_common::LockError;

/// The engine's window on a node-local lock primitive.
///
/// Implemented by the primitive tables owned by the composition managers;
/// `caller` may be a remote node when a grant is made on its behalf.
#[async_trait]
pub trait LocalLockHandler: Send + Sync {
    fn local_node(&self) -> Option<NodeId>;

    fn set_local_node(&self, node: NodeId);

    /// Acquires the local primitive on `caller`'s behalf.
    async fn lock_from_cluster(
        &self,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Result<(), LockError>;

    /// Releases a local grant held by `caller`; unknown grants are ignored.
    async fn unlock_from_cluster(&self, name: &str, caller: &NodeId);

    fn lock_holder(&self, name: &str) -> Option<NodeId>;
}
