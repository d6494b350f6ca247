//! Trinco Core - cluster lock negotiation
//!
//! This crate provides:
//! - The per-name lock state machine and the vote acquisition engine
//! - The two ownership policies (strict and yielding)
//! - The node-local FIFO mutex and shared lock primitives
//! - The composition managers forming the public lock API
//! - The cluster channel abstraction and its in-process implementation

pub mod channel;
pub mod metrics;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use channel::local::{LocalChannelConfig, LocalCluster, LocalClusterChannel};
pub use channel::{ChannelError, ClusterChannel, LockRpcTarget, MembershipListener};
pub use model::Configuration;
pub use service::manager::{EXCLUSIVE_LOCK_SERVICE, SHARED_LOCK_SERVICE};
pub use service::{
    ClusterLockEngine, ExclusiveLockManager, LockEngineConfig, LocalLockHandler, LockResult,
    SharedLockManager,
};
