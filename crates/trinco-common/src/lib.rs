//! Trinco Common - shared building blocks for the lock engine
//!
//! This crate provides the foundational pieces used across all Trinco
//! components:
//! - `LockError`: the failure type surfaced by lock operations
//! - `VersionedCell`: a version-guarded compare-and-set cell
//! - Deadline helpers for the millisecond timeout convention

pub mod error;
pub mod sync;
pub mod utils;

// Re-exports for convenience
pub use error::LockError;
pub use sync::VersionedCell;
pub use utils::{
    deadline_after, deadline_after_ms, expired, now_millis, remaining_duration, remaining_ms,
};
