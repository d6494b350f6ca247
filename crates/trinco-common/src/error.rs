//! Error types for Trinco
//!
//! `LockError` is the single failure type surfaced by the lock managers and
//! the negotiation engine. Holder and lock names are carried as plain strings
//! so this crate stays free of the upper model types.

/// Failures surfaced by lock acquisition and release
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// The deadline elapsed before the lock could be acquired.
    #[error("timed out waiting for lock '{}' (holder: {})", name, holder.as_deref().unwrap_or("unknown"))]
    Timeout {
        name: String,
        /// Presumed current holder, when any round reported one.
        holder: Option<String>,
    },

    /// The wait was cancelled from outside, typically by `stop()`.
    #[error("interrupted while waiting for lock '{0}'")]
    Interrupted(String),

    /// `lock`/`unlock` called before `start()` or after `stop()`.
    #[error("lock service is not started")]
    NotStarted,

    /// A release broadcast failed; peers may retain a stale grant.
    #[error("failed to release remote lock '{name}': {reason}")]
    RemoteCleanup { name: String, reason: String },

    /// Registration or broadcast infrastructure failure.
    #[error("cluster channel error: {0}")]
    Channel(String),
}

impl LockError {
    pub fn timeout(name: impl Into<String>, holder: Option<String>) -> Self {
        LockError::Timeout {
            name: name.into(),
            holder,
        }
    }

    pub fn remote_cleanup(name: impl Into<String>, reason: impl Into<String>) -> Self {
        LockError::RemoteCleanup {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
