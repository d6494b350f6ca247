//! Per-name lock negotiation state
//!
//! Every tracked lock is a small state machine advanced only by
//! compare-and-set, so concurrent bids, votes, and releases linearize on the
//! status cell.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;
use trinco_api::NodeId;

/// Lifecycle of a tracked lock on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds or bids for the lock here.
    Unlocked,
    /// A cluster bid by the local node is collecting votes.
    RemoteLocking,
    /// The local primitive is being acquired on behalf of a bid.
    LocalLocking,
    /// Held; the state records by whom.
    Locked,
    /// Dead instance; holders of a stale reference must re-fetch.
    Invalid,
}

const STATUS_UNLOCKED: u8 = 0;
const STATUS_REMOTE_LOCKING: u8 = 1;
const STATUS_LOCAL_LOCKING: u8 = 2;
const STATUS_LOCKED: u8 = 3;
const STATUS_INVALID: u8 = 4;

impl LockStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            STATUS_REMOTE_LOCKING => LockStatus::RemoteLocking,
            STATUS_LOCAL_LOCKING => LockStatus::LocalLocking,
            STATUS_LOCKED => LockStatus::Locked,
            STATUS_INVALID => LockStatus::Invalid,
            _ => LockStatus::Unlocked,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LockStatus::Unlocked => STATUS_UNLOCKED,
            LockStatus::RemoteLocking => STATUS_REMOTE_LOCKING,
            LockStatus::LocalLocking => STATUS_LOCAL_LOCKING,
            LockStatus::Locked => STATUS_LOCKED,
            LockStatus::Invalid => STATUS_INVALID,
        }
    }
}

/// State tracked for one lock name on one node.
///
/// The status moves through CAS transitions only; the holder field is written
/// under its lock by whichever task owns the current transition.
pub struct LockState {
    name: String,
    /// Status stored as AtomicU8 so transitions are single CAS steps
    status: AtomicU8,
    holder: RwLock<Option<NodeId>>,
}

impl LockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AtomicU8::new(STATUS_UNLOCKED),
            holder: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> LockStatus {
        LockStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn holder(&self) -> Option<NodeId> {
        self.holder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn transition(&self, from: LockStatus, to: LockStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `Unlocked -> RemoteLocking`: the local node starts collecting votes.
    pub fn begin_remote_bid(&self) -> bool {
        self.transition(LockStatus::Unlocked, LockStatus::RemoteLocking)
    }

    /// `RemoteLocking -> LocalLocking`: votes were unanimous and the bid
    /// moves to the local primitive. Also taken by a responder yielding the
    /// race to a superior caller.
    pub fn begin_local_bid(&self) -> bool {
        self.transition(LockStatus::RemoteLocking, LockStatus::LocalLocking)
    }

    /// `Unlocked -> LocalLocking`: a remote caller's vote is being granted
    /// locally.
    pub fn begin_local_grant(&self) -> bool {
        self.transition(LockStatus::Unlocked, LockStatus::LocalLocking)
    }

    /// `LocalLocking -> Locked`, recording the holder.
    ///
    /// Only the task that owns the `LocalLocking` transition may call this;
    /// failure means the instance was invalidated underneath it.
    pub fn complete(&self, holder: &NodeId) -> bool {
        let mut guard = self.holder.write().unwrap_or_else(|e| e.into_inner());
        if self.transition(LockStatus::LocalLocking, LockStatus::Locked) {
            *guard = Some(holder.clone());
            true
        } else {
            false
        }
    }

    /// `Locked -> Unlocked` by the recorded holder; anyone else is refused.
    pub fn release(&self, by: &NodeId) -> bool {
        let mut guard = self.holder.write().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref() != Some(by) {
            return false;
        }
        if self.transition(LockStatus::Locked, LockStatus::Unlocked) {
            *guard = None;
            true
        } else {
            false
        }
    }

    /// `RemoteLocking|LocalLocking -> Unlocked`: a failed bid rolls back.
    pub fn revert_bid(&self) -> bool {
        self.transition(LockStatus::RemoteLocking, LockStatus::Unlocked)
            || self.transition(LockStatus::LocalLocking, LockStatus::Unlocked)
    }

    /// Terminal for this instance; stale references must re-fetch from the
    /// table.
    pub fn invalidate(&self) -> LockStatus {
        let previous = LockStatus::from_u8(self.status.swap(STATUS_INVALID, Ordering::SeqCst));
        if previous != LockStatus::Invalid {
            debug!(name = %self.name, status = ?previous, "Lock state invalidated");
        }
        previous
    }

    pub fn is_invalid(&self) -> bool {
        self.status() == LockStatus::Invalid
    }
}
