//! Composition managers
//!
//! The public facades: each pairs one engine with one local primitive table
//! and exposes the completed API. [`ExclusiveLockManager`] wires the strict
//! policy to the FIFO mutex table; [`SharedLockManager`] wires the yielding
//! policy to the shared lock table.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use trinco_api::NodeId;
use trinco_common::{LockError, deadline_after, expired, remaining_duration};

use super::LocalLockHandler;
use super::engine::{ClusterLockEngine, LockEngineConfig};
use super::fifo_lock::FifoLockTable;
use super::policy::{StrictPolicy, YieldingPolicy};
use super::shared_lock::{Inspection, Registered, ReleaseOutcome, SharedLock, SharedLockTable};
use crate::channel::ClusterChannel;
use crate::metrics;

/// RPC service name of the exclusive manager's engine
pub const EXCLUSIVE_LOCK_SERVICE: &str = "trinco.lock.exclusive";
/// RPC service name of the shared manager's engine
pub const SHARED_LOCK_SERVICE: &str = "trinco.lock.shared";

/// How a shared `lock` call was satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockResult {
    /// Won a cluster vote for it.
    AcquiredFromCluster,
    /// The node already held it; only the local count grew.
    AlreadyHeld,
    /// Installed fresh as asserted by `new_lock`, no cluster traffic.
    NewLock,
}

impl LockResult {
    fn label(self) -> &'static str {
        match self {
            LockResult::AcquiredFromCluster => "acquired",
            LockResult::AlreadyHeld => "already-held",
            LockResult::NewLock => "new-lock",
        }
    }
}

// ==================== ExclusiveLockManager ====================

/// Cluster-wide exclusive locks over the strict policy and the FIFO mutex.
///
/// Local and global locking of the same name are intended for
/// mutually-exclusive use, never nested.
pub struct ExclusiveLockManager {
    engine: ClusterLockEngine,
    table: Arc<FifoLockTable>,
}

impl ExclusiveLockManager {
    pub fn new(channel: Arc<dyn ClusterChannel>) -> Self {
        Self::with_config(channel, LockEngineConfig::default())
    }

    pub fn with_config(channel: Arc<dyn ClusterChannel>, config: LockEngineConfig) -> Self {
        let table = Arc::new(FifoLockTable::new());
        let engine = ClusterLockEngine::new(
            EXCLUSIVE_LOCK_SERVICE,
            channel,
            Arc::clone(&table) as Arc<dyn LocalLockHandler>,
            Box::new(StrictPolicy),
            config,
        );
        Self { engine, table }
    }

    pub async fn start(&self) -> Result<(), LockError> {
        self.table.open();
        self.engine.start().await
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
        self.table.close();
    }

    /// Acquires `name` across the cluster.
    pub async fn lock_globally(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        self.engine.lock(name, timeout).await
    }

    /// Releases a cluster-wide lock held by this node; a silent no-op
    /// otherwise.
    pub async fn unlock_globally(&self, name: &str) -> Result<(), LockError> {
        self.engine.unlock(name).await
    }

    /// Acquires the node-local FIFO mutex only; no cluster traffic.
    pub async fn lock_locally(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        let me = self.local_node()?;
        self.table.lock_local(name, &me, as_wire_ms(timeout)).await
    }

    /// Releases the node-local mutex if held by this node.
    pub fn unlock_locally(&self, name: &str) -> Result<(), LockError> {
        let me = self.local_node()?;
        self.table.unlock_local(name, &me);
        Ok(())
    }

    /// Recorded holder of the local primitive (may be a remote grantee).
    pub fn lock_holder(&self, name: &str) -> Option<NodeId> {
        LocalLockHandler::lock_holder(self.table.as_ref(), name)
    }

    pub fn engine(&self) -> &ClusterLockEngine {
        &self.engine
    }

    fn local_node(&self) -> Result<NodeId, LockError> {
        if !self.engine.is_started() {
            return Err(LockError::NotStarted);
        }
        LocalLockHandler::local_node(self.table.as_ref()).ok_or(LockError::NotStarted)
    }
}

// ==================== SharedLockManager ====================

/// Cluster-wide owner-tracked locks over the yielding policy and the shared
/// local lock, for resources owned mostly by one node at a time.
pub struct SharedLockManager {
    engine: ClusterLockEngine,
    table: Arc<SharedLockTable>,
}

impl SharedLockManager {
    pub fn new(channel: Arc<dyn ClusterChannel>) -> Self {
        Self::with_config(channel, LockEngineConfig::default())
    }

    pub fn with_config(channel: Arc<dyn ClusterChannel>, config: LockEngineConfig) -> Self {
        let table = Arc::new(SharedLockTable::new());
        let engine = ClusterLockEngine::new(
            SHARED_LOCK_SERVICE,
            channel,
            Arc::clone(&table) as Arc<dyn LocalLockHandler>,
            Box::new(YieldingPolicy),
            config,
        );
        Self { engine, table }
    }

    pub async fn start(&self) -> Result<(), LockError> {
        self.table.open();
        self.engine.start().await
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
        self.table.close();
    }

    /// Acquires a shared reference to `name` for this node.
    ///
    /// `new_lock` asserts the name is fresh cluster-wide: the entry installs
    /// already self-held with no cluster traffic; an existing entry degrades
    /// to the normal path. At most one caller per name drives the cluster
    /// negotiation at a time; others wait on it locally.
    pub async fn lock(
        &self,
        name: &str,
        timeout: Duration,
        new_lock: bool,
    ) -> Result<LockResult, LockError> {
        let me = self.local_node()?;
        let deadline = deadline_after(timeout);

        if new_lock && self.table.try_insert_held(name, &me).is_some() {
            debug!(name, node = %me, "Installed fresh shared lock");
            metrics::record_lock_result(self.engine.service(), LockResult::NewLock.label());
            return Ok(LockResult::NewLock);
        }

        loop {
            let entry = self.table.get_or_create(name);
            let token = self.table.next_token();
            let result = match entry.register(&me, token) {
                None => {
                    // stale instance; drop it and fetch a live one
                    self.table.evict_if(name, &entry);
                    continue;
                }
                Some(Registered::Held) => Ok(LockResult::AlreadyHeld),
                Some(Registered::Requester) => {
                    self.drive_request(&entry, name, &me, token, deadline).await
                }
                Some(Registered::Waiter) => {
                    match self.wait_for_grant(&entry, name, &me, token, deadline).await? {
                        WaitOutcome::Granted => Ok(LockResult::AlreadyHeld),
                        WaitOutcome::TakeOver => {
                            self.drive_request(&entry, name, &me, token, deadline).await
                        }
                        WaitOutcome::Stale => {
                            self.table.evict_if(name, &entry);
                            continue;
                        }
                    }
                }
            };
            if let Ok(kind) = &result {
                metrics::record_lock_result(self.engine.service(), kind.label());
            }
            return result;
        }
    }

    /// Drops one reference held by this node.
    ///
    /// Cluster ownership is retained lazily at count zero (the next local
    /// `lock` is traffic-free) unless `remove` is set, which evicts the
    /// tracking entry and releases the cluster state once the count drains.
    pub async fn unlock(&self, name: &str, remove: bool) -> Result<(), LockError> {
        let me = self.local_node()?;
        let Some(entry) = self.table.get(name) else {
            return Ok(());
        };
        match entry.unlock(&me, remove) {
            ReleaseOutcome::Noop | ReleaseOutcome::Retained => Ok(()),
            ReleaseOutcome::Drained { evicted: false } => Ok(()),
            ReleaseOutcome::Drained { evicted: true } => {
                self.table.evict_if(name, &entry);
                self.engine.unlock(name).await
            }
        }
    }

    /// The node this manager's table considers the holder of `name`.
    pub fn lock_holder(&self, name: &str) -> Option<NodeId> {
        LocalLockHandler::lock_holder(self.table.as_ref(), name)
    }

    /// Registered local references for `name`; `None` when untracked.
    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.table.get(name).map(|entry| entry.snapshot().local_count)
    }

    pub fn engine(&self) -> &ClusterLockEngine {
        &self.engine
    }

    fn local_node(&self) -> Result<NodeId, LockError> {
        if !self.engine.is_started() {
            return Err(LockError::NotStarted);
        }
        LocalLockHandler::local_node(self.table.as_ref()).ok_or(LockError::NotStarted)
    }

    /// Runs the cluster negotiation as the single-flight requester, then
    /// balances the grant reference against the registration.
    async fn drive_request(
        &self,
        entry: &Arc<SharedLock>,
        name: &str,
        me: &NodeId,
        token: u64,
        deadline: Option<std::time::Instant>,
    ) -> Result<LockResult, LockError> {
        let budget = match remaining_duration(deadline) {
            None => Duration::ZERO,
            Some(left) if left.is_zero() => {
                entry.deregister(token);
                entry.wake_local_waiters();
                return Err(LockError::timeout(
                    name,
                    entry.holder().map(|h| h.to_string()),
                ));
            }
            Some(left) => left,
        };
        match self.engine.lock(name, budget).await {
            Ok(()) => {
                // the grant added its own reference through the handler
                entry.deregister(token);
                debug!(name, node = %me, "Shared lock acquired from cluster");
                Ok(LockResult::AcquiredFromCluster)
            }
            Err(err) => {
                entry.deregister(token);
                // the newest waiter may take over the request
                entry.wake_local_waiters();
                Err(err)
            }
        }
    }

    /// Blocks a registered waiter until granted, handed the request, staled
    /// out, or expired.
    async fn wait_for_grant(
        &self,
        entry: &Arc<SharedLock>,
        name: &str,
        me: &NodeId,
        token: u64,
        deadline: Option<std::time::Instant>,
    ) -> Result<WaitOutcome, LockError> {
        loop {
            // arm the wake-up before inspecting so a grant landing between
            // the check and the await is not lost
            let notified = entry.local_notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match entry.inspect(me, token) {
                Inspection::Granted => return Ok(WaitOutcome::Granted),
                Inspection::TakeOver => return Ok(WaitOutcome::TakeOver),
                Inspection::Stale => return Ok(WaitOutcome::Stale),
                Inspection::Pending => {}
            }

            if self.table.is_closed() {
                entry.deregister(token);
                return Err(LockError::Interrupted(name.to_string()));
            }
            if expired(deadline) {
                entry.deregister(token);
                return Err(LockError::timeout(
                    name,
                    entry.holder().map(|h| h.to_string()),
                ));
            }

            match remaining_duration(deadline) {
                None => notified.await,
                Some(left) => {
                    let _ = tokio::time::timeout(left, notified).await;
                }
            }
        }
    }
}

enum WaitOutcome {
    Granted,
    TakeOver,
    Stale,
}

/// Caller-facing `Duration` to the wire's millisecond convention.
fn as_wire_ms(timeout: Duration) -> i64 {
    if timeout.is_zero() {
        0
    } else {
        (timeout.as_millis() as i64).max(1)
    }
}
