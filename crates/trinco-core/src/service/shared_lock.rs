//! Shared local lock
//!
//! The relinquishing manager's local primitive: a registration-counted lock
//! whose whole mutable state is one snapshot advanced by compare-and-set.
//! Local callers register interest; the sole registrant drives the cluster
//! negotiation while later ones wait. Remote claimants queue FIFO and take
//! the tracking entry with them once the node is locally idle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tracing::{debug, trace};
use trinco_api::NodeId;
use trinco_common::{LockError, VersionedCell, deadline_after_ms, expired, remaining_duration};

use super::LocalLockHandler;

// ==================== snapshot ====================

/// One observable state of a shared lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSnapshot {
    /// Registered local interest, including holder references.
    pub local_count: u32,
    /// The node this entry considers the holder.
    pub lock_holder: Option<NodeId>,
    /// Sticky affinity: who held last, set when the count drains.
    pub last_holder: Option<NodeId>,
    /// Token of the newest local registration, the hand-off designee.
    pub latest_registrant: Option<u64>,
    /// Token of the registrant currently driving the cluster request.
    pub active_request: Option<u64>,
    /// Terminal; stale references must re-fetch.
    pub invalid: bool,
}

impl SharedSnapshot {
    fn free() -> Self {
        Self {
            local_count: 0,
            lock_holder: None,
            last_holder: None,
            latest_registrant: None,
            active_request: None,
            invalid: false,
        }
    }

    fn held_by(node: &NodeId) -> Self {
        Self {
            local_count: 1,
            lock_holder: Some(node.clone()),
            last_holder: None,
            latest_registrant: None,
            active_request: None,
            invalid: false,
        }
    }
}

/// How a registration left the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// The node already holds (or sticky re-take); the reference is live.
    Held,
    /// Sole registrant; drives the cluster negotiation.
    Requester,
    /// Another local caller is ahead; wait for a wake-up.
    Waiter,
}

/// What a waiting registrant sees on wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inspection {
    Granted,
    TakeOver,
    Pending,
    Stale,
}

/// Outcome of a local release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Caller was not the holder; nothing changed.
    Noop,
    /// References remain.
    Retained,
    /// Local count drained to zero.
    Drained {
        /// The entry was marked removable and is now invalid.
        evicted: bool,
    },
}

// ==================== SharedLock ====================

struct RemoteWaiter {
    id: u64,
    notify: Notify,
}

/// A registration-counted lock with snapshot/CAS state.
pub struct SharedLock {
    name: String,
    state: VersionedCell<SharedSnapshot>,
    /// Marked by unlock-with-remove; cleared by new registrations.
    removable: AtomicBool,
    /// Broadcast wake for local waiters; waiters re-inspect on every wake.
    local_waiters: Notify,
    remote_queue: Mutex<VecDeque<Arc<RemoteWaiter>>>,
    waiter_seq: AtomicU64,
    closed: AtomicBool,
}

impl SharedLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_snapshot(name, SharedSnapshot::free())
    }

    /// A fresh entry already held by `node` with one reference.
    pub fn new_held(name: impl Into<String>, node: &NodeId) -> Self {
        Self::with_snapshot(name, SharedSnapshot::held_by(node))
    }

    fn with_snapshot(name: impl Into<String>, snapshot: SharedSnapshot) -> Self {
        Self {
            name: name.into(),
            state: VersionedCell::new(snapshot),
            removable: AtomicBool::new(false),
            local_waiters: Notify::new(),
            remote_queue: Mutex::new(VecDeque::new()),
            waiter_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        self.state.load().1
    }

    pub fn holder(&self) -> Option<NodeId> {
        self.snapshot().lock_holder
    }

    pub(crate) fn local_notify(&self) -> &Notify {
        &self.local_waiters
    }

    /// Registers local interest under `token`.
    ///
    /// `None` means the entry is stale; the caller evicts it and re-fetches.
    pub fn register(&self, me: &NodeId, token: u64) -> Option<Registered> {
        loop {
            let (version, snap) = self.state.load();
            if snap.invalid {
                return None;
            }
            let mut next = snap.clone();
            next.local_count += 1;
            next.latest_registrant = Some(token);
            let outcome = if snap.lock_holder.as_ref() == Some(me) {
                Registered::Held
            } else if snap.lock_holder.is_none() && snap.last_holder.as_ref() == Some(me) {
                // sticky re-take, no cluster traffic
                next.lock_holder = Some(me.clone());
                next.last_holder = None;
                Registered::Held
            } else if snap.local_count == 0 && snap.lock_holder.is_none() {
                next.active_request = Some(token);
                Registered::Requester
            } else {
                Registered::Waiter
            };
            if self.state.compare_and_set(version, next) {
                // a live registration revives a remove-marked entry
                self.removable.store(false, Ordering::SeqCst);
                trace!(name = %self.name, token, outcome = ?outcome, "Shared lock registration");
                return Some(outcome);
            }
        }
    }

    /// Drops one registration, clearing the caller's own designee stamp.
    pub fn deregister(&self, token: u64) {
        loop {
            let (version, snap) = self.state.load();
            if snap.invalid {
                return;
            }
            let mut next = snap.clone();
            next.local_count = next.local_count.saturating_sub(1);
            if next.latest_registrant == Some(token) {
                next.latest_registrant = None;
            }
            if next.active_request == Some(token) {
                next.active_request = None;
            }
            let drained = next.local_count == 0;
            if self.state.compare_and_set(version, next) {
                if drained {
                    self.wake_remote_head();
                }
                return;
            }
        }
    }

    /// Installs node ownership after the cluster vote was won.
    ///
    /// Adds the grant reference; the requester balances it by dropping its
    /// registration once the engine call completes.
    pub fn lock_for_local_node(&self, me: &NodeId) {
        loop {
            let (version, snap) = self.state.load();
            if snap.invalid {
                return;
            }
            let mut next = snap.clone();
            next.local_count += 1;
            next.lock_holder = Some(me.clone());
            next.last_holder = None;
            if self.state.compare_and_set(version, next) {
                self.local_waiters.notify_waiters();
                return;
            }
        }
    }

    /// Claims the entry for a remote node, waiting FIFO behind other remote
    /// claimants until the node is locally idle.
    ///
    /// Success leaves the entry invalid; the caller evicts it.
    pub async fn lock_for_remote_node(
        &self,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Result<(), LockError> {
        let deadline = deadline_after_ms(timeout_ms);
        let waiter = Arc::new(RemoteWaiter {
            id: self.waiter_seq.fetch_add(1, Ordering::SeqCst),
            notify: Notify::new(),
        });
        {
            let mut queue = self.remote_queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(Arc::clone(&waiter));
        }

        loop {
            if self.closed.load(Ordering::SeqCst) {
                self.abandon_remote(&waiter);
                return Err(LockError::Interrupted(self.name.clone()));
            }

            let is_head = {
                let queue = self.remote_queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.front().map(|w| w.id) == Some(waiter.id)
            };
            if is_head {
                let (version, snap) = self.state.load();
                if snap.invalid {
                    self.abandon_remote(&waiter);
                    return Ok(());
                }
                if snap.local_count == 0 {
                    let mut next = snap.clone();
                    next.invalid = true;
                    if self.state.compare_and_set(version, next) {
                        self.abandon_remote(&waiter);
                        self.local_waiters.notify_waiters();
                        debug!(name = %self.name, caller = %caller, "Yielded shared lock to remote node");
                        return Ok(());
                    }
                    continue;
                }
            }

            if expired(deadline) {
                self.abandon_remote(&waiter);
                let holder = self.snapshot().lock_holder;
                return Err(LockError::timeout(
                    self.name.clone(),
                    holder.map(|h| h.to_string()),
                ));
            }

            let notified = waiter.notify.notified();
            match remaining_duration(deadline) {
                None => notified.await,
                Some(left) => {
                    let _ = tokio::time::timeout(left, notified).await;
                }
            }
        }
    }

    /// Releases one reference held by `me`.
    ///
    /// The CAS that drains the count to zero clears the holder, records the
    /// sticky affinity, and, when the entry is remove-marked, installs
    /// `invalid` in the same snapshot so revival races linearize on the cell.
    pub fn unlock(&self, me: &NodeId, remove: bool) -> ReleaseOutcome {
        {
            let snap = self.snapshot();
            if snap.invalid || snap.lock_holder.as_ref() != Some(me) {
                return ReleaseOutcome::Noop;
            }
        }
        if remove {
            self.removable.store(true, Ordering::SeqCst);
        }
        loop {
            let (version, snap) = self.state.load();
            if snap.invalid || snap.lock_holder.as_ref() != Some(me) {
                return ReleaseOutcome::Noop;
            }
            let mut next = snap.clone();
            next.local_count = next.local_count.saturating_sub(1);
            let drained = next.local_count == 0;
            let mut evicted = false;
            if drained {
                next.lock_holder = None;
                next.last_holder = Some(me.clone());
                if self.removable.load(Ordering::SeqCst) {
                    next.invalid = true;
                    next.last_holder = None;
                    evicted = true;
                }
            }
            if self.state.compare_and_set(version, next) {
                if drained {
                    self.wake_remote_head();
                }
                if evicted {
                    self.local_waiters.notify_waiters();
                }
                return if drained {
                    ReleaseOutcome::Drained { evicted }
                } else {
                    ReleaseOutcome::Retained
                };
            }
        }
    }

    /// What a waiting registrant should do now.
    ///
    /// `TakeOver` is a claim: the CAS installs the caller as the active
    /// requester, so at most one waiter steps up and never while another
    /// request is still in flight. The newest registrant is the designee;
    /// once it has left, any live registrant may claim.
    pub(crate) fn inspect(&self, me: &NodeId, token: u64) -> Inspection {
        loop {
            let (version, snap) = self.state.load();
            if snap.invalid {
                return Inspection::Stale;
            }
            if snap.lock_holder.as_ref() == Some(me) {
                return Inspection::Granted;
            }
            let designated = match snap.latest_registrant {
                Some(designee) => designee == token,
                None => true,
            };
            if snap.active_request.is_none() && designated {
                let mut next = snap.clone();
                next.active_request = Some(token);
                next.latest_registrant = Some(token);
                if self.state.compare_and_set(version, next) {
                    return Inspection::TakeOver;
                }
                continue;
            }
            return Inspection::Pending;
        }
    }

    /// Wakes all local waiters for re-inspection.
    pub fn wake_local_waiters(&self) {
        self.local_waiters.notify_waiters();
    }

    fn wake_remote_head(&self) {
        let queue = self.remote_queue.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(head) = queue.front() {
            head.notify.notify_one();
        }
    }

    fn abandon_remote(&self, waiter: &Arc<RemoteWaiter>) {
        let mut queue = self.remote_queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.retain(|w| w.id != waiter.id);
        if let Some(head) = queue.front() {
            head.notify.notify_one();
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let waiters: Vec<Arc<RemoteWaiter>> = {
            let mut queue = self.remote_queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.drain(..).collect()
        };
        for waiter in waiters {
            waiter.notify.notify_one();
        }
        self.local_waiters.notify_waiters();
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

// ==================== SharedLockTable ====================

/// Table of shared locks plus the local node identity.
///
/// The relinquishing manager's local primitive; doubles as the engine's
/// [`LocalLockHandler`]. Remote grants evict their entry, so this table only
/// ever tracks locks the local node is interested in.
pub struct SharedLockTable {
    locks: DashMap<String, Arc<SharedLock>>,
    local_node: RwLock<Option<NodeId>>,
    token_seq: AtomicU64,
    closed: AtomicBool,
}

impl SharedLockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            local_node: RwLock::new(None),
            token_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn next_token(&self) -> u64 {
        self.token_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get_or_create(&self, name: &str) -> Arc<SharedLock> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SharedLock::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<SharedLock>> {
        self.locks.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Installs a fresh already-held entry, or reports the existing one.
    pub fn try_insert_held(&self, name: &str, me: &NodeId) -> Option<Arc<SharedLock>> {
        match self.locks.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let lock = Arc::new(SharedLock::new_held(name, me));
                vacant.insert(Arc::clone(&lock));
                Some(lock)
            }
        }
    }

    /// Removes `entry` from the table iff it is still the mapped instance.
    pub fn evict_if(&self, name: &str, entry: &Arc<SharedLock>) {
        self.locks
            .remove_if(name, |_, current| Arc::ptr_eq(current, entry));
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.locks.iter() {
            entry.value().close();
        }
        debug!("Shared lock table closed");
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        for entry in self.locks.iter() {
            entry.value().open();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SharedLockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalLockHandler for SharedLockTable {
    fn local_node(&self) -> Option<NodeId> {
        self.local_node
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_local_node(&self, node: NodeId) {
        *self.local_node.write().unwrap_or_else(|e| e.into_inner()) = Some(node);
    }

    async fn lock_from_cluster(
        &self,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Result<(), LockError> {
        if self.is_closed() {
            return Err(LockError::Interrupted(name.to_string()));
        }
        if self.local_node().as_ref() == Some(caller) {
            loop {
                let entry = self.get_or_create(name);
                entry.lock_for_local_node(caller);
                if !entry.snapshot().invalid {
                    return Ok(());
                }
                // a remote claim took this instance; grant onto a fresh one
                self.evict_if(name, &entry);
            }
        }
        match self.get(name) {
            // nothing tracked here, nothing to contest
            None => Ok(()),
            Some(entry) => {
                entry.lock_for_remote_node(caller, timeout_ms).await?;
                self.evict_if(name, &entry);
                Ok(())
            }
        }
    }

    async fn unlock_from_cluster(&self, name: &str, caller: &NodeId) {
        // remote holders are never recorded locally; releases arrive after
        // the entry already left with the grant
        trace!(name, caller = %caller, "Shared release ignored");
    }

    fn lock_holder(&self, name: &str) -> Option<NodeId> {
        self.get(name).and_then(|entry| entry.holder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_first_registrant_is_requester() {
        let lock = SharedLock::new("warehouse");
        assert_eq!(
            lock.register(&node("node-a"), 1),
            Some(Registered::Requester)
        );
        let snap = lock.snapshot();
        assert_eq!(snap.local_count, 1);
        assert_eq!(snap.latest_registrant, Some(1));
        assert_eq!(snap.active_request, Some(1));
        assert!(snap.lock_holder.is_none());
    }

    #[test]
    fn test_second_registrant_waits() {
        let lock = SharedLock::new("warehouse");
        lock.register(&node("node-a"), 1);
        assert_eq!(lock.register(&node("node-a"), 2), Some(Registered::Waiter));
        let snap = lock.snapshot();
        assert_eq!(snap.local_count, 2);
        assert_eq!(snap.latest_registrant, Some(2));
    }

    #[test]
    fn test_registration_on_held_lock_is_fast_path() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        assert_eq!(lock.register(&me, 1), Some(Registered::Held));
        assert_eq!(lock.snapshot().local_count, 2);
    }

    #[test]
    fn test_sticky_retake_without_cluster() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        assert_eq!(lock.unlock(&me, false), ReleaseOutcome::Drained { evicted: false });
        let snap = lock.snapshot();
        assert!(snap.lock_holder.is_none());
        assert_eq!(snap.last_holder, Some(me.clone()));

        assert_eq!(lock.register(&me, 5), Some(Registered::Held));
        let snap = lock.snapshot();
        assert_eq!(snap.lock_holder, Some(me));
        assert!(snap.last_holder.is_none());
    }

    #[test]
    fn test_requester_flow_balances_count() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        // cluster vote won
        lock.lock_for_local_node(&me);
        assert_eq!(lock.snapshot().local_count, 2);
        lock.deregister(1);
        let snap = lock.snapshot();
        assert_eq!(snap.local_count, 1);
        assert_eq!(snap.lock_holder, Some(me.clone()));

        assert_eq!(lock.unlock(&me, false), ReleaseOutcome::Drained { evicted: false });
        assert_eq!(lock.snapshot().local_count, 0);
    }

    #[test]
    fn test_unlock_by_non_holder_is_noop() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        assert_eq!(lock.unlock(&node("node-b"), false), ReleaseOutcome::Noop);
        assert_eq!(lock.snapshot().local_count, 1);
    }

    #[test]
    fn test_remove_marks_and_final_unlock_invalidates() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        lock.register(&me, 1);
        assert_eq!(lock.unlock(&me, true), ReleaseOutcome::Retained);
        assert_eq!(
            lock.unlock(&me, false),
            ReleaseOutcome::Drained { evicted: true }
        );
        assert!(lock.snapshot().invalid);
    }

    #[test]
    fn test_registration_revives_remove_marked_entry() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        lock.register(&me, 1);
        assert_eq!(lock.unlock(&me, true), ReleaseOutcome::Retained);
        // a new reference arrives before the count drains
        assert_eq!(lock.register(&me, 2), Some(Registered::Held));
        assert_eq!(lock.unlock(&me, false), ReleaseOutcome::Retained);
        assert_eq!(
            lock.unlock(&me, false),
            ReleaseOutcome::Drained { evicted: false }
        );
        assert!(!lock.snapshot().invalid);
    }

    #[test]
    fn test_register_on_invalid_entry_fails() {
        let me = node("node-a");
        let lock = SharedLock::new_held("warehouse", &me);
        assert_eq!(lock.unlock(&me, true), ReleaseOutcome::Drained { evicted: true });
        assert_eq!(lock.register(&me, 9), None);
    }

    #[test]
    fn test_waiter_inspection_transitions() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        lock.register(&me, 2);
        assert_eq!(lock.inspect(&me, 2), Inspection::Pending);

        // requester fails and deregisters: newest registrant takes over
        lock.deregister(1);
        assert_eq!(lock.inspect(&me, 2), Inspection::TakeOver);

        // grant lands: everyone is served
        lock.register(&me, 3);
        lock.lock_for_local_node(&me);
        assert_eq!(lock.inspect(&me, 2), Inspection::Granted);
    }

    #[test]
    fn test_waiter_pends_while_request_in_flight() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        lock.register(&me, 2);
        // the first registrant is still driving the cluster request, so the
        // newest waiter must not start a second one
        assert_eq!(lock.snapshot().active_request, Some(1));
        assert_eq!(lock.inspect(&me, 2), Inspection::Pending);
        assert_eq!(lock.inspect(&me, 2), Inspection::Pending);
    }

    #[test]
    fn test_takeover_claim_is_exclusive() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        lock.register(&me, 2);
        lock.register(&me, 3);
        lock.deregister(1);

        // the designee claims; everyone else keeps waiting on it
        assert_eq!(lock.inspect(&me, 3), Inspection::TakeOver);
        assert_eq!(lock.snapshot().active_request, Some(3));
        assert_eq!(lock.inspect(&me, 2), Inspection::Pending);
    }

    #[test]
    fn test_takeover_falls_back_when_designee_leaves() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        lock.register(&me, 2);
        lock.register(&me, 3);
        // the requester fails and the designee times out
        lock.deregister(1);
        lock.deregister(3);

        let snap = lock.snapshot();
        assert_eq!(snap.latest_registrant, None);
        assert_eq!(snap.active_request, None);
        // the surviving waiter still gets to drive the request
        assert_eq!(lock.inspect(&me, 2), Inspection::TakeOver);
        assert_eq!(lock.snapshot().active_request, Some(2));
    }

    #[test]
    fn test_deregister_clears_only_own_stamp() {
        let me = node("node-a");
        let lock = SharedLock::new("warehouse");
        lock.register(&me, 1);
        lock.register(&me, 2);
        lock.deregister(1);
        assert_eq!(lock.snapshot().latest_registrant, Some(2));
        lock.deregister(2);
        assert_eq!(lock.snapshot().latest_registrant, None);
    }

    #[tokio::test]
    async fn test_remote_claim_waits_for_local_drain() {
        let me = node("node-a");
        let lock = Arc::new(SharedLock::new_held("warehouse", &me));

        let claimant = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock_for_remote_node(&node("node-b"), 2_000).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!claimant.is_finished());

        assert_eq!(
            lock.unlock(&me, false),
            ReleaseOutcome::Drained { evicted: false }
        );
        claimant.await.unwrap().unwrap();
        assert!(lock.snapshot().invalid);
    }

    #[tokio::test]
    async fn test_remote_claim_times_out_against_busy_node() {
        let me = node("node-a");
        let lock = Arc::new(SharedLock::new_held("warehouse", &me));
        let err = lock
            .lock_for_remote_node(&node("node-b"), 60)
            .await
            .unwrap_err();
        match err {
            LockError::Timeout { holder, .. } => assert_eq!(holder.as_deref(), Some("node-a")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!lock.snapshot().invalid);
    }

    #[tokio::test]
    async fn test_table_grants_trivially_for_unknown_name() {
        let table = SharedLockTable::new();
        table.set_local_node(node("node-a"));
        table
            .lock_from_cluster("warehouse", &node("node-b"), 50)
            .await
            .unwrap();
        assert!(table.get("warehouse").is_none());
    }

    #[tokio::test]
    async fn test_table_evicts_entry_claimed_by_remote() {
        let me = node("node-a");
        let table = SharedLockTable::new();
        table.set_local_node(me.clone());
        let entry = table.get_or_create("warehouse");
        entry.register(&me, table.next_token());
        entry.lock_for_local_node(&me);
        entry.deregister(1);
        assert_eq!(entry.unlock(&me, false), ReleaseOutcome::Drained { evicted: false });

        table
            .lock_from_cluster("warehouse", &node("node-b"), 500)
            .await
            .unwrap();
        assert!(table.get("warehouse").is_none());
    }
}
