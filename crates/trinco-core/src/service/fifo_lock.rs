//! FIFO local mutex
//!
//! An async mutex granting strictly in arrival order, with an identified
//! caller. The caller may be a remote node: the eager policy pins the local
//! primitive on a cluster winner's behalf until it releases or departs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use trinco_api::NodeId;
use trinco_common::{LockError, deadline_after_ms, expired, remaining_duration};

use super::LocalLockHandler;

// ==================== FifoLock ====================

struct Waiter {
    id: u64,
    notify: Notify,
}

struct FifoState {
    locked: bool,
    holder: Option<NodeId>,
    queue: VecDeque<Arc<Waiter>>,
}

/// An async mutex with strict FIFO fairness.
///
/// Not reentrant: a holder that locks again queues behind everyone else and
/// times out against itself.
pub struct FifoLock {
    name: String,
    state: Mutex<FifoState>,
    waiter_seq: AtomicU64,
    closed: AtomicBool,
}

impl FifoLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FifoState {
                locked: false,
                holder: None,
                queue: VecDeque::new(),
            }),
            waiter_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> Option<NodeId> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .holder
            .clone()
    }

    pub fn waiter_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !state.locked && state.queue.is_empty()
    }

    /// Acquires for `caller`, waiting in arrival order.
    ///
    /// `timeout_ms` at or below zero waits without bound. At the deadline the
    /// head check runs once more before failing with the current holder.
    pub async fn lock(&self, caller: &NodeId, timeout_ms: i64) -> Result<(), LockError> {
        let deadline = deadline_after_ms(timeout_ms);

        let waiter = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.locked && state.queue.is_empty() {
                state.locked = true;
                state.holder = Some(caller.clone());
                return Ok(());
            }
            let waiter = Arc::new(Waiter {
                id: self.waiter_seq.fetch_add(1, Ordering::SeqCst),
                notify: Notify::new(),
            });
            state.queue.push_back(Arc::clone(&waiter));
            waiter
        };

        loop {
            if self.closed.load(Ordering::SeqCst) {
                self.abandon(&waiter);
                return Err(LockError::Interrupted(self.name.clone()));
            }

            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if !state.locked && state.queue.front().map(|w| w.id) == Some(waiter.id) {
                    state.queue.pop_front();
                    state.locked = true;
                    state.holder = Some(caller.clone());
                    return Ok(());
                }
            }

            if expired(deadline) {
                let holder = self.abandon(&waiter);
                return Err(LockError::timeout(
                    self.name.clone(),
                    holder.map(|h| h.to_string()),
                ));
            }

            // notify_one stores a permit, so a wakeup between the head check
            // and this await is not lost
            let notified = waiter.notify.notified();
            match remaining_duration(deadline) {
                None => notified.await,
                Some(left) => {
                    let _ = tokio::time::timeout(left, notified).await;
                }
            }
        }
    }

    /// Releases if `caller` is the recorded holder; anyone else is ignored.
    pub fn unlock(&self, caller: &NodeId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.locked || state.holder.as_ref() != Some(caller) {
            return false;
        }
        state.locked = false;
        state.holder = None;
        if let Some(head) = state.queue.front() {
            head.notify.notify_one();
        }
        true
    }

    /// Removes a waiter; wakes the new head if the lock is free.
    fn abandon(&self, waiter: &Arc<Waiter>) -> Option<NodeId> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queue.retain(|w| w.id != waiter.id);
        if !state.locked {
            if let Some(head) = state.queue.front() {
                head.notify.notify_one();
            }
        }
        state.holder.clone()
    }

    /// Wakes every waiter into an `Interrupted` failure.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let waiters: Vec<Arc<Waiter>> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.queue.drain(..).collect()
        };
        for waiter in waiters {
            waiter.notify.notify_one();
        }
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

// ==================== FifoLockTable ====================

/// Table of FIFO locks plus the local node identity.
///
/// The eager manager's local primitive; doubles as the engine's
/// [`LocalLockHandler`]. Entries persist for the life of the table, matching
/// the eager policy's every-node-tracks-everything model.
pub struct FifoLockTable {
    locks: DashMap<String, Arc<FifoLock>>,
    local_node: RwLock<Option<NodeId>>,
    closed: AtomicBool,
}

impl FifoLockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            local_node: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<FifoLock> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FifoLock::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<FifoLock>> {
        self.locks.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn lock_local(
        &self,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Result<(), LockError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LockError::Interrupted(name.to_string()));
        }
        self.get_or_create(name).lock(caller, timeout_ms).await
    }

    pub fn unlock_local(&self, name: &str, caller: &NodeId) -> bool {
        match self.get(name) {
            Some(lock) => lock.unlock(caller),
            None => false,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.locks.iter() {
            entry.value().close();
        }
        debug!("Fifo lock table closed");
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        for entry in self.locks.iter() {
            entry.value().open();
        }
    }
}

impl Default for FifoLockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalLockHandler for FifoLockTable {
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
        self.lock_local(name, caller, timeout_ms).await
    }

    async fn unlock_from_cluster(&self, name: &str, caller: &NodeId) {
        self.unlock_local(name, caller);
    }

    fn lock_holder(&self, name: &str) -> Option<NodeId> {
        self.get(name).and_then(|lock| lock.holder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[tokio::test]
    async fn test_uncontended_lock_is_immediate() {
        let lock = FifoLock::new("orders");
        lock.lock(&node("node-a"), 10).await.unwrap();
        assert_eq!(lock.holder(), Some(node("node-a")));
        assert!(lock.unlock(&node("node-a")));
        assert!(lock.is_idle());
    }

    #[tokio::test]
    async fn test_unlock_by_non_holder_is_ignored() {
        let lock = FifoLock::new("orders");
        lock.lock(&node("node-a"), 10).await.unwrap();
        assert!(!lock.unlock(&node("node-b")));
        assert_eq!(lock.holder(), Some(node("node-a")));
    }

    #[tokio::test]
    async fn test_timeout_names_current_holder() {
        let lock = FifoLock::new("orders");
        lock.lock(&node("node-a"), 0).await.unwrap();
        let err = lock.lock(&node("node-b"), 50).await.unwrap_err();
        match err {
            LockError::Timeout { name, holder } => {
                assert_eq!(name, "orders");
                assert_eq!(holder.as_deref(), Some("node-a"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(lock.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_not_reentrant() {
        let lock = FifoLock::new("orders");
        lock.lock(&node("node-a"), 0).await.unwrap();
        let err = lock.lock(&node("node-a"), 50).await.unwrap_err();
        match err {
            LockError::Timeout { holder, .. } => {
                assert_eq!(holder.as_deref(), Some("node-a"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_waiters_granted_in_arrival_order() {
        let lock = Arc::new(FifoLock::new("orders"));
        lock.lock(&node("starter"), 0).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for i in 0..3 {
            let task_lock = Arc::clone(&lock);
            let tx = tx.clone();
            let caller = node(&format!("node-{i}"));
            handles.push(tokio::spawn(async move {
                task_lock.lock(&caller, 0).await.unwrap();
                tx.send(caller.clone()).unwrap();
                task_lock.unlock(&caller);
            }));
            // serialize arrival so the expected order is deterministic
            while lock.waiter_count() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        lock.unlock(&node("starter"));
        for handle in handles {
            handle.await.unwrap();
        }
        let mut granted = Vec::new();
        while let Ok(id) = rx.try_recv() {
            granted.push(id);
        }
        assert_eq!(granted, vec![node("node-0"), node("node-1"), node("node-2")]);
        assert!(lock.is_idle());
    }

    #[tokio::test]
    async fn test_abandoned_head_wakes_next_waiter() {
        let lock = Arc::new(FifoLock::new("orders"));
        lock.lock(&node("starter"), 0).await.unwrap();

        let short = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock(&node("node-a"), 80).await })
        };
        while lock.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let long = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock(&node("node-b"), 5_000).await })
        };
        while lock.waiter_count() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(short.await.unwrap().is_err());
        lock.unlock(&node("starter"));
        assert!(long.await.unwrap().is_ok());
        assert_eq!(lock.holder(), Some(node("node-b")));
    }

    #[tokio::test]
    async fn test_close_interrupts_waiters() {
        let lock = Arc::new(FifoLock::new("orders"));
        lock.lock(&node("starter"), 0).await.unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock(&node("node-a"), 0).await })
        };
        while lock.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        lock.close();
        match waiter.await.unwrap() {
            Err(LockError::Interrupted(name)) => assert_eq!(name, "orders"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_table_tracks_holder_for_remote_caller() {
        let table = FifoLockTable::new();
        table.set_local_node(node("node-a"));
        table
            .lock_from_cluster("orders", &node("node-b"), 100)
            .await
            .unwrap();
        assert_eq!(
            LocalLockHandler::lock_holder(&table, "orders"),
            Some(node("node-b"))
        );
        table.unlock_from_cluster("orders", &node("node-b")).await;
        assert_eq!(LocalLockHandler::lock_holder(&table, "orders"), None);
    }

    #[tokio::test]
    async fn test_closed_table_refuses_lock() {
        let table = FifoLockTable::new();
        table.close();
        let err = table
            .lock_local("orders", &node("node-a"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Interrupted(_)));
        table.open();
        assert!(table.lock_local("orders", &node("node-a"), 10).await.is_ok());
    }
}
