//! Shared helpers for integration tests: cluster builders and a counting
//! channel decorator for traffic assertions.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use trinco_api::{MembershipView, NodeId, ViewChange, VoteResponse};
use trinco_core::channel::{ChannelError, ClusterChannel, LockRpcTarget, MembershipListener};
use trinco_core::{ExclusiveLockManager, LocalCluster, SharedLockManager};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trinco_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

/// Joins `id` to the hub and starts an exclusive manager on it.
pub async fn exclusive_node(hub: &LocalCluster, id: &str) -> ExclusiveLockManager {
    let channel = hub.join(node(id)).await;
    let manager = ExclusiveLockManager::new(channel);
    manager.start().await.unwrap();
    manager
}

/// Joins `id` to the hub and starts a shared manager on it.
pub async fn shared_node(hub: &LocalCluster, id: &str) -> SharedLockManager {
    let channel = hub.join(node(id)).await;
    let manager = SharedLockManager::new(channel);
    manager.start().await.unwrap();
    manager
}

/// Channel decorator counting outbound vote broadcasts.
pub struct CountingChannel {
    inner: Arc<dyn ClusterChannel>,
    lock_broadcasts: AtomicUsize,
    release_broadcasts: AtomicUsize,
}

impl CountingChannel {
    pub fn new(inner: Arc<dyn ClusterChannel>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            lock_broadcasts: AtomicUsize::new(0),
            release_broadcasts: AtomicUsize::new(0),
        })
    }

    pub fn lock_broadcasts(&self) -> usize {
        self.lock_broadcasts.load(Ordering::SeqCst)
    }

    pub fn release_broadcasts(&self) -> usize {
        self.release_broadcasts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterChannel for CountingChannel {
    fn local_node(&self) -> NodeId {
        self.inner.local_node()
    }

    fn view(&self) -> MembershipView {
        self.inner.view()
    }

    async fn register_target(
        &self,
        service: &str,
        target: Arc<dyn LockRpcTarget>,
    ) -> Result<(), ChannelError> {
        self.inner.register_target(service, target).await
    }

    async fn unregister_target(&self, service: &str) {
        self.inner.unregister_target(service).await;
    }

    async fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> u64 {
        self.inner.register_membership_listener(listener).await
    }

    async fn unregister_membership_listener(&self, token: u64) {
        self.inner.unregister_membership_listener(token).await;
    }

    async fn broadcast_lock(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Vec<(NodeId, Result<VoteResponse, ChannelError>)> {
        self.lock_broadcasts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .broadcast_lock(service, name, caller, timeout_ms)
            .await
    }

    async fn broadcast_release(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
    ) -> Result<(), ChannelError> {
        self.release_broadcasts.fetch_add(1, Ordering::SeqCst);
        self.inner.broadcast_release(service, name, caller).await
    }
}

/// Keep `event` importable without every test naming trinco-api directly.
pub fn departure_event(dead: &NodeId, remaining: &[NodeId]) -> ViewChange {
    ViewChange::new(
        vec![dead.clone()],
        Vec::new(),
        MembershipView::new(remaining.to_vec()),
    )
}
