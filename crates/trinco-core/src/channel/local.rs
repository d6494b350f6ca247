//! In-process cluster channel
//!
//! A hub carrying any number of in-process nodes: standalone deployments,
//! embedding, and multi-node tests. Joining yields a per-node channel; view
//! order is join order. `fail` simulates a crash by removing the node's
//! slot and notifying the survivors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use trinco_api::{MembershipView, NodeId, ViewChange, VoteResponse};

use super::{ChannelError, ClusterChannel, LockRpcTarget, MembershipListener};

/// Configuration for the in-process channel
#[derive(Clone, Debug)]
pub struct LocalChannelConfig {
    /// Per-call cap applied when a request carries no bounded budget
    pub request_timeout: Duration,
    /// Artificial latency before delivering each call; widens race windows
    /// in tests
    pub delivery_delay: Duration,
}

impl Default for LocalChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            delivery_delay: Duration::ZERO,
        }
    }
}

impl LocalChannelConfig {
    /// Create a LocalChannelConfig from application Configuration
    pub fn from_configuration(config: &crate::model::Configuration) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.channel_request_timeout_ms()),
            delivery_delay: Duration::from_millis(config.channel_delivery_delay_ms()),
        }
    }
}

struct NodeSlot {
    node: NodeId,
    targets: DashMap<String, Arc<dyn LockRpcTarget>>,
    listeners: DashMap<u64, Arc<dyn MembershipListener>>,
}

impl NodeSlot {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            targets: DashMap::new(),
            listeners: DashMap::new(),
        }
    }
}

struct HubInner {
    config: LocalChannelConfig,
    /// Join order; doubles as the tie-break order of the view
    members: RwLock<Vec<NodeId>>,
    slots: DashMap<NodeId, Arc<NodeSlot>>,
    listener_seq: AtomicU64,
}

impl HubInner {
    fn view(&self) -> MembershipView {
        MembershipView::new(
            self.members
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        )
    }

    async fn fan_view_change(&self, event: ViewChange) {
        let listeners: Vec<Arc<dyn MembershipListener>> = self
            .slots
            .iter()
            .flat_map(|slot| {
                slot.value()
                    .listeners
                    .iter()
                    .map(|l| Arc::clone(l.value()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for listener in listeners {
            listener.on_view_change(&event).await;
        }
    }
}

/// The hub shared by all in-process nodes.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<HubInner>,
}

impl LocalCluster {
    pub fn new(config: LocalChannelConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                members: RwLock::new(Vec::new()),
                slots: DashMap::new(),
                listener_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Adds `node` to the view and returns its channel endpoint. Rejoining
    /// an existing identity returns a fresh endpoint on the same slot.
    pub async fn join(&self, node: NodeId) -> Arc<LocalClusterChannel> {
        let slot = self
            .inner
            .slots
            .entry(node.clone())
            .or_insert_with(|| Arc::new(NodeSlot::new(node.clone())))
            .clone();
        let joined = {
            let mut members = self
                .inner
                .members
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if members.contains(&node) {
                false
            } else {
                members.push(node.clone());
                true
            }
        };
        if joined {
            info!(node = %node, "Node joined local cluster");
            self.inner
                .fan_view_change(ViewChange::new(
                    Vec::new(),
                    vec![node.clone()],
                    self.inner.view(),
                ))
                .await;
        }
        Arc::new(LocalClusterChannel {
            hub: Arc::clone(&self.inner),
            slot,
        })
    }

    /// Removes `node` as a crash would: its targets stop being reachable and
    /// the survivors get a departure event.
    pub async fn fail(&self, node: &NodeId) {
        let removed = {
            let mut members = self
                .inner
                .members
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let before = members.len();
            members.retain(|m| m != node);
            members.len() != before
        };
        self.inner.slots.remove(node);
        if removed {
            info!(node = %node, "Node failed out of local cluster");
            self.inner
                .fan_view_change(ViewChange::new(
                    vec![node.clone()],
                    Vec::new(),
                    self.inner.view(),
                ))
                .await;
        }
    }

    pub fn view(&self) -> MembershipView {
        self.inner.view()
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new(LocalChannelConfig::default())
    }
}

/// One node's endpoint on a [`LocalCluster`].
pub struct LocalClusterChannel {
    hub: Arc<HubInner>,
    slot: Arc<NodeSlot>,
}

impl LocalClusterChannel {
    fn per_call_timeout(&self, timeout_ms: i64) -> Duration {
        if timeout_ms > 0 {
            Duration::from_millis(timeout_ms as u64)
        } else {
            self.hub.config.request_timeout
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.hub
            .view()
            .others(&self.slot.node)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ClusterChannel for LocalClusterChannel {
    fn local_node(&self) -> NodeId {
        self.slot.node.clone()
    }

    fn view(&self) -> MembershipView {
        self.hub.view()
    }

    async fn register_target(
        &self,
        service: &str,
        target: Arc<dyn LockRpcTarget>,
    ) -> Result<(), ChannelError> {
        if !self.hub.slots.contains_key(&self.slot.node) {
            return Err(ChannelError::Closed);
        }
        self.slot.targets.insert(service.to_string(), target);
        debug!(node = %self.slot.node, service, "Registered lock RPC target");
        Ok(())
    }

    async fn unregister_target(&self, service: &str) {
        self.slot.targets.remove(service);
    }

    async fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> u64 {
        let token = self.hub.listener_seq.fetch_add(1, Ordering::SeqCst);
        self.slot.listeners.insert(token, listener);
        token
    }

    async fn unregister_membership_listener(&self, token: u64) {
        self.slot.listeners.remove(&token);
    }

    async fn broadcast_lock(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Vec<(NodeId, Result<VoteResponse, ChannelError>)> {
        let per_call = self.per_call_timeout(timeout_ms);
        let delay = self.hub.config.delivery_delay;
        let mut handles = Vec::new();

        for peer in self.peers() {
            let hub = Arc::clone(&self.hub);
            let service = service.to_string();
            let name = name.to_string();
            let caller = caller.clone();

            let handle = tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let target = match hub.slots.get(&peer) {
                    None => {
                        return (peer.clone(), Err(ChannelError::NodeUnreachable(peer.to_string())));
                    }
                    Some(slot) => match slot.targets.get(&service) {
                        None => {
                            return (
                                peer.clone(),
                                Err(ChannelError::ServiceMissing(peer.to_string(), service)),
                            );
                        }
                        Some(target) => Arc::clone(target.value()),
                    },
                };
                let result =
                    tokio::time::timeout(per_call, target.remote_lock(&name, &caller, timeout_ms))
                        .await
                        .map_err(|_| ChannelError::Timeout(peer.to_string()));
                (peer, result)
            });
            handles.push(handle);
        }

        let mut results = Vec::new();
        for handle in handles {
            if let Ok(result) = handle.await {
                results.push(result);
            }
        }
        results
    }

    async fn broadcast_release(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
    ) -> Result<(), ChannelError> {
        let per_call = self.hub.config.request_timeout;
        let delay = self.hub.config.delivery_delay;
        let mut handles = Vec::new();

        for peer in self.peers() {
            let hub = Arc::clone(&self.hub);
            let service = service.to_string();
            let name = name.to_string();
            let caller = caller.clone();

            let handle = tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let target = hub
                    .slots
                    .get(&peer)
                    .and_then(|slot| slot.targets.get(&service).map(|t| Arc::clone(t.value())));
                match target {
                    // a peer without the service holds nothing to release
                    None => Ok(peer),
                    Some(target) => {
                        match tokio::time::timeout(
                            per_call,
                            target.release_remote_lock(&name, &caller),
                        )
                        .await
                        {
                            Ok(()) => Ok(peer),
                            Err(_) => Err(peer),
                        }
                    }
                }
            });
            handles.push(handle);
        }

        let mut undelivered = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(peer)) => undelivered.push(peer.to_string()),
                Err(_) => {}
            }
        }
        if undelivered.is_empty() {
            Ok(())
        } else {
            Err(ChannelError::Undelivered { nodes: undelivered })
        }
    }
}
