//! Cluster channel abstraction
//!
//! The engine reaches its peers through [`ClusterChannel`]: a membership view
//! plus the two lock RPCs, scoped by service name so several engines can
//! share one channel. Real transports and failure detection live outside;
//! [`local`] provides the in-process implementation used for embedding and
//! tests.

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use trinco_api::{MembershipView, NodeId, ViewChange, VoteResponse};

/// Channel-level failures, reported per peer in broadcast results.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("node '{0}' is unreachable")]
    NodeUnreachable(String),

    #[error("node '{0}' exposes no service '{1}'")]
    ServiceMissing(String, String),

    #[error("request to node '{0}' timed out")]
    Timeout(String),

    #[error("release not delivered to {nodes:?}")]
    Undelivered { nodes: Vec<String> },

    #[error("channel is closed")]
    Closed,
}

/// Receiving side of the two lock RPCs.
///
/// Implemented by a delegation object holding the engine and registered on
/// the channel under the engine's service name.
#[async_trait]
pub trait LockRpcTarget: Send + Sync {
    /// Vote on (and possibly locally grant) a lock bid by `caller`.
    async fn remote_lock(&self, name: &str, caller: &NodeId, timeout_ms: i64) -> VoteResponse;

    /// `caller` no longer bids for or holds the lock.
    async fn release_remote_lock(&self, name: &str, caller: &NodeId);
}

/// Observer of membership transitions.
#[async_trait]
pub trait MembershipListener: Send + Sync {
    async fn on_view_change(&self, event: &ViewChange);
}

/// Membership view plus RPC fan-out.
#[async_trait]
pub trait ClusterChannel: Send + Sync {
    /// Identity of this endpoint.
    fn local_node(&self) -> NodeId;

    /// Current membership in tie-break order.
    fn view(&self) -> MembershipView;

    async fn register_target(
        &self,
        service: &str,
        target: Arc<dyn LockRpcTarget>,
    ) -> Result<(), ChannelError>;

    async fn unregister_target(&self, service: &str);

    /// Returns a token for [`unregister_membership_listener`].
    ///
    /// [`unregister_membership_listener`]: ClusterChannel::unregister_membership_listener
    async fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> u64;

    async fn unregister_membership_listener(&self, token: u64);

    /// Sends a lock vote to every peer, returning one result per peer.
    async fn broadcast_lock(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> Vec<(NodeId, Result<VoteResponse, ChannelError>)>;

    /// Tells every peer that `caller` abandoned or released the lock.
    async fn broadcast_release(
        &self,
        service: &str,
        name: &str,
        caller: &NodeId,
    ) -> Result<(), ChannelError>;
}
