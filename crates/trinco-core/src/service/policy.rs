//! Ownership policies
//!
//! The engine drives one negotiation algorithm; what a won vote, a vote
//! against a held lock, or a release mean for the local books is policy.
//! [`StrictPolicy`] tracks every lock on every node eagerly and never yields;
//! [`YieldingPolicy`] keeps state only on the owning node and relinquishes
//! ownership when locally idle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trinco_api::{NodeId, VoteResponse};
use trinco_common::LockError;

use super::engine::ClusterLockEngine;
use super::state::LockState;
use crate::metrics;

/// The policy seam between the engine and a node's local bookkeeping.
///
/// Hooks receive the engine so they can reach its state table, owner index,
/// and local primitive handler.
#[async_trait]
pub trait OwnershipPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolves the tracking entry a vote dispatches on. `None` routes the
    /// vote to [`on_unknown_lock`].
    ///
    /// [`on_unknown_lock`]: OwnershipPolicy::on_unknown_lock
    fn lookup(&self, engine: &ClusterLockEngine, name: &str) -> Option<Arc<LockState>>;

    /// The local primitive was acquired on `caller`'s behalf; record the
    /// outcome and answer the vote.
    async fn on_local_acquired(
        &self,
        engine: &ClusterLockEngine,
        state: &Arc<LockState>,
        caller: &NodeId,
    ) -> VoteResponse;

    /// A vote arrived while the lock is held here.
    async fn on_yield_request(
        &self,
        engine: &ClusterLockEngine,
        state: &Arc<LockState>,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse;

    /// A vote arrived for a name this node does not track.
    async fn on_unknown_lock(
        &self,
        engine: &ClusterLockEngine,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse;

    /// The recorded holder released; decide what happens to the entry.
    async fn on_released(&self, engine: &ClusterLockEngine, name: &str, state: &Arc<LockState>);
}

// ==================== StrictPolicy ====================

/// Eager single-holder policy: every node tracks every lock, remote grants
/// pin the local primitive on the caller's behalf, and a held lock is never
/// yielded.
pub struct StrictPolicy;

#[async_trait]
impl OwnershipPolicy for StrictPolicy {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn lookup(&self, engine: &ClusterLockEngine, name: &str) -> Option<Arc<LockState>> {
        Some(engine.get_or_create_state(name))
    }

    async fn on_local_acquired(
        &self,
        engine: &ClusterLockEngine,
        state: &Arc<LockState>,
        caller: &NodeId,
    ) -> VoteResponse {
        let me = engine.local_node();
        if state.complete(caller) {
            if caller != &me {
                engine.record_owner(caller, state.name());
            }
            VoteResponse::ok(me)
        } else {
            // invalidated underneath the grant; give the primitive back
            engine.handler().unlock_from_cluster(state.name(), caller).await;
            engine.discard_entry(state.name(), state);
            VoteResponse::fail(me, None)
        }
    }

    async fn on_yield_request(
        &self,
        engine: &ClusterLockEngine,
        _state: &Arc<LockState>,
        _caller: &NodeId,
        _timeout_ms: i64,
    ) -> VoteResponse {
        VoteResponse::reject(engine.local_node())
    }

    async fn on_unknown_lock(
        &self,
        engine: &ClusterLockEngine,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse {
        // lookup creates, so this only runs on a lost entry race; an
        // untracked lock is trivially grantable
        direct_grant(engine, name, caller, timeout_ms).await
    }

    async fn on_released(
        &self,
        _engine: &ClusterLockEngine,
        _name: &str,
        _state: &Arc<LockState>,
    ) {
        // the entry stays, back at Unlocked
    }
}

// ==================== YieldingPolicy ====================

/// Lazy single-holder policy: lock state lives only on the owning node,
/// first owners are granted directly, and a held lock is yielded once the
/// node has no local interest.
pub struct YieldingPolicy;

#[async_trait]
impl OwnershipPolicy for YieldingPolicy {
    fn name(&self) -> &'static str {
        "yielding"
    }

    fn lookup(&self, engine: &ClusterLockEngine, name: &str) -> Option<Arc<LockState>> {
        engine.state_of(name)
    }

    async fn on_local_acquired(
        &self,
        engine: &ClusterLockEngine,
        state: &Arc<LockState>,
        caller: &NodeId,
    ) -> VoteResponse {
        let me = engine.local_node();
        if caller == &me {
            if state.complete(caller) {
                VoteResponse::ok(me)
            } else {
                engine.handler().unlock_from_cluster(state.name(), caller).await;
                engine.discard_entry(state.name(), state);
                VoteResponse::fail(me, None)
            }
        } else {
            // this node is not the true holder; the entry leaves with the
            // grant and the caller tracks it from now on
            state.invalidate();
            engine.discard_entry(state.name(), state);
            VoteResponse::ok(me)
        }
    }

    async fn on_yield_request(
        &self,
        engine: &ClusterLockEngine,
        state: &Arc<LockState>,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse {
        let me = engine.local_node();
        if state.holder().as_ref() != Some(&me) {
            return VoteResponse::reject(me);
        }
        match engine.handler().lock_from_cluster(state.name(), caller, timeout_ms).await {
            Ok(()) => {
                state.invalidate();
                engine.discard_entry(state.name(), state);
                metrics::record_yield_grant(engine.service());
                debug!(name = state.name(), caller = %caller, "Yielded lock to requesting peer");
                VoteResponse::ok(me)
            }
            Err(err) => {
                let holder = holder_from_error(&err).or_else(|| Some(me.clone()));
                VoteResponse::fail(me, holder)
            }
        }
    }

    async fn on_unknown_lock(
        &self,
        engine: &ClusterLockEngine,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse {
        // lazy first-owner semantics: nothing tracked means the caller may
        // have it if the primitive agrees
        direct_grant(engine, name, caller, timeout_ms).await
    }

    async fn on_released(&self, engine: &ClusterLockEngine, name: &str, state: &Arc<LockState>) {
        // a free entry is never kept; absence means "ask again from scratch"
        state.invalidate();
        engine.discard_entry(name, state);
    }
}

/// Attempt the local primitive on the caller's behalf with no tracking entry
/// in play.
async fn direct_grant(
    engine: &ClusterLockEngine,
    name: &str,
    caller: &NodeId,
    timeout_ms: i64,
) -> VoteResponse {
    let me = engine.local_node();
    match engine.handler().lock_from_cluster(name, caller, timeout_ms).await {
        Ok(()) => VoteResponse::ok(me),
        Err(err) => {
            let holder = holder_from_error(&err).or_else(|| engine.handler().lock_holder(name));
            VoteResponse::fail(me, holder)
        }
    }
}

fn holder_from_error(err: &LockError) -> Option<NodeId> {
    match err {
        LockError::Timeout { holder, .. } => holder.as_deref().map(NodeId::from),
        _ => None,
    }
}
