//! Cluster lock negotiation engine
//!
//! One engine per composition manager, scoped by a service name on a shared
//! [`ClusterChannel`]. Acquisition collects a unanimous vote from the current
//! view, then takes the local primitive; any refusal rolls the round back
//! with a release broadcast and retries after a backoff that defers longer
//! to higher-ranked rivals. Incoming votes dispatch on the per-name state
//! machine; what they mean for the local books is decided by the injected
//! [`OwnershipPolicy`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use trinco_api::{MembershipView, NodeId, ViewChange, VoteFlag, VoteResponse};
use trinco_common::{LockError, deadline_after, expired, remaining_duration, remaining_ms};

use super::LocalLockHandler;
use super::policy::OwnershipPolicy;
use super::state::{LockState, LockStatus};
use crate::channel::{ClusterChannel, LockRpcTarget, MembershipListener};
use crate::metrics;

/// A vote re-dispatches when it observes a dying entry; stale instances are
/// discarded each pass, so this bound is never reached in practice.
const MAX_VOTE_DISPATCH: usize = 8;

/// Engine tuning knobs
#[derive(Clone, Debug)]
pub struct LockEngineConfig {
    /// Per-call vote timeout used when the caller's own budget is unbounded
    pub vote_timeout: Duration,
}

impl Default for LockEngineConfig {
    fn default() -> Self {
        Self {
            vote_timeout: Duration::from_secs(5),
        }
    }
}

impl LockEngineConfig {
    /// Create a LockEngineConfig from application Configuration
    pub fn from_configuration(config: &crate::model::Configuration) -> Self {
        Self {
            vote_timeout: Duration::from_millis(config.lock_vote_timeout_ms()),
        }
    }
}

struct EngineInner {
    service: String,
    channel: Arc<dyn ClusterChannel>,
    handler: Arc<dyn LocalLockHandler>,
    policy: Box<dyn OwnershipPolicy>,
    config: LockEngineConfig,
    states: DashMap<String, Arc<LockState>>,
    /// Remote node -> lock names it is recorded as holding locally here
    owner_index: DashMap<NodeId, HashSet<String>>,
    view: RwLock<MembershipView>,
    started: AtomicBool,
    listener_token: Mutex<Option<u64>>,
}

/// The negotiation engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ClusterLockEngine {
    inner: Arc<EngineInner>,
}

impl ClusterLockEngine {
    pub fn new(
        service: impl Into<String>,
        channel: Arc<dyn ClusterChannel>,
        handler: Arc<dyn LocalLockHandler>,
        policy: Box<dyn OwnershipPolicy>,
        config: LockEngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                service: service.into(),
                channel,
                handler,
                policy,
                config,
                states: DashMap::new(),
                owner_index: DashMap::new(),
                view: RwLock::new(MembershipView::default()),
                started: AtomicBool::new(false),
                listener_token: Mutex::new(None),
            }),
        }
    }

    // ==================== lifecycle ====================

    /// Binds the local node identity, seeds the cached view, and registers
    /// the RPC target and the membership listener.
    pub async fn start(&self) -> Result<(), LockError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let me = self.inner.channel.local_node();
        self.inner.handler.set_local_node(me.clone());
        *self.inner.view.write().unwrap_or_else(|e| e.into_inner()) = self.inner.channel.view();

        self.inner
            .channel
            .register_target(&self.inner.service, Arc::new(EngineRpcTarget(self.clone())))
            .await
            .map_err(|e| LockError::Channel(e.to_string()))?;
        let token = self
            .inner
            .channel
            .register_membership_listener(Arc::new(EngineViewListener(self.clone())))
            .await;
        *self
            .inner
            .listener_token
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(token);

        info!(service = %self.inner.service, node = %me, policy = self.inner.policy.name(),
            "Lock engine started");
        Ok(())
    }

    /// Unregisters from the channel and synthesizes an "all members
    /// departed" view change to release remote bookkeeping. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.channel.unregister_target(&self.inner.service).await;
        let token = self
            .inner
            .listener_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            self.inner.channel.unregister_membership_listener(token).await;
        }

        let departed = self.view().members().to_vec();
        self.on_view_change(&ViewChange::new(departed, Vec::new(), MembershipView::default()))
            .await;
        info!(service = %self.inner.service, "Lock engine stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    // ==================== acquisition ====================

    /// Acquires `name` cluster-wide within `timeout` (`Duration::ZERO` waits
    /// without bound).
    pub async fn lock(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        if !self.is_started() {
            return Err(LockError::NotStarted);
        }
        let me = self.local_node();
        let deadline = deadline_after(timeout);
        let started_at = Instant::now();
        let mut last_holder: Option<NodeId> = None;

        loop {
            let mut superior_seen = false;
            let state = self.get_or_create_state(name);
            if state.is_invalid() {
                self.discard_entry(name, &state);
                continue;
            }

            if state.begin_remote_bid() {
                match self
                    .run_round(name, &state, &me, deadline, &mut superior_seen, &mut last_holder)
                    .await?
                {
                    RoundOutcome::Granted => {
                        metrics::record_round(&self.inner.service, "granted");
                        metrics::record_acquired(
                            &self.inner.service,
                            started_at.elapsed().as_secs_f64(),
                        );
                        debug!(service = %self.inner.service, name, node = %me, "Lock acquired");
                        return Ok(());
                    }
                    RoundOutcome::Interrupted => {
                        return Err(LockError::Interrupted(name.to_string()));
                    }
                    RoundOutcome::Retry => {
                        metrics::record_round(&self.inner.service, "retry");
                    }
                }
            } else {
                // someone is already bidding or holding here
                metrics::record_round(&self.inner.service, "contended");
                if let Some(holder) = state.holder() {
                    if holder != me && self.view().is_superior(&holder, &me) {
                        superior_seen = true;
                    }
                    last_holder = Some(holder);
                }
            }

            if expired(deadline) {
                metrics::record_timeout(&self.inner.service);
                return Err(LockError::timeout(
                    name,
                    last_holder.map(|h| h.to_string()),
                ));
            }
            let backoff = compute_backoff(timeout, remaining_duration(deadline), superior_seen);
            tokio::time::sleep(backoff).await;
            if !self.is_started() {
                return Err(LockError::Interrupted(name.to_string()));
            }
        }
    }

    /// One bid round: vote collection, local acquisition, rollback on any
    /// failure. The caller owns the `RemoteLocking` transition.
    async fn run_round(
        &self,
        name: &str,
        state: &Arc<LockState>,
        me: &NodeId,
        deadline: Option<Instant>,
        superior_seen: &mut bool,
        last_holder: &mut Option<NodeId>,
    ) -> Result<RoundOutcome, LockError> {
        let view = self.view();
        let peers: Vec<NodeId> = view.others(me).cloned().collect();
        let mut approved = true;

        if !peers.is_empty() {
            let per_call_ms = match deadline {
                Some(_) => remaining_ms(deadline),
                None => self.inner.config.vote_timeout.as_millis() as i64,
            };
            let results = self
                .inner
                .channel
                .broadcast_lock(&self.inner.service, name, me, per_call_ms)
                .await;
            for (peer, outcome) in results {
                match outcome {
                    Ok(vote) if vote.is_ok() => {}
                    Ok(vote) => {
                        approved = false;
                        debug!(service = %self.inner.service, name, peer = %peer,
                            flag = ?vote.flag, "Vote refused");
                        if let Some(holder) = vote.holder {
                            if view.is_superior(&holder, me) {
                                *superior_seen = true;
                            }
                            *last_holder = Some(holder);
                        }
                    }
                    Err(err) => {
                        approved = false;
                        debug!(service = %self.inner.service, name, peer = %peer,
                            error = %err, "Vote not delivered");
                    }
                }
            }
        }

        if approved && state.begin_local_bid() {
            match self
                .inner
                .handler
                .lock_from_cluster(name, me, remaining_ms(deadline))
                .await
            {
                Ok(()) => {
                    let vote = self.inner.policy.on_local_acquired(self, state, me).await;
                    if vote.is_ok() {
                        return Ok(RoundOutcome::Granted);
                    }
                    // invalidated underneath; the policy already gave the
                    // primitive back
                }
                Err(LockError::Interrupted(_)) => {
                    self.rollback(name, state, !peers.is_empty()).await?;
                    return Ok(RoundOutcome::Interrupted);
                }
                Err(LockError::Timeout { holder, .. }) => {
                    if let Some(holder) = holder {
                        *last_holder = Some(NodeId::from(holder));
                    }
                }
                Err(other) => {
                    self.rollback(name, state, !peers.is_empty()).await?;
                    return Err(other);
                }
            }
        }

        self.rollback(name, state, !peers.is_empty()).await?;
        Ok(RoundOutcome::Retry)
    }

    /// Unwinds a failed round: the bid states revert and, when votes were
    /// sent, peers are told to drop any grant they made for it.
    async fn rollback(
        &self,
        name: &str,
        state: &Arc<LockState>,
        notified_peers: bool,
    ) -> Result<(), LockError> {
        state.revert_bid();
        if notified_peers {
            let me = self.local_node();
            if let Err(err) = self
                .inner
                .channel
                .broadcast_release(&self.inner.service, name, &me)
                .await
            {
                warn!(service = %self.inner.service, name, error = %err,
                    "Rollback release broadcast failed; peers may hold a stale grant");
                return Err(LockError::remote_cleanup(name, err.to_string()));
            }
        }
        Ok(())
    }

    /// Releases `name` if the local node is the recorded holder; anything
    /// else is a silent no-op.
    pub async fn unlock(&self, name: &str) -> Result<(), LockError> {
        if !self.is_started() {
            return Err(LockError::NotStarted);
        }
        let me = self.local_node();
        let Some(state) = self.state_of(name) else {
            return Ok(());
        };
        if state.holder().as_ref() != Some(&me) {
            return Ok(());
        }
        self.inner.handler.unlock_from_cluster(name, &me).await;
        if state.release(&me) {
            self.inner.policy.on_released(self, name, &state).await;
            debug!(service = %self.inner.service, name, node = %me, "Lock released");
            let peers_exist = {
                let view = self.view();
                view.others(&me).next().is_some()
            };
            if peers_exist {
                self.inner
                    .channel
                    .broadcast_release(&self.inner.service, name, &me)
                    .await
                    .map_err(|e| LockError::remote_cleanup(name, e.to_string()))?;
            }
        }
        Ok(())
    }

    // ==================== vote handling ====================

    /// Answers a `remoteLock` vote from `caller`.
    pub async fn handle_remote_lock(
        &self,
        name: &str,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse {
        let me = self.local_node();
        if caller == &me {
            // retry artifact of our own bid
            return VoteResponse::ok(me);
        }

        for _ in 0..MAX_VOTE_DISPATCH {
            let Some(state) = self.inner.policy.lookup(self, name) else {
                let vote = self
                    .inner
                    .policy
                    .on_unknown_lock(self, name, caller, timeout_ms)
                    .await;
                metrics::record_vote_served(&self.inner.service, flag_label(vote.flag));
                return vote;
            };

            let vote = match state.status() {
                LockStatus::Invalid => {
                    self.discard_entry(name, &state);
                    continue;
                }
                LockStatus::Unlocked => {
                    if !state.begin_local_grant() {
                        continue;
                    }
                    self.grant_locally(&state, caller, timeout_ms).await
                }
                LockStatus::RemoteLocking => {
                    if !self.view().is_superior(caller, &me) {
                        // self wins the race
                        VoteResponse::reject(me.clone())
                    } else if !state.begin_local_bid() {
                        continue;
                    } else {
                        // a superior rival; yield the race and grant for it
                        debug!(service = %self.inner.service, name, caller = %caller,
                            "Yielding in-flight bid to superior caller");
                        self.grant_locally(&state, caller, timeout_ms).await
                    }
                }
                // past the point of no return
                LockStatus::LocalLocking => VoteResponse::reject(me.clone()),
                LockStatus::Locked => {
                    self.inner
                        .policy
                        .on_yield_request(self, &state, caller, timeout_ms)
                        .await
                }
            };
            metrics::record_vote_served(&self.inner.service, flag_label(vote.flag));
            return vote;
        }

        metrics::record_vote_served(&self.inner.service, "reject");
        VoteResponse::reject(me)
    }

    /// The caller owns a `LocalLocking` transition; acquire the primitive on
    /// its behalf and let the policy record the outcome.
    async fn grant_locally(
        &self,
        state: &Arc<LockState>,
        caller: &NodeId,
        timeout_ms: i64,
    ) -> VoteResponse {
        match self
            .inner
            .handler
            .lock_from_cluster(state.name(), caller, timeout_ms)
            .await
        {
            Ok(()) => self.inner.policy.on_local_acquired(self, state, caller).await,
            Err(err) => {
                state.revert_bid();
                let holder = match &err {
                    LockError::Timeout { holder, .. } => holder.as_deref().map(NodeId::from),
                    _ => None,
                }
                .or_else(|| self.inner.handler.lock_holder(state.name()));
                VoteResponse::fail(self.local_node(), holder)
            }
        }
    }

    /// Handles a `releaseRemoteLock` from `caller`: drops any grant recorded
    /// for it. Unknown names and foreign holders are ignored.
    pub async fn handle_release(&self, name: &str, caller: &NodeId) {
        let Some(state) = self.state_of(name) else {
            return;
        };
        if state.status() == LockStatus::Locked && state.holder().as_ref() == Some(caller) {
            self.inner.handler.unlock_from_cluster(name, caller).await;
            if state.release(caller) {
                self.clear_owner(caller, name);
                self.inner.policy.on_released(self, name, &state).await;
                debug!(service = %self.inner.service, name, caller = %caller,
                    "Remote grant released");
            }
        }
    }

    // ==================== membership ====================

    /// Replaces the cached view and releases every lock recorded for a node
    /// no longer in it. Idempotent; also the `stop()` teardown path.
    pub async fn on_view_change(&self, event: &ViewChange) {
        *self.inner.view.write().unwrap_or_else(|e| e.into_inner()) = event.view.clone();

        let departed: Vec<NodeId> = self
            .inner
            .owner_index
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|node| !event.view.contains(node))
            .collect();
        let mut released = 0u64;
        for node in departed {
            let Some((_, names)) = self.inner.owner_index.remove(&node) else {
                continue;
            };
            info!(service = %self.inner.service, node = %node, locks = names.len(),
                "Releasing locks of departed member");
            for name in names {
                self.handle_release(&name, &node).await;
                released += 1;
            }
        }
        if released > 0 {
            metrics::record_view_cleanup_releases(&self.inner.service, released);
        }
    }

    // ==================== accessors ====================

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn local_node(&self) -> NodeId {
        self.inner.channel.local_node()
    }

    pub fn view(&self) -> MembershipView {
        self.inner
            .view
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn status_of(&self, name: &str) -> Option<LockStatus> {
        self.state_of(name).map(|state| state.status())
    }

    pub fn holder_of(&self, name: &str) -> Option<NodeId> {
        self.state_of(name).and_then(|state| state.holder())
    }

    pub(crate) fn handler(&self) -> &Arc<dyn LocalLockHandler> {
        &self.inner.handler
    }

    pub(crate) fn get_or_create_state(&self, name: &str) -> Arc<LockState> {
        self.inner
            .states
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LockState::new(name)))
            .clone()
    }

    pub(crate) fn state_of(&self, name: &str) -> Option<Arc<LockState>> {
        self.inner
            .states
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the mapped entry only if it is still this instance.
    pub(crate) fn discard_entry(&self, name: &str, state: &Arc<LockState>) {
        self.inner
            .states
            .remove_if(name, |_, current| Arc::ptr_eq(current, state));
    }

    pub(crate) fn record_owner(&self, owner: &NodeId, name: &str) {
        self.inner
            .owner_index
            .entry(owner.clone())
            .or_default()
            .insert(name.to_string());
    }

    pub(crate) fn clear_owner(&self, owner: &NodeId, name: &str) {
        if let Some(mut names) = self.inner.owner_index.get_mut(owner) {
            names.remove(name);
        }
        self.inner
            .owner_index
            .remove_if(owner, |_, names| names.is_empty());
    }
}

enum RoundOutcome {
    Granted,
    Retry,
    Interrupted,
}

fn flag_label(flag: VoteFlag) -> &'static str {
    match flag {
        VoteFlag::Ok => "ok",
        VoteFlag::Fail => "fail",
        VoteFlag::Reject => "reject",
    }
}

/// Inter-round backoff.
///
/// Inside the caller's final window the sleep is exactly what is left, so
/// the timeout lands at the loop head. Otherwise the sleep defers longer
/// (250ms cap) to a higher-ranked rival seen this round, shorter (100ms cap)
/// to transient obstruction.
pub(crate) fn compute_backoff(
    total: Duration,
    remaining: Option<Duration>,
    superior_seen: bool,
) -> Duration {
    let cap = if superior_seen {
        Duration::from_millis(250)
    } else {
        Duration::from_millis(100)
    };
    match remaining {
        None => cap,
        Some(remain) => {
            let final_window = (total / 5).min(Duration::from_millis(15));
            if remain < final_window {
                remain
            } else {
                cap.min(remain / 3)
            }
        }
    }
}

// ==================== channel delegation ====================

/// Exposes exactly the two RPC entry points, delegating to the engine.
struct EngineRpcTarget(ClusterLockEngine);

#[async_trait]
impl LockRpcTarget for EngineRpcTarget {
    async fn remote_lock(&self, name: &str, caller: &NodeId, timeout_ms: i64) -> VoteResponse {
        self.0.handle_remote_lock(name, caller, timeout_ms).await
    }

    async fn release_remote_lock(&self, name: &str, caller: &NodeId) {
        self.0.handle_release(name, caller).await;
    }
}

struct EngineViewListener(ClusterLockEngine);

#[async_trait]
impl MembershipListener for EngineViewListener {
    async fn on_view_change(&self, event: &ViewChange) {
        self.0.on_view_change(event).await;
    }
}
