//! Request and response models for lock negotiation
//!
//! Two operations cross the wire: a lock vote and a release notice. Both are
//! plain serde models so any channel implementation can carry them.

use serde::{Deserialize, Serialize};

use crate::model::NodeId;

// Request type identifiers
pub const REMOTE_LOCK_REQUEST_TYPE: &str = "RemoteLockRequest";
pub const RELEASE_REMOTE_LOCK_REQUEST_TYPE: &str = "ReleaseRemoteLockRequest";

/// Base trait for messages carried by a cluster channel.
pub trait WireRequest: Serialize {
    fn request_type(&self) -> &'static str;

    fn body(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Asks the receiver to vote on (and locally grant) a lock bid.
///
/// `timeout_ms` is the caller's remaining budget; at or below zero means
/// unbounded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLockRequest {
    pub lock_name: String,
    pub caller: NodeId,
    pub timeout_ms: i64,
}

impl RemoteLockRequest {
    pub fn new(lock_name: impl Into<String>, caller: NodeId, timeout_ms: i64) -> Self {
        Self {
            lock_name: lock_name.into(),
            caller,
            timeout_ms,
        }
    }
}

impl WireRequest for RemoteLockRequest {
    fn request_type(&self) -> &'static str {
        REMOTE_LOCK_REQUEST_TYPE
    }
}

/// Tells the receiver that `caller` no longer bids for or holds the lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRemoteLockRequest {
    pub lock_name: String,
    pub caller: NodeId,
}

impl ReleaseRemoteLockRequest {
    pub fn new(lock_name: impl Into<String>, caller: NodeId) -> Self {
        Self {
            lock_name: lock_name.into(),
            caller,
        }
    }
}

impl WireRequest for ReleaseRemoteLockRequest {
    fn request_type(&self) -> &'static str {
        RELEASE_REMOTE_LOCK_REQUEST_TYPE
    }
}

/// Outcome of a single vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteFlag {
    /// The responder granted the lock locally or will not contest it.
    Ok,
    /// The responder could not grant locally.
    Fail,
    /// The responder is itself mid-acquisition and does not stand aside.
    Reject,
}

/// A responder's answer to a [`RemoteLockRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub responder: NodeId,
    pub flag: VoteFlag,
    /// `Fail`: the current local holder when known. `Reject`: the
    /// responder's own identity, the tie-break input.
    pub holder: Option<NodeId>,
}

impl VoteResponse {
    pub fn ok(responder: NodeId) -> Self {
        Self {
            responder,
            flag: VoteFlag::Ok,
            holder: None,
        }
    }

    pub fn fail(responder: NodeId, holder: Option<NodeId>) -> Self {
        Self {
            responder,
            flag: VoteFlag::Fail,
            holder,
        }
    }

    pub fn reject(responder: NodeId) -> Self {
        let holder = Some(responder.clone());
        Self {
            responder,
            flag: VoteFlag::Reject,
            holder,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.flag == VoteFlag::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_types() {
        let lock = RemoteLockRequest::new("orders", NodeId::from("node-a"), 500);
        let release = ReleaseRemoteLockRequest::new("orders", NodeId::from("node-a"));
        assert_eq!(lock.request_type(), "RemoteLockRequest");
        assert_eq!(release.request_type(), "ReleaseRemoteLockRequest");
    }

    #[test]
    fn test_lock_request_wire_shape() {
        let req = RemoteLockRequest::new("orders", NodeId::from("node-a"), 500);
        let json: serde_json::Value = serde_json::from_slice(&req.body()).unwrap();
        assert_eq!(json["lockName"], "orders");
        assert_eq!(json["caller"], "node-a");
        assert_eq!(json["timeoutMs"], 500);
    }

    #[test]
    fn test_reject_carries_own_identity() {
        let vote = VoteResponse::reject(NodeId::from("node-b"));
        assert_eq!(vote.flag, VoteFlag::Reject);
        assert_eq!(vote.holder, Some(NodeId::from("node-b")));
        assert!(!vote.is_ok());
    }

    #[test]
    fn test_ok_has_no_holder() {
        let vote = VoteResponse::ok(NodeId::from("node-b"));
        assert!(vote.is_ok());
        assert!(vote.holder.is_none());
    }

    #[test]
    fn test_vote_flag_wire_names() {
        assert_eq!(serde_json::to_string(&VoteFlag::Ok).unwrap(), "\"OK\"");
        assert_eq!(serde_json::to_string(&VoteFlag::Fail).unwrap(), "\"FAIL\"");
        assert_eq!(
            serde_json::to_string(&VoteFlag::Reject).unwrap(),
            "\"REJECT\""
        );
    }
}
