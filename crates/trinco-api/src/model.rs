//! Core model types for Trinco
//!
//! Node identity, the ordered membership view, and membership change events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cluster member.
///
/// Opaque to the engine: equality and total order are the only semantics,
/// and the order is only meaningful through a [`MembershipView`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A totally ordered snapshot of cluster membership.
///
/// The view is supplied from outside; position in it is the tie-break order
/// for concurrent lock bids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    members: Vec<NodeId>,
}

impl MembershipView {
    pub fn new(members: Vec<NodeId>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.iter().any(|m| m == node)
    }

    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.members.iter().position(|m| m == node)
    }

    /// Members of the view excluding `local`.
    pub fn others<'a>(&'a self, local: &'a NodeId) -> impl Iterator<Item = &'a NodeId> {
        self.members.iter().filter(move |m| *m != local)
    }

    /// Whether `candidate` outranks `reference`.
    ///
    /// A node absent from the view is never superior; if the reference
    /// itself is absent, any present candidate outranks it.
    pub fn is_superior(&self, candidate: &NodeId, reference: &NodeId) -> bool {
        match (self.position(candidate), self.position(reference)) {
            (Some(c), Some(r)) => c < r,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// A membership change delivered to listeners.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewChange {
    /// Members no longer present.
    pub dead: Vec<NodeId>,
    /// Members newly present.
    pub joined: Vec<NodeId>,
    /// The complete new view.
    pub view: MembershipView,
    pub timestamp_ms: i64,
}

impl ViewChange {
    pub fn new(dead: Vec<NodeId>, joined: Vec<NodeId>, view: MembershipView) -> Self {
        Self {
            dead,
            joined,
            view,
            timestamp_ms: trinco_common::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(ids: &[&str]) -> MembershipView {
        MembershipView::new(ids.iter().map(|id| NodeId::from(*id)).collect())
    }

    #[test]
    fn test_node_id_display_and_order() {
        let a = NodeId::from("node-a");
        let b = NodeId::from("node-b");
        assert_eq!(a.to_string(), "node-a");
        assert!(a < b);
    }

    #[test]
    fn test_node_id_serializes_transparently() {
        let id = NodeId::from("node-a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"node-a\"");
    }

    #[test]
    fn test_earlier_position_is_superior() {
        let view = view(&["node-a", "node-b", "node-c"]);
        let a = NodeId::from("node-a");
        let b = NodeId::from("node-b");
        assert!(view.is_superior(&a, &b));
        assert!(!view.is_superior(&b, &a));
        assert!(!view.is_superior(&a, &a));
    }

    #[test]
    fn test_absent_candidate_is_never_superior() {
        let view = view(&["node-a", "node-b"]);
        let a = NodeId::from("node-a");
        let ghost = NodeId::from("node-x");
        assert!(!view.is_superior(&ghost, &a));
    }

    #[test]
    fn test_present_candidate_outranks_absent_reference() {
        let view = view(&["node-a", "node-b"]);
        let b = NodeId::from("node-b");
        let ghost = NodeId::from("node-x");
        assert!(view.is_superior(&b, &ghost));
    }

    #[test]
    fn test_others_excludes_local() {
        let view = view(&["node-a", "node-b", "node-c"]);
        let b = NodeId::from("node-b");
        let others: Vec<_> = view.others(&b).map(|n| n.as_str()).collect();
        assert_eq!(others, vec!["node-a", "node-c"]);
    }
}
