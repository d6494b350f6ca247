//! Trinco API - model and wire types for lock negotiation
//!
//! This crate defines:
//! - `NodeId` and the ordered `MembershipView`
//! - `ViewChange` membership events
//! - The request/response models exchanged by negotiating nodes

pub mod model;
pub mod remote;

// Re-exports for convenience
pub use model::{MembershipView, NodeId, ViewChange};
pub use remote::model::{
    ReleaseRemoteLockRequest, RemoteLockRequest, VoteFlag, VoteResponse, WireRequest,
};
