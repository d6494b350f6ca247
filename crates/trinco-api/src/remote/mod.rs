//! Remote models exchanged by negotiating nodes

pub mod model;
