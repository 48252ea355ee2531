//! HTTP handlers for the wallet UI.

pub mod approvals;
pub mod sessions;
