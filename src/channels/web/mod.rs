//! WebSocket provider transport and the wallet-side HTTP API.

pub mod approvals;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use approvals::WebApprovalSurface;
pub use server::{ServerState, start_server};
