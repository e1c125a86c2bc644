//! HTTP API Module
//!
//! The WireGuardService RPC surface plus monitoring endpoints.

pub mod types;
mod service;
mod routes;
mod metrics;

pub use metrics::{Metrics, RpcMethod};
pub use routes::{router, run_api_server, ApiState, TWIRP_PREFIX};
pub use service::{PeerService, WireGuardService};
