//! Metrics Collection
//!
//! Counters for the RPC surface plus a few registry gauges, exposed in
//! Prometheus text format and as JSON.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::api::types::ErrorCode;
use crate::registry::StoreStats;

/// The RPC methods served under the twirp prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    ListPeers,
    AddPeer,
    RemovePeer,
    UpdatePeer,
    GetPeer,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 5] = [
        RpcMethod::ListPeers,
        RpcMethod::AddPeer,
        RpcMethod::RemovePeer,
        RpcMethod::UpdatePeer,
        RpcMethod::GetPeer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::ListPeers => "ListPeers",
            RpcMethod::AddPeer => "AddPeer",
            RpcMethod::RemovePeer => "RemovePeer",
            RpcMethod::UpdatePeer => "UpdatePeer",
            RpcMethod::GetPeer => "GetPeer",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl FromStr for RpcMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RpcMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or(())
    }
}

fn error_index(code: ErrorCode) -> usize {
    code as usize
}

/// Metrics collector for the registry service
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Instant,

    /// Requests per RPC method
    requests: [AtomicU64; RpcMethod::ALL.len()],

    /// Failed requests per error code
    errors: [AtomicU64; ErrorCode::ALL.len()],

    /// Requests that arrived for an unknown method
    bad_routes: AtomicU64,

    /// Registered peers
    pub peers: AtomicU64,

    /// Peers with a known endpoint
    pub peers_with_endpoint: AtomicU64,

    /// Peers that completed at least one handshake
    pub peers_with_handshake: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests: Default::default(),
            errors: Default::default(),
            bad_routes: AtomicU64::new(0),
            peers: AtomicU64::new(0),
            peers_with_endpoint: AtomicU64::new(0),
            peers_with_handshake: AtomicU64::new(0),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn inc_request(&self, method: RpcMethod) {
        self.requests[method.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self, code: ErrorCode) {
        self.errors[error_index(code)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bad_route(&self) {
        self.bad_routes.fetch_add(1, Ordering::Relaxed);
        self.inc_error(ErrorCode::BadRoute);
    }

    pub fn requests(&self, method: RpcMethod) -> u64 {
        self.requests[method.index()].load(Ordering::Relaxed)
    }

    pub fn errors(&self, code: ErrorCode) -> u64 {
        self.errors[error_index(code)].load(Ordering::Relaxed)
    }

    /// Refresh the registry gauges
    pub fn set_store_stats(&self, stats: &StoreStats) {
        self.peers.store(stats.total_peers as u64, Ordering::Relaxed);
        self.peers_with_endpoint
            .store(stats.peers_with_endpoint as u64, Ordering::Relaxed);
        self.peers_with_handshake
            .store(stats.peers_with_handshake as u64, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        // Uptime
        let _ = write!(
            output,
            "# HELP wg_registry_uptime_seconds Service uptime in seconds\n\
             # TYPE wg_registry_uptime_seconds gauge\n\
             wg_registry_uptime_seconds {}\n\n",
            self.uptime_secs()
        );

        // Requests
        output.push_str(
            "# HELP wg_registry_requests_total RPC requests by method\n\
             # TYPE wg_registry_requests_total counter\n",
        );
        for method in RpcMethod::ALL {
            let _ = writeln!(
                output,
                "wg_registry_requests_total{{method=\"{}\"}} {}",
                method.as_str(),
                self.requests(method)
            );
        }
        output.push('\n');

        // Errors
        output.push_str(
            "# HELP wg_registry_errors_total Failed RPC requests by error code\n\
             # TYPE wg_registry_errors_total counter\n",
        );
        for code in ErrorCode::ALL {
            let _ = writeln!(
                output,
                "wg_registry_errors_total{{code=\"{}\"}} {}",
                code.as_str(),
                self.errors(code)
            );
        }
        output.push('\n');

        let _ = write!(
            output,
            "# HELP wg_registry_bad_routes_total Requests for unknown methods\n\
             # TYPE wg_registry_bad_routes_total counter\n\
             wg_registry_bad_routes_total {}\n\n",
            self.bad_routes.load(Ordering::Relaxed)
        );

        // Registry
        let _ = write!(
            output,
            "# HELP wg_registry_peers Registered peers\n\
             # TYPE wg_registry_peers gauge\n\
             wg_registry_peers {}\n\n",
            self.peers.load(Ordering::Relaxed)
        );

        let _ = write!(
            output,
            "# HELP wg_registry_peers_with_endpoint Peers with a known endpoint\n\
             # TYPE wg_registry_peers_with_endpoint gauge\n\
             wg_registry_peers_with_endpoint {}\n\n",
            self.peers_with_endpoint.load(Ordering::Relaxed)
        );

        let _ = write!(
            output,
            "# HELP wg_registry_peers_with_handshake Peers that completed a handshake\n\
             # TYPE wg_registry_peers_with_handshake gauge\n\
             wg_registry_peers_with_handshake {}\n\n",
            self.peers_with_handshake.load(Ordering::Relaxed)
        );

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let requests: serde_json::Map<String, serde_json::Value> = RpcMethod::ALL
            .into_iter()
            .map(|m| (m.as_str().to_string(), self.requests(m).into()))
            .collect();
        let errors: serde_json::Map<String, serde_json::Value> = ErrorCode::ALL
            .into_iter()
            .map(|c| (c.as_str().to_string(), self.errors(c).into()))
            .collect();

        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "requests": requests,
            "errors": errors,
            "bad_routes": self.bad_routes.load(Ordering::Relaxed),
            "registry": {
                "peers": self.peers.load(Ordering::Relaxed),
                "peers_with_endpoint": self.peers_with_endpoint.load(Ordering::Relaxed),
                "peers_with_handshake": self.peers_with_handshake.load(Ordering::Relaxed),
            },
        })
    }
}
