//! API Routes
//!
//! Binds the WireGuardService facade to Twirp-style JSON routes and serves
//! health, status and metrics endpoints next to them.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::api::metrics::{Metrics, RpcMethod};
use crate::api::service::WireGuardService;
use crate::api::types::{ErrorCode, RpcError};
use crate::config::RegistryConfig;
use crate::registry::SharedStore;

/// Path prefix of every RPC route
pub const TWIRP_PREFIX: &str = "/twirp/wireguard.WireGuardService";

/// Shared API state
pub struct ApiState {
    pub config: Arc<RegistryConfig>,
    pub service: Arc<dyn WireGuardService>,
    pub store: SharedStore,
    pub metrics: Arc<Metrics>,
}

/// Build the HTTP router
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        // RPC
        .route(
            &format!("{}/:method", TWIRP_PREFIX),
            post(handle_rpc).fallback(wrong_http_method),
        )

        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .fallback(unknown_route)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_api_server(state: Arc<ApiState>) -> anyhow::Result<()> {
    let ip: IpAddr = state.config.bind_address.parse()?;
    let addr = SocketAddr::new(ip, state.config.api_port);

    let app = router(state);

    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self)).into_response()
    }
}

// =============================================================================
// RPC
// =============================================================================

/// POST /twirp/wireguard.WireGuardService/{method}
async fn handle_rpc(
    State(state): State<Arc<ApiState>>,
    Path(method): Path<String>,
    body: Bytes,
) -> Response {
    let Ok(rpc) = method.parse::<RpcMethod>() else {
        state.metrics.inc_bad_route();
        return RpcError::bad_route(format!("no such method {:?}", method)).into_response();
    };

    state.metrics.inc_request(rpc);
    debug!("RPC {} ({} bytes)", rpc.as_str(), body.len());

    let call = dispatch(state.service.as_ref(), rpc, &body);
    let result = match tokio::time::timeout(state.config.request_timeout(), call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "⏱️  {} exceeded its {}ms deadline",
                rpc.as_str(),
                state.config.request_timeout_ms
            );
            Err(RpcError::deadline_exceeded())
        }
    };

    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            state.metrics.inc_error(err.code);
            if err.code != ErrorCode::Internal {
                debug!("RPC {} rejected: {}", rpc.as_str(), err);
            }
            err.into_response()
        }
    }
}

async fn dispatch(
    service: &dyn WireGuardService,
    method: RpcMethod,
    body: &[u8],
) -> Result<serde_json::Value, RpcError> {
    match method {
        RpcMethod::ListPeers => encode(service.list_peers(decode(body)?).await?),
        RpcMethod::AddPeer => encode(service.add_peer(decode(body)?).await?),
        RpcMethod::RemovePeer => encode(service.remove_peer(decode(body)?).await?),
        RpcMethod::UpdatePeer => encode(service.update_peer(decode(body)?).await?),
        RpcMethod::GetPeer => encode(service.get_peer(decode(body)?).await?),
    }
}

/// An empty body decodes as the all-defaults request
fn decode<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(body)
        .map_err(|e| RpcError::malformed(format!("could not decode request body: {}", e)))
}

fn encode<T: Serialize>(response: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(response).map_err(|e| {
        error!("Failed to encode response: {}", e);
        RpcError::internal()
    })
}

async fn wrong_http_method(State(state): State<Arc<ApiState>>, method: Method) -> Response {
    state.metrics.inc_bad_route();
    RpcError::bad_route(format!("unsupported HTTP method {}, use POST", method)).into_response()
}

async fn unknown_route(State(state): State<Arc<ApiState>>, uri: axum::http::Uri) -> Response {
    state.metrics.inc_bad_route();
    RpcError::bad_route(format!("no handler for {}", uri.path())).into_response()
}

// =============================================================================
// HEALTH, STATUS & METRICS
// =============================================================================

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let store = state.store.read().await;
    let stats = store.stats();

    let status = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "registry": {
            "persistent": store.is_persistent(),
            "next_sequence": store.next_seq(),
            "stats": stats,
        },
        "limits": {
            "max_page_size": state.config.max_page_size,
            "default_page_size": state.config.default_page_size,
            "request_timeout_ms": state.config.request_timeout_ms,
        }
    });

    Json(status)
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    Json(state.metrics.to_json())
}

async fn refresh_gauges(state: &ApiState) {
    let stats = state.store.read().await.stats();
    state.metrics.set_store_stats(&stats);
}
