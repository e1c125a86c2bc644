// API Integration Tests
//
// Drives complete request flows through the router, the facade and a
// RocksDB-backed registry, the way the web UI uses the service.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::api::{router, ApiState, Metrics, PeerService, TWIRP_PREFIX};
use crate::config::RegistryConfig;
use crate::registry::{shared, MutationCoordinator, PeerStore};
use crate::types::PublicKey;

fn key(id: u8) -> String {
    PublicKey::from_bytes([id; 32]).to_string()
}

fn app_with(store: PeerStore, config: RegistryConfig) -> Router {
    let config = Arc::new(config);
    let store = shared(store);
    let coordinator = Arc::new(MutationCoordinator::new(store.clone(), config.event_buffer));
    let service = Arc::new(PeerService::new(store.clone(), coordinator, &config));

    router(Arc::new(ApiState {
        config,
        service,
        store,
        metrics: Arc::new(Metrics::new()),
    }))
}

fn app() -> Router {
    app_with(PeerStore::in_memory(), RegistryConfig::default())
}

async fn rpc(app: &Router, method: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("{}/{}", TWIRP_PREFIX, method))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn add(app: &Router, id: u8) -> Value {
    let (status, body) = rpc(
        app,
        "AddPeer",
        json!({
            "peer": {
                "publicKey": key(id),
                "allowedIPs": [format!("10.20.0.{}/32", id)],
                "name": format!("device {}", id),
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["peer"].clone()
}

fn listed_keys(body: &Value) -> Vec<String> {
    body["peers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["publicKey"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// PAGINATION OVER THE WIRE
// =============================================================================

#[cfg(test)]
mod wire_pagination {
    use super::*;

    #[tokio::test]
    async fn test_string_and_integer_params_agree() {
        let app = app();
        for id in 1..=5 {
            add(&app, id).await;
        }

        let (_, as_strings) = rpc(&app, "ListPeers", json!({ "offset": "2", "limit": "2" })).await;
        let (_, as_numbers) = rpc(&app, "ListPeers", json!({ "offset": 2, "limit": 2 })).await;

        assert_eq!(as_strings, as_numbers);
        assert_eq!(listed_keys(&as_numbers), vec![key(3), key(4)]);
        assert_eq!(as_numbers["totalCount"], 5);
    }

    #[tokio::test]
    async fn test_offset_past_end_is_empty() {
        let app = app();
        for id in 1..=5 {
            add(&app, id).await;
        }

        let (status, body) = rpc(&app, "ListPeers", json!({ "offset": 10, "limit": 2 })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed_keys(&body).is_empty());
        assert_eq!(body["totalCount"], 5);
    }

    #[tokio::test]
    async fn test_non_numeric_limit_rejected() {
        let app = app();

        let (status, body) = rpc(&app, "ListPeers", json!({ "limit": "lots" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_limit_clamped_to_configured_max() {
        let mut config = RegistryConfig::default();
        config.max_page_size = 3;
        config.default_page_size = 2;
        let app = app_with(PeerStore::in_memory(), config);
        for id in 1..=5 {
            add(&app, id).await;
        }

        let (_, clamped) = rpc(&app, "ListPeers", json!({ "limit": 50 })).await;
        assert_eq!(listed_keys(&clamped).len(), 3);

        let (_, defaulted) = rpc(&app, "ListPeers", json!({})).await;
        assert_eq!(listed_keys(&defaulted).len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_limit_saturates_then_clamps() {
        let mut config = RegistryConfig::default();
        config.max_page_size = 3;
        let app = app_with(PeerStore::in_memory(), config);
        for id in 1..=5 {
            add(&app, id).await;
        }

        let (status, as_number) = rpc(&app, "ListPeers", json!({ "limit": u64::MAX })).await;
        assert_eq!(status, StatusCode::OK, "{}", as_number);
        assert_eq!(listed_keys(&as_number), vec![key(1), key(2), key(3)]);

        let (status, as_string) =
            rpc(&app, "ListPeers", json!({ "limit": "99999999999999999999" })).await;
        assert_eq!(status, StatusCode::OK, "{}", as_string);
        assert_eq!(as_string, as_number);
    }

    #[tokio::test]
    async fn test_oversized_negative_offset_rejected() {
        let app = app();

        let (status, body) =
            rpc(&app, "ListPeers", json!({ "offset": "-99999999999999999999" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_key_filter_counts_only_matches() {
        let app = app();
        for id in 1..=6 {
            add(&app, id).await;
        }

        let (status, body) = rpc(
            &app,
            "ListPeers",
            json!({ "publicKeys": [key(5), key(2), key(4), key(9)], "offset": 1, "limit": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(listed_keys(&body), vec![key(4)]);
        assert_eq!(body["totalCount"], 3);

        let (_, none) = rpc(&app, "ListPeers", json!({ "publicKeys": [] })).await;
        assert!(listed_keys(&none).is_empty());
        assert_eq!(none["totalCount"], 0);

        let (status, bad) = rpc(&app, "ListPeers", json!({ "publicKeys": ["nope"] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(bad["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_ordered_listing() {
        let app = app();
        for id in [3u8, 1, 2] {
            add(&app, id).await;
        }

        let (_, body) = rpc(&app, "ListPeers", json!({ "limit": 10, "order": "name_desc" })).await;
        assert_eq!(listed_keys(&body), vec![key(3), key(2), key(1)]);
    }
}

// =============================================================================
// PEER LIFECYCLE
// =============================================================================

#[cfg(test)]
mod peer_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_add_update_get_remove() {
        let app = app();
        let added = add(&app, 7).await;
        assert!(added["endpoint"].is_null());
        assert_eq!(added["persistentKeepalive"], 0);

        // Roaming: only the endpoint changes
        let (status, body) = rpc(
            &app,
            "UpdatePeer",
            json!({ "publicKey": key(7), "fields": { "endpoint": "[2001:db8::7]:51820" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let updated = &body["peer"];
        assert_eq!(updated["endpoint"], "[2001:db8::7]:51820");
        assert_eq!(updated["allowedIPs"], added["allowedIPs"]);
        assert_eq!(updated["name"], added["name"]);
        assert_eq!(updated["createdAt"], added["createdAt"]);

        let (_, fetched) = rpc(&app, "GetPeer", json!({ "publicKey": key(7) })).await;
        assert_eq!(&fetched["peer"], updated);

        let (status, _) = rpc(&app, "RemovePeer", json!({ "publicKey": key(7) })).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = rpc(&app, "GetPeer", json!({ "publicKey": key(7) })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let app = app();
        add(&app, 1).await;

        let (status, body) =
            rpc(&app, "UpdatePeer", json!({ "publicKey": key(1), "fields": {} })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_empty_update_of_absent_key_is_not_found() {
        let app = app();

        let (status, body) =
            rpc(&app, "UpdatePeer", json!({ "publicKey": key(3), "fields": {} })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = rpc(&app, "UpdatePeer", json!({ "publicKey": key(3) })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_numeric_hostname_endpoint_rejected() {
        let app = app();

        let (status, body) = rpc(
            &app,
            "AddPeer",
            json!({
                "peer": {
                    "publicKey": key(1),
                    "allowedIPs": ["10.20.0.1/32"],
                    "endpoint": "999.999.999.999:51820",
                }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");

        let (_, listed) = rpc(&app, "ListPeers", json!({})).await;
        assert_eq!(listed["totalCount"], 0);
    }

    #[tokio::test]
    async fn test_preshared_key_never_returned() {
        let app = app();

        let (status, body) = rpc(
            &app,
            "AddPeer",
            json!({
                "peer": {
                    "publicKey": key(1),
                    "allowedIPs": ["10.20.0.1/32"],
                    "presharedKey": key(200),
                }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["peer"].get("presharedKey").is_none());

        let (_, fetched) = rpc(&app, "GetPeer", json!({ "publicKey": key(1) })).await;
        assert!(fetched["peer"].get("presharedKey").is_none());
        assert!(!fetched.to_string().contains(&key(200)));

        let (status, body) = rpc(
            &app,
            "UpdatePeer",
            json!({ "publicKey": key(1), "fields": { "presharedKey": null } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let (status, body) = rpc(
            &app,
            "UpdatePeer",
            json!({ "publicKey": key(1), "fields": { "presharedKey": "short" } }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_invalid_update_changes_nothing() {
        let app = app();
        let added = add(&app, 1).await;

        // Valid name, invalid CIDR: nothing may be applied
        let (status, _) = rpc(
            &app,
            "UpdatePeer",
            json!({
                "publicKey": key(1),
                "fields": { "name": "renamed", "allowedIPs": ["10.0.0.0/33"] }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, fetched) = rpc(&app, "GetPeer", json!({ "publicKey": key(1) })).await;
        assert_eq!(fetched["peer"], added);
    }

    #[tokio::test]
    async fn test_status_reports_store() {
        let app = app();
        add(&app, 1).await;
        add(&app, 2).await;

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(status["status"], "healthy");
        assert_eq!(status["registry"]["stats"]["total_peers"], 2);
        assert_eq!(status["registry"]["persistent"], false);
    }
}

// =============================================================================
// PERSISTENCE THROUGH THE API
// =============================================================================

#[cfg(test)]
mod persistence {
    use super::*;

    #[tokio::test]
    async fn test_peers_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer_store");

        let before = {
            let app = app_with(PeerStore::open(&path).unwrap(), RegistryConfig::default());
            for id in [4u8, 9, 2] {
                add(&app, id).await;
            }
            let (_, body) = rpc(&app, "ListPeers", json!({ "limit": 10 })).await;
            body
        };

        let app = app_with(PeerStore::open(&path).unwrap(), RegistryConfig::default());
        let (_, after) = rpc(&app, "ListPeers", json!({ "limit": 10 })).await;

        assert_eq!(after, before);
        assert_eq!(listed_keys(&after), vec![key(4), key(9), key(2)]);
    }
}
