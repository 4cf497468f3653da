//! # Read-only HTTP API
//!
//! Builds the axum router that exposes ledger state. Every handler asks the
//! owning ledger actor for a snapshot, so responses reflect the ledger
//! between two operations, never in the middle of one.
//!
//! ## Endpoints
//!
//! | Method | Path                                | Description                  |
//! |--------|-------------------------------------|------------------------------|
//! | GET    | `/health`                           | Liveness check               |
//! | GET    | `/status`                           | Node and relay summary       |
//! | GET    | `/ledgers`                          | Snapshot of every ledger     |
//! | GET    | `/ledgers/:id`                      | Snapshot of one ledger       |
//! | GET    | `/ledgers/:id/events`               | Event log of one ledger      |
//! | GET    | `/ledgers/:id/accounts/:address`    | Balances of one account      |
//! | GET    | `/metrics`                          | Prometheus exposition        |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use omniwrap_protocol::{Address, Amount, InMemoryRelay, LedgerId};

use crate::actor::{ActorError, LedgerHandle};
use crate::metrics::{self, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Actor handles keyed by ledger id.
    pub ledgers: Arc<BTreeMap<LedgerId, LedgerHandle>>,
    /// The relay shared by every ledger.
    pub relay: Arc<InMemoryRelay>,
    /// Symbol of the underlying asset on the origin ledger.
    pub asset_symbol: String,
    pub metrics: SharedMetrics,
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ledgers", get(ledgers_handler))
        .route("/ledgers/:id", get(ledger_handler))
        .route("/ledgers/:id/events", get(events_handler))
        .route("/ledgers/:id/accounts/:address", get(account_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub asset_symbol: String,
    /// Ledger ids served by this node, ascending.
    pub ledgers: Vec<LedgerId>,
    /// Packets waiting in the relay queue.
    pub pending_packets: usize,
    /// Packets accepted by the relay since startup.
    pub dispatched_packets: u64,
    /// Refused packets stored by the relay for redelivery.
    pub stored_packets: usize,
    /// Relay fees collected since startup.
    pub relay_fees_collected: Amount,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn actor_failure(e: ActorError) -> Response {
    tracing::error!(error = %e, "ledger actor unavailable");
    error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

fn unknown_ledger(id: LedgerId) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("unknown ledger {id}"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        asset_symbol: state.asset_symbol.clone(),
        ledgers: state.ledgers.keys().copied().collect(),
        pending_packets: state.relay.pending(),
        dispatched_packets: state.relay.dispatched(),
        stored_packets: state.relay.stored(),
        relay_fees_collected: state.relay.fees_collected(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn ledgers_handler(State(state): State<AppState>) -> Response {
    let mut snapshots = Vec::with_capacity(state.ledgers.len());
    for handle in state.ledgers.values() {
        match handle.snapshot().await {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => return actor_failure(e),
        }
    }
    Json(snapshots).into_response()
}

async fn ledger_handler(Path(id): Path<LedgerId>, State(state): State<AppState>) -> Response {
    let Some(handle) = state.ledgers.get(&id) else {
        return unknown_ledger(id);
    };
    match handle.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => actor_failure(e),
    }
}

async fn events_handler(Path(id): Path<LedgerId>, State(state): State<AppState>) -> Response {
    let Some(handle) = state.ledgers.get(&id) else {
        return unknown_ledger(id);
    };
    match handle.events().await {
        Ok(events) => Json(events).into_response(),
        Err(e) => actor_failure(e),
    }
}

/// `GET /ledgers/:id/accounts/:address`: wrapped and native balances.
/// Unknown accounts report zero balances.
async fn account_handler(
    Path((id, address)): Path<(LedgerId, String)>,
    State(state): State<AppState>,
) -> Response {
    let Some(handle) = state.ledgers.get(&id) else {
        return unknown_ledger(id);
    };
    let account = match Address::from_hex(&address) {
        Ok(account) => account,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid address '{address}': {e}"),
            )
        }
    };
    match handle.account(account).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => actor_failure(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::spawn_ledger;
    use crate::devnet::Devnet;
    use crate::metrics::NodeMetrics;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use omniwrap_contracts::{AccountSnapshot, BridgeEvent, LedgerSnapshot};
    use omniwrap_protocol::config::DevnetConfig;
    use tower::ServiceExt;

    /// Spawns actors for the default devnet with one wrapped account.
    async fn test_app_state() -> (AppState, Address) {
        let mut devnet = Devnet::build(&DevnetConfig::default()).unwrap();
        let user = Address::derive("api-user");
        devnet.seed_account(&user, 10_000, 1_000).unwrap();
        devnet.ledgers[0].wrap(&user, &user, 10_000).unwrap();

        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let asset_symbol = devnet.asset.symbol().to_string();
        let mut ledgers = BTreeMap::new();
        for ledger in devnet.ledgers {
            let (handle, _task) = spawn_ledger(ledger, devnet.gate, metrics.clone());
            ledgers.insert(handle.ledger_id(), handle);
        }

        let state = AppState {
            version: "0.1.0-test".into(),
            ledgers: Arc::new(ledgers),
            relay: devnet.relay,
            asset_symbol,
            metrics,
        };
        (state, user)
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_lists_ledgers() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.ledgers, vec![1, 10]);
        assert_eq!(resp.asset_symbol, "OWT");
        assert_eq!(resp.pending_packets, 0);
    }

    #[tokio::test]
    async fn ledgers_endpoint_returns_every_snapshot() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/ledgers").await;

        assert_eq!(status, StatusCode::OK);
        let snapshots: Vec<LedgerSnapshot> = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].is_origin);
        assert_eq!(snapshots[0].total_wrapped_supply, 9_950);
        assert_eq!(snapshots[0].custody_balance, Some(10_000));
        assert_eq!(snapshots[1].custody_balance, None);
    }

    #[tokio::test]
    async fn unknown_ledger_is_not_found() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/ledgers/42").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("42"));
    }

    #[tokio::test]
    async fn account_endpoint_reports_balances() {
        let (state, user) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, &format!("/ledgers/1/accounts/{user}")).await;

        assert_eq!(status, StatusCode::OK);
        let account: AccountSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(account.address, user);
        assert_eq!(account.wrapped_balance, 9_950);
        assert_eq!(account.native_balance, 1_000);
    }

    #[tokio::test]
    async fn malformed_address_is_bad_request() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, _) = get(&router, "/ledgers/1/accounts/0xnothex").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_endpoint_returns_log() {
        let (state, user) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/ledgers/1/events").await;

        assert_eq!(status, StatusCode::OK);
        let events: Vec<BridgeEvent> = serde_json::from_slice(&body).unwrap();
        assert!(events.contains(&BridgeEvent::Wrapped {
            recipient: user,
            amount: 9_950,
            fee: 50,
        }));
    }

    #[tokio::test]
    async fn metrics_served_from_api_router() {
        let (state, _) = test_app_state().await;
        let router = create_router(state);
        let (status, body) = get(&router, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("omniwrap_pending_packets"));
    }
}
