//! Axum routes of the facilitator HTTP surface.
//!
//! Status mapping follows the protocol contract: verification rejections
//! are `200 {"isValid":false,...}` (only malformed request bodies get 400),
//! settlement failures are `500` carrying the settle wire body, and
//! infrastructure failures surface as a bare `internal_error`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use hub402::facilitator::Facilitator as _;
use hub402::proto::{SettleRequest, VerifyRequest};
use hub402_svm::chain::provider::LedgerOps;
use hub402_svm::exact::{ExactSvmFacilitator, SettlementMode};

/// Shared state behind every route.
pub struct AppState<L> {
    /// The scheme facilitator performing verify/settle.
    pub facilitator: Arc<ExactSvmFacilitator<L>>,
    /// The ledger provider, probed by `/health`.
    pub ledger: Arc<L>,
    /// Reported by `/health`.
    pub settlement_mode: SettlementMode,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            facilitator: Arc::clone(&self.facilitator),
            ledger: Arc::clone(&self.ledger),
            settlement_mode: self.settlement_mode,
        }
    }
}

impl<L> std::fmt::Debug for AppState<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settlement_mode", &self.settlement_mode)
            .finish_non_exhaustive()
    }
}

/// Builds the facilitator router over the given state.
pub fn router<L: LedgerOps + 'static>(state: AppState<L>) -> Router {
    Router::new()
        .route("/verify", post(post_verify::<L>))
        .route("/settle", post(post_settle::<L>))
        .route("/health", get(get_health::<L>))
        .route("/supported", get(get_supported::<L>))
        .with_state(state)
}

/// `POST /verify` - verdict on a payment header.
async fn post_verify<L: LedgerOps + 'static>(
    State(state): State<AppState<L>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        tracing::warn!("verify request body failed validation");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"isValid": false, "invalidReason": "bad_request"})),
        )
            .into_response();
    };
    match state.facilitator.verify(&request).await {
        Ok(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "verification infrastructure failure");
            internal_error()
        }
    }
}

/// `POST /settle` - commits the payment on the ledger.
async fn post_settle<L: LedgerOps + 'static>(
    State(state): State<AppState<L>>,
    payload: Result<Json<SettleRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        tracing::warn!("settle request body failed validation");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "bad_request",
                "txHash": null,
                "networkId": state.ledger.network().id(),
            })),
        )
            .into_response();
    };
    match state.facilitator.settle(&request).await {
        Ok(settlement) if settlement.is_success() => {
            (StatusCode::OK, Json(settlement)).into_response()
        }
        Ok(settlement) => (StatusCode::INTERNAL_SERVER_ERROR, Json(settlement)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "settlement infrastructure failure");
            internal_error()
        }
    }
}

/// `GET /health` - RPC reachability and operating identity.
async fn get_health<L: LedgerOps + 'static>(State(state): State<AppState<L>>) -> Response {
    match state.ledger.node_version().await {
        Ok(version) => Json(serde_json::json!({
            "ok": true,
            "rpc": version,
            "feePayer": state.ledger.fee_payer().to_string(),
            "network": state.ledger.network().id(),
            "settlementMode": state.settlement_mode.to_string(),
        }))
        .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "health probe cannot reach RPC");
            Json(serde_json::json!({"ok": false})).into_response()
        }
    }
}

/// `GET /supported` - payment kinds this facilitator processes.
async fn get_supported<L: LedgerOps + 'static>(State(state): State<AppState<L>>) -> Response {
    match state.facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "supported listing failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "internal_error"})),
    )
        .into_response()
}
