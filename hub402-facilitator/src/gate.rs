//! Request gate: API-key check and per-IP minimum-interval rate limit.
//!
//! Applied ahead of every route. The limiter state is an injected
//! concurrent map rather than process-global state, so tests construct
//! their own gates and a future shared-limiter backend can slot in behind
//! the same shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Header carrying the API key when `AUTH_TOKEN` is configured.
const API_KEY_HEADER: &str = "x-api-key";

/// Shared gate configuration and limiter state.
#[derive(Clone)]
pub struct RequestGate {
    auth_token: Option<String>,
    min_interval: Option<Duration>,
    last_seen: Arc<DashMap<String, Instant>>,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("auth", &self.auth_token.is_some())
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

impl RequestGate {
    /// Creates a gate. `None` disables the respective check.
    #[must_use]
    pub fn new(auth_token: Option<String>, min_interval: Option<Duration>) -> Self {
        Self {
            auth_token: auth_token.filter(|token| !token.is_empty()),
            min_interval,
            last_seen: Arc::new(DashMap::new()),
        }
    }
}

/// Axum middleware enforcing the gate.
pub async fn gate_middleware(
    State(gate): State<RequestGate>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &gate.auth_token {
        let presented = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }

    if let Some(min_interval) = gate.min_interval {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| "unknown".to_owned(), |info| info.0.ip().to_string());
        let now = Instant::now();
        // Entry guard keeps check-and-update atomic per client.
        match gate.last_seen.entry(client) {
            Entry::Occupied(mut seen) => {
                if now.duration_since(*seen.get()) < min_interval {
                    return (
                        StatusCode::TOO_MANY_REQUESTS,
                        axum::Json(serde_json::json!({"error": "rate_limited"})),
                    )
                        .into_response();
                }
                seen.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
    }

    next.run(request).await
}
