//! The Guard middleware: a tower [`Layer`] keyed by a route table.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use http::Method;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use hub402::facilitator::Facilitator;
use hub402::proto::PaymentRequirements;

use super::paygate;

/// Payment requirements per guarded `"METHOD path"` route.
///
/// Routes are keyed by each descriptor's `resource` field; requests whose
/// method and path match no entry pass through unguarded.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, PaymentRequirements>,
}

impl RouteTable {
    /// An empty table; guards nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards the route named by `requirements.resource`.
    #[must_use]
    pub fn guard(mut self, requirements: PaymentRequirements) -> Self {
        self.routes
            .insert(requirements.resource.clone(), requirements);
        self
    }

    /// The requirements for `method` and `path`, if that route is guarded.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&PaymentRequirements> {
        self.routes.get(&format!("{method} {path}"))
    }

    /// Iterates guarded routes in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PaymentRequirements)> {
        self.routes
            .iter()
            .map(|(route, requirements)| (route.as_str(), requirements))
    }

    /// Whether the table guards no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Middleware builder enforcing payments via a facilitator.
///
/// Apply as an axum/tower layer around the routes to protect.
pub struct PaymentGuard<F> {
    facilitator: F,
    routes: Arc<RouteTable>,
}

impl<F: Clone> Clone for PaymentGuard<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<F: std::fmt::Debug> std::fmt::Debug for PaymentGuard<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGuard")
            .field("facilitator", &self.facilitator)
            .field("routes", &self.routes)
            .finish()
    }
}

impl<F> PaymentGuard<F> {
    /// Creates the middleware over a facilitator and a route table.
    pub fn new(facilitator: F, routes: RouteTable) -> Self {
        Self {
            facilitator,
            routes: Arc::new(routes),
        }
    }

    /// The table of guarded routes.
    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }
}

impl<S, F> Layer<S> for PaymentGuard<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = PaymentGuardService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGuardService {
            facilitator: self.facilitator.clone(),
            routes: Arc::clone(&self.routes),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The Guard service wrapping one inner service.
#[derive(Clone)]
#[allow(missing_debug_implementations)] // BoxCloneSyncService has no Debug
pub struct PaymentGuardService<F> {
    facilitator: F,
    routes: Arc<RouteTable>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Service<Request> for PaymentGuardService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let facilitator = self.facilitator.clone();
        let routes = Arc::clone(&self.routes);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(requirements) = routes.lookup(req.method(), req.uri().path()).cloned() else {
                return inner.call(req).await;
            };
            Ok(paygate::handle_guarded(&facilitator, requirements, inner, req).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get;
    use rand::Rng;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use hub402::encoding::Base64Bytes;
    use hub402::proto::{
        EXACT_SCHEME, ExactSvmAuthorization, ExactSvmPayload, PaymentPayload, SettleResponse,
    };
    use hub402::timestamp::UnixTimestamp;

    use crate::constants::{X_PAYMENT_RESPONSE_HEADER, X_PAYMENT_HEADER};
    use crate::facilitator_client::FacilitatorClient;
    use crate::headers::decode_payment_response;

    use super::*;

    const PAY_TO: &str = "8dWkYkFkYBnpPsJLxKXJhWDZv4FH3wSJnVt2KLbU4q2j";

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: EXACT_SCHEME.to_owned(),
            network: "solana-devnet".to_owned(),
            max_amount_required: "1".to_owned(),
            resource: "GET /api/data".to_owned(),
            description: Some("Sample data API (pay-per-call)".to_owned()),
            mime_type: Some("application/json".to_owned()),
            output_schema: None,
            pay_to: PAY_TO.to_owned(),
            max_timeout_seconds: 60,
            asset: "native".to_owned(),
            extra: None,
        }
    }

    fn payment_header() -> String {
        let mut nonce = [0u8; 32];
        rand::rng().fill_bytes(&mut nonce);
        let now = UnixTimestamp::now().as_secs();
        let payload = PaymentPayload {
            x402_version: 1,
            scheme: EXACT_SCHEME.to_owned(),
            network: "solana-devnet".to_owned(),
            payload: ExactSvmPayload {
                signature: "demo".to_owned(),
                authorization: ExactSvmAuthorization {
                    from: "4Nd1mYvtEc2nVTb3C9cMZaC27nGCBqwQfTZTZDDLbvWc".to_owned(),
                    to: PAY_TO.to_owned(),
                    value: "1".to_owned(),
                    valid_after: UnixTimestamp::from_secs(now - 5),
                    valid_before: UnixTimestamp::from_secs(now + 300),
                    nonce: format!(
                        "0x{}",
                        nonce.iter().map(|b| format!("{b:02x}")).collect::<String>()
                    ),
                },
                transaction: None,
            },
        };
        Base64Bytes::encode(serde_json::to_vec(&payload).unwrap()).to_string()
    }

    fn app(facilitator_url: &str) -> Router {
        let client = FacilitatorClient::try_from(facilitator_url).unwrap();
        let table = RouteTable::new().guard(requirements());
        Router::new()
            .route("/api/data", get(|| async { "paid data" }))
            .route("/open", get(|| async { "free data" }))
            .layer(PaymentGuard::new(Arc::new(client), table))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unguarded_routes_pass_through() {
        let app = app("http://127.0.0.1:1");
        let response = app
            .oneshot(Request::builder().uri("/open").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_gets_a_402_challenge() {
        let app = app("http://127.0.0.1:1");
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["x402Version"], 1);
        assert_eq!(body["error"], "X-PAYMENT header is required");
        assert_eq!(body["accepts"][0]["resource"], "GET /api/data");
        assert_eq!(body["accepts"][0]["payTo"], PAY_TO);
    }

    #[tokio::test]
    async fn rejected_payment_surfaces_the_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": false, "invalidReason": "nonce_replay"}),
            ))
            .mount(&server)
            .await;

        let response = app(server.uri().as_str())
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .header(X_PAYMENT_HEADER, payment_header())
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "nonce_replay");
    }

    #[tokio::test]
    async fn paid_request_reaches_the_handler_with_a_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(serde_json::json!({
                "x402Version": 1,
                "paymentRequirements": {"resource": "GET /api/data"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": true, "invalidReason": null}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "error": null,
                "txHash": "5SigNature",
                "networkId": "solana-devnet",
                "payer": "4Nd1mYvtEc2nVTb3C9cMZaC27nGCBqwQfTZTZDDLbvWc",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = app(server.uri().as_str())
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    // Header names are case-insensitive on the wire.
                    .header("X-PAYMENT", payment_header())
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        let receipt = response
            .headers()
            .get(X_PAYMENT_RESPONSE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(decode_payment_response)
            .expect("receipt header present")
            .expect("receipt decodes");
        let SettleResponse::Success { tx_hash, .. } = receipt else {
            panic!("expected success receipt");
        };
        assert_eq!(tx_hash, "5SigNature");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"paid data");
    }

    #[tokio::test]
    async fn settlement_failure_is_a_402() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": true, "invalidReason": null}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "success": false,
                "error": "insufficient_funds",
                "txHash": null,
                "networkId": "solana-devnet",
                "payer": null,
            })))
            .mount(&server)
            .await;

        let response = app(server.uri().as_str())
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .header(X_PAYMENT_HEADER, payment_header())
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "insufficient_funds");
    }

    #[tokio::test]
    async fn unreachable_facilitator_never_admits_the_request() {
        let app = app("http://127.0.0.1:1");
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .header(X_PAYMENT_HEADER, payment_header())
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "payment_verification_failed");
    }
}
