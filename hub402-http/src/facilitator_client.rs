//! HTTP client for a remote facilitator.
//!
//! Used by the Guard to reach its facilitator's `/verify` and `/settle`
//! endpoints, and by the facilitator itself (strict verification mode) to
//! consult a reference implementation.
//!
//! A settlement failure arrives as HTTP 500 with a settle wire body; the
//! client decodes that into [`SettleResponse::Failed`] rather than an
//! error, so callers see the stable reason token.

use std::time::Duration;

use http::StatusCode;
use url::Url;

use hub402::facilitator::Facilitator;
use hub402::proto::{
    SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse,
};

/// Header carrying the optional facilitator API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Errors talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// The base URL could not be parsed.
    #[error("{context}: invalid URL: {source}")]
    UrlParse {
        /// Which operation was attempted.
        context: &'static str,
        /// Underlying parse failure.
        source: url::ParseError,
    },
    /// The request never produced a response.
    #[error("{context}: request failed: {source}")]
    Http {
        /// Which operation was attempted.
        context: &'static str,
        /// Underlying transport failure.
        source: reqwest::Error,
    },
    /// The facilitator answered with an unexpected status.
    #[error("{context}: unexpected response {status}: {body}")]
    HttpStatus {
        /// Which operation was attempted.
        context: &'static str,
        /// Response status code.
        status: StatusCode,
        /// Response body, for server-side logs only.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("{context}: cannot decode response: {source}")]
    Json {
        /// Which operation was attempted.
        context: &'static str,
        /// Underlying decode failure.
        source: reqwest::Error,
    },
}

/// Client for one facilitator base URL.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: Url,
    client: reqwest::Client,
    timeout: Option<Duration>,
    api_key: Option<String>,
}

impl FacilitatorClient {
    /// Creates a client for the given base URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout: None,
            api_key: None,
        }
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches an `x-api-key` header to every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// The configured facilitator base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(
        &self,
        path: &str,
        context: &'static str,
    ) -> Result<Url, FacilitatorClientError> {
        self.base_url
            .join(path)
            .map_err(|source| FacilitatorClientError::UrlParse { context, source })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }
        builder
    }

    async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        B: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(path, context)?;
        let response = self
            .request(self.client.post(url).json(body))
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        if response.status() == StatusCode::OK {
            response
                .json::<R>()
                .await
                .map_err(|source| FacilitatorClientError::Json { context, source })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }

    /// Probes the facilitator's `/health` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport failure.
    pub async fn health(&self) -> Result<serde_json::Value, FacilitatorClientError> {
        let context = "GET /health";
        let url = self.endpoint("health", context)?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        response
            .json()
            .await
            .map_err(|source| FacilitatorClientError::Json { context, source })
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize to exactly one trailing slash so Url::join appends.
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorClientError::UrlParse {
            context: "parse base URL",
            source,
        })?;
        Ok(Self::new(url))
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        self.post_json("verify", request, "POST /verify").await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let context = "POST /settle";
        let url = self.endpoint("settle", context)?;
        let response = self
            .request(self.client.post(url).json(request))
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        let status = response.status();
        if status == StatusCode::OK {
            return response
                .json::<SettleResponse>()
                .await
                .map_err(|source| FacilitatorClientError::Json { context, source });
        }
        // Settlement failures come back as 500 with the settle wire body;
        // surface them as a Failed response, not a transport error.
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            if let Ok(settle) = serde_json::from_str::<SettleResponse>(&body) {
                return Ok(settle);
            }
        }
        Err(FacilitatorClientError::HttpStatus {
            context,
            status,
            body,
        })
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        let context = "GET /supported";
        let url = self.endpoint("supported", context)?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        if response.status() == StatusCode::OK {
            response
                .json()
                .await
                .map_err(|source| FacilitatorClientError::Json { context, source })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use hub402::proto::{InvalidReason, PaymentRequirements, SettleErrorReason};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_owned(),
            network: "solana-devnet".to_owned(),
            max_amount_required: "1".to_owned(),
            resource: "GET /api/data".to_owned(),
            description: None,
            mime_type: None,
            output_schema: None,
            pay_to: "PayTo".to_owned(),
            max_timeout_seconds: 60,
            asset: "native".to_owned(),
            extra: None,
        }
    }

    fn verify_request() -> VerifyRequest {
        VerifyRequest {
            x402_version: 1,
            payment_header: "aGVhZGVy".to_owned(),
            payment_requirements: requirements(),
        }
    }

    #[tokio::test]
    async fn verify_round_trips_verdicts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(serde_json::json!({"x402Version": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": false, "invalidReason": "nonce_replay"}),
            ))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let verdict = client.verify(&verify_request()).await.unwrap();
        assert_eq!(verdict, VerifyResponse::invalid(InvalidReason::NonceReplay));
    }

    #[tokio::test]
    async fn settle_decodes_failure_bodies() {
        let server = MockServer::start().await;
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

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let settle = client.settle(&verify_request().into()).await.unwrap();
        let SettleResponse::Failed { error, .. } = settle else {
            panic!("expected failed settlement");
        };
        assert_eq!(error, SettleErrorReason::InsufficientFunds);
    }

    #[tokio::test]
    async fn api_key_is_attached_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .and(header("x-api-key", "sekret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kinds": [{"scheme": "exact", "network": "solana-devnet"}],
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str())
            .unwrap()
            .with_api_key("sekret".to_owned());
        let supported = client.supported().await.unwrap();
        assert_eq!(supported.kinds.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_facilitator_is_a_transport_error() {
        let client = FacilitatorClient::try_from("http://127.0.0.1:1").unwrap();
        let err = client.verify(&verify_request()).await.unwrap_err();
        assert!(matches!(err, FacilitatorClientError::Http { .. }));
    }
}
