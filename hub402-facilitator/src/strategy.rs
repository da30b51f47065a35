//! Verification strategy wiring.
//!
//! The strategy is chosen once at startup from configuration, not per
//! request: a configured `STRICT_VERIFIER_URL` selects the strict path
//! delegating protocol checks to a reference facilitator over HTTP; the
//! verifier falls back to its local checks when that delegate is
//! unreachable.

use std::sync::Arc;

use url::Url;

use hub402::facilitator::Facilitator as _;
use hub402::proto::{PaymentPayload, PaymentRequirements, VerifyRequest, VerifyResponse};
use hub402_http::FacilitatorClient;
use hub402_http::headers::encode_payment_payload;
use hub402_svm::exact::{DelegateError, VerificationStrategy, VerifyDelegate};

/// [`VerifyDelegate`] over a reference facilitator's `/verify` endpoint.
#[derive(Debug)]
pub struct StrictHttpDelegate {
    client: FacilitatorClient,
}

impl StrictHttpDelegate {
    /// Creates a delegate talking to `url`.
    #[must_use]
    pub fn new(url: &Url) -> Self {
        let client = FacilitatorClient::try_from(url.as_str())
            .expect("an already-parsed URL stays parseable after normalization");
        Self { client }
    }
}

#[async_trait::async_trait]
impl VerifyDelegate for StrictHttpDelegate {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, DelegateError> {
        let payment_header =
            encode_payment_payload(payload).map_err(|e| DelegateError(e.to_string()))?;
        let request = VerifyRequest {
            x402_version: 1,
            payment_header,
            payment_requirements: requirements.clone(),
        };
        self.client
            .verify(&request)
            .await
            .map_err(|e| DelegateError(e.to_string()))
    }
}

/// Builds the strategy from the optional strict-verifier URL.
#[must_use]
pub fn build_strategy(strict_verifier_url: Option<&Url>) -> VerificationStrategy {
    match strict_verifier_url {
        Some(url) => {
            tracing::info!(delegate = %url, "strict verification enabled");
            VerificationStrategy::Strict(Arc::new(StrictHttpDelegate::new(url)))
        }
        None => VerificationStrategy::Local,
    }
}
