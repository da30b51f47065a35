//! The verify-then-settle lifecycle for one guarded request.

use std::convert::Infallible;

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::{HeaderValue, StatusCode};
use tower::Service;
use tower::util::BoxCloneSyncService;

use hub402::facilitator::Facilitator;
use hub402::proto::{
    PaymentRequired, PaymentRequirements, SettleResponse, V1, VerifyRequest, VerifyResponse,
};

use crate::constants::{X_PAYMENT_HEADER, X_PAYMENT_RESPONSE_HEADER};
use crate::headers::encode_payment_response;

/// Runs the payment lifecycle for a request whose route is guarded.
pub(crate) async fn handle_guarded<F>(
    facilitator: &F,
    requirements: PaymentRequirements,
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Response
where
    F: Facilitator + Sync,
{
    let Some(payment_header) = req
        .headers()
        .get(X_PAYMENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
    else {
        return payment_required("X-PAYMENT header is required", &requirements);
    };

    let verify_request = VerifyRequest {
        x402_version: 1,
        payment_header,
        payment_requirements: requirements.clone(),
    };

    match facilitator.verify(&verify_request).await {
        Ok(VerifyResponse::Valid) => {}
        Ok(VerifyResponse::Invalid { reason }) => {
            tracing::warn!(%reason, resource = %requirements.resource, "payment rejected");
            return payment_required(reason.as_str(), &requirements);
        }
        Ok(_) => {
            return payment_required("payment_verification_failed", &requirements);
        }
        Err(error) => {
            // Transport detail stays server-side; the client only learns
            // that verification did not happen.
            tracing::warn!(error = %error, resource = %requirements.resource, "payment verification unavailable");
            return payment_required("payment_verification_failed", &requirements);
        }
    }

    let settlement = match facilitator.settle(&verify_request.into()).await {
        Ok(settlement @ SettleResponse::Success { .. }) => settlement,
        Ok(SettleResponse::Failed { error, .. }) => {
            tracing::error!(%error, resource = %requirements.resource, "payment settlement failed");
            return payment_required(error.as_str(), &requirements);
        }
        Ok(_) => return internal_error(),
        Err(error) => {
            tracing::error!(error = %error, resource = %requirements.resource, "payment settlement unavailable");
            return internal_error();
        }
    };

    let receipt = match encode_payment_response(&settlement)
        .ok()
        .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
    {
        Some(value) => value,
        None => return internal_error(),
    };

    // The receipt is decided before the protected handler runs; it is
    // attached to whatever response the handler produces.
    let mut response = match inner.call(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    };
    response
        .headers_mut()
        .insert(X_PAYMENT_RESPONSE_HEADER, receipt);
    response
}

/// A 402 challenge body listing the acceptable payment terms.
fn payment_required(error: &str, requirements: &PaymentRequirements) -> Response {
    let body = PaymentRequired {
        x402_version: V1,
        error: Some(error.to_owned()),
        accepts: vec![requirements.clone()],
    };
    json_response(StatusCode::PAYMENT_REQUIRED, &body)
}

fn internal_error() -> Response {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({"error": "internal_error"}),
    )
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("response construction cannot fail")
}
