//! HTTP endpoints implemented by the facilitator.
//!
//! Protocol-critical endpoints (`POST /verify`, `POST /settle`) plus the
//! discovery endpoints (`GET /verify`, `GET /settle`, `GET /supported`) and a
//! health probe. Verification failures answer `400` with the reason string,
//! confirmation timeouts answer `408`, and unclassified faults answer `500`
//! with full context logged but no internals reported to the caller.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocal;
use crate::types::{ErrorResponse, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};

/// Builds the facilitator's route table.
pub fn routes() -> Router<Arc<FacilitatorLocal>> {
    Router::new()
        .route("/verify", get(get_verify_info).post(post_verify))
        .route("/settle", get(get_settle_info).post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
}

/// `GET /verify`: machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "base64-encoded PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "base64-encoded PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: the payment schemes and networks this facilitator
/// serves. Pure, deterministic, no I/O.
#[instrument(skip_all)]
async fn get_supported(State(facilitator): State<Arc<FacilitatorLocal>>) -> impl IntoResponse {
    (StatusCode::OK, Json(facilitator.supported()))
}

/// `GET /health`: liveness probe.
#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `POST /verify`: verification of a proposed payment against the declared
/// requirements. Never submits or sponsors anything.
#[instrument(skip_all)]
async fn post_verify(
    State(facilitator): State<Arc<FacilitatorLocal>>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = ?error,
                merchant = %body.payment_requirements.merchant_id,
                "Verification failed"
            );
            let status = error.status_code();
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                (
                    status,
                    Json(ErrorResponse {
                        error: error.to_string(),
                    }),
                )
                    .into_response()
            } else {
                (
                    status,
                    Json(VerifyResponse::invalid(error.to_string(), None)),
                )
                    .into_response()
            }
        }
    }
}

/// `POST /settle`: execution (or confirmation) of a payment on-chain,
/// typically called after a successful `/verify`.
#[instrument(skip_all)]
async fn post_settle(
    State(facilitator): State<Arc<FacilitatorLocal>>,
    Json(body): Json<SettleRequest>,
) -> impl IntoResponse {
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = ?error,
                merchant = %body.payment_requirements.merchant_id,
                "Settlement failed"
            );
            (
                error.status_code(),
                Json(SettleResponse::failed(
                    error.to_string(),
                    error.transaction_hash(),
                )),
            )
                .into_response()
        }
    }
}
