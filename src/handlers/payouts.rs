use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::services::{PayoutOutcome, PayoutRequest};
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayoutBody {
    pub teacher_ref: String,
    pub amount_cents: i64,
    pub description: Option<String>,
}

/// 201 with the new withdrawal, or 200 with the original one when the
/// idempotency key was already used for this payout.
pub async fn request_payout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PayoutBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!("missing {} header", IDEMPOTENCY_KEY_HEADER))
        })?
        .to_string();
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.to_string()))?;

    let outcome = state
        .payouts
        .request_payout(PayoutRequest {
            teacher_ref: body.teacher_ref,
            amount_cents: body.amount_cents,
            description: body.description,
            idempotency_key,
        })
        .await?;

    let response = match outcome {
        PayoutOutcome::Created(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        PayoutOutcome::Replayed(tx) => {
            let mut response = (StatusCode::OK, Json(tx)).into_response();
            response
                .headers_mut()
                .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
            response
        }
    };
    Ok(response)
}
