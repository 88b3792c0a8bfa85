//! Webhook ingestion endpoints.
//!
//! Both endpoints take the raw body so the signature is computed over the
//! exact bytes the provider sent. Ignored events still ack with 200, the
//! provider redelivers on anything else.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;

use coinchart_billing::{
    BoomFiNormalizer, BoomFiWebhook, NormalizedEvent, Normalizer, StripeEvent,
    StripeEventEnvelope, StripeNormalizer,
};

use crate::error::{ApiError, ApiResult};
use crate::signature::{verify_boomfi_signature, verify_stripe_signature};
use crate::state::AppState;

/// Ack body returned for every accepted delivery.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Handles `POST /api/stripe/webhook`.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::InvalidSignature("missing stripe-signature header"))?;
    verify_stripe_signature(
        &state.config.stripe_webhook_secret,
        signature,
        &body,
        OffsetDateTime::now_utc().unix_timestamp(),
    )?;

    let envelope: StripeEventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidPayload(format!("malformed webhook envelope: {e}")))?;
    tracing::info!(
        event_id = %envelope.id,
        event_type = %envelope.event_type,
        "stripe webhook received"
    );

    let event = StripeEvent::classify(envelope)?;
    let normalized = StripeNormalizer.normalize(event)?;
    dispatch(&state, normalized).await
}

/// Handles `POST /api/subscription/webhook` (BoomFi).
pub async fn boomfi_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    if let Some(secret) = &state.config.boomfi_webhook_secret {
        let signature = headers
            .get("x-boomfi-signature")
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::InvalidSignature(
                "missing x-boomfi-signature header",
            ))?;
        verify_boomfi_signature(secret, signature, &body)?;
    }

    let webhook: BoomFiWebhook = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidPayload(format!("malformed webhook payload: {e}")))?;
    tracing::info!(event = %webhook.event, "boomfi webhook received");

    let normalizer = BoomFiNormalizer::new(state.config.boomfi_cancel_flag_inverted);
    let normalized = normalizer.normalize(webhook)?;
    dispatch(&state, normalized).await
}

async fn dispatch(state: &AppState, normalized: NormalizedEvent) -> ApiResult<Json<WebhookAck>> {
    let outcome = state.billing.reconciler.process(normalized).await?;
    tracing::info!(outcome = ?outcome, "webhook processed");
    Ok(Json(WebhookAck { received: true }))
}
