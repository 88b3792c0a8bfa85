//! Read-only subscription endpoints polled by the frontend.

use axum::extract::{Path, State};
use axum::Json;
use coinchart_billing::WalletStatus;
use coinchart_shared::CustomerRecord;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Customer record plus the activity flag derived at request time.
#[derive(Debug, Serialize)]
pub struct SubscriptionRecordView {
    #[serde(flatten)]
    pub record: CustomerRecord,
    pub is_active: bool,
}

/// Handles `GET /api/subscription/status/{wallet}`.
pub async fn wallet_status(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<WalletStatus>> {
    let status = state.billing.queries.status_for_wallet(&wallet).await?;
    Ok(Json(status))
}

/// Handles `GET /api/subscription/by-subscription/{subscription_id}`.
pub async fn by_subscription_id(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> ApiResult<Json<SubscriptionRecordView>> {
    let (record, is_active) = state
        .billing
        .queries
        .record_by_subscription_id(&subscription_id)
        .await?
        .ok_or(ApiError::NotFound("no record for subscription id"))?;
    Ok(Json(SubscriptionRecordView { record, is_active }))
}
