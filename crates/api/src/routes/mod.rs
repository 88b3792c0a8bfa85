//! HTTP route definitions.

pub mod subscription;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stripe/webhook", post(webhooks::stripe_webhook))
        .route("/api/subscription/webhook", post(webhooks::boomfi_webhook))
        .route(
            "/api/subscription/status/{wallet}",
            get(subscription::wallet_status),
        )
        .route(
            "/api/subscription/by-subscription/{subscription_id}",
            get(subscription::by_subscription_id),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
