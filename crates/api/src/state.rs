//! Application state

use std::sync::Arc;

use coinchart_billing::{BillingService, CustomerStore, PgCustomerStore};
use coinchart_shared::{Clock, SystemClock};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store: Arc<dyn CustomerStore> = Arc::new(PgCustomerStore::new(pool));
        Self::with_store(store, Arc::new(SystemClock), config)
    }

    /// Builds state over any store and clock, used by tests to swap in the
    /// in-memory store.
    pub fn with_store(
        store: Arc<dyn CustomerStore>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        if config.boomfi_webhook_secret.is_some() {
            tracing::info!("BoomFi webhook signature verification enabled");
        } else {
            tracing::warn!(
                "BoomFi webhook signature verification disabled (missing BOOMFI_WEBHOOK_SECRET)"
            );
        }
        if config.boomfi_cancel_flag_inverted {
            tracing::info!("BoomFi cancel flag polarity inverted via config");
        }

        let billing = BillingService::new(store, clock, config.reconciler_settings());
        Self {
            billing: Arc::new(billing),
            config: Arc::new(config),
        }
    }
}
