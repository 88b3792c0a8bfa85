//! Read-only subscription queries backing the frontend polling endpoints.

use std::sync::Arc;

use coinchart_shared::{Clock, CustomerRecord, SubscriptionStatus};
use serde::Serialize;

use crate::error::BillingResult;
use crate::store::CustomerStore;

/// Coarse status report for one wallet. Unknown wallets report `Free`.
#[derive(Debug, Clone, Serialize)]
pub struct WalletStatus {
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub is_active: bool,
}

pub struct SubscriptionQueryService {
    store: Arc<dyn CustomerStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionQueryService {
    pub fn new(store: Arc<dyn CustomerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn status_for_wallet(&self, wallet_address: &str) -> BillingResult<WalletStatus> {
        let wallet = wallet_address.trim().to_lowercase();
        let Some(record) = self.store.find_by_wallet(&wallet).await? else {
            return Ok(WalletStatus {
                status: SubscriptionStatus::Free,
                cancel_at_period_end: false,
                is_active: false,
            });
        };

        let is_active = record.is_active(self.clock.now());
        Ok(WalletStatus {
            status: if is_active {
                SubscriptionStatus::Premium
            } else {
                SubscriptionStatus::Free
            },
            cancel_at_period_end: record.subscription.cancel_at_period_end,
            is_active,
        })
    }

    /// Record lookup by provider subscription id, with the derived activity
    /// flag computed at call time.
    pub async fn record_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<(CustomerRecord, bool)>> {
        let Some(record) = self.store.find_by_subscription_id(subscription_id).await? else {
            return Ok(None);
        };
        let is_active = record.is_active(self.clock.now());
        Ok(Some((record, is_active)))
    }
}
