//! Reconciliation engine.
//!
//! One read-modify-write cycle: resolve the target record (with the
//! subscription-id fallback), merge the normalized update under the
//! field-level precedence rules, and persist through a version-conditioned
//! write. Conflict retries are the caller's job.

use std::sync::Arc;

use coinchart_shared::{
    is_placeholder_wallet, placeholder_wallet, Clock, CustomerRecord, SubscriptionState,
    SubscriptionStatus,
};
use time::{Duration, OffsetDateTime};

use crate::error::BillingResult;
use crate::store::CustomerStore;
use crate::update::{CustomerKey, SubscriptionUpdate, UpdateKind};

/// Default billing period granted when a checkout carries no subscription
/// object to read the real period from.
const DEFAULT_PERIOD: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    /// The update was a duplicate or a no-op; nothing was written.
    Unchanged,
}

pub struct ReconciliationEngine {
    store: Arc<dyn CustomerStore>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn CustomerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies one normalized update. Fails with `WriteConflict` when the
    /// record moved between read and write; safe to re-run from scratch.
    pub async fn apply(&self, update: &SubscriptionUpdate) -> BillingResult<ReconcileOutcome> {
        let now = self.clock.now();

        let mut existing = match &update.customer_key {
            CustomerKey::ProviderCustomer(id) => self.store.find_by_customer_id(id).await?,
            CustomerKey::Wallet(wallet) => self.store.find_by_wallet(wallet).await?,
        };

        // Self-healing path: a record written before we knew its provider
        // customer id is still reachable through the subscription id.
        if existing.is_none() {
            if let Some(subscription_id) = &update.subscription_id {
                if let Some(found) = self.store.find_by_subscription_id(subscription_id).await? {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        record_id = %found.id,
                        "record resolved via subscription id fallback"
                    );
                    existing = Some(found);
                }
            }
        }

        let (current, is_new) = match existing {
            Some(record) => (record, false),
            None => {
                let wallet = update
                    .wallet_address
                    .clone()
                    .unwrap_or_else(|| placeholder_wallet(now));
                (CustomerRecord::minimal(wallet, now), true)
            }
        };

        let mut next = current.clone();
        merge(&mut next, update, now);

        if !is_new && next == current {
            tracing::debug!(record_id = %current.id, "update is a no-op, skipping write");
            return Ok(ReconcileOutcome::Unchanged);
        }

        next.updated_at = now;
        let expected_version = if is_new { None } else { Some(current.version) };
        let stored = self.store.transactional_upsert(next, expected_version).await?;

        let outcome = if is_new {
            ReconcileOutcome::Created
        } else {
            ReconcileOutcome::Updated
        };
        tracing::info!(
            record_id = %stored.id,
            status = %stored.subscription.status,
            outcome = ?outcome,
            "customer record reconciled"
        );
        Ok(outcome)
    }
}

fn merge(record: &mut CustomerRecord, update: &SubscriptionUpdate, now: OffsetDateTime) {
    // Identity and contact only ever grow: a non-empty inbound value wins,
    // absence leaves the field alone.
    if update.customer_id.is_some() {
        record.customer_id = update.customer_id.clone();
    }
    if update.name.is_some() {
        record.name = update.name.clone();
    }
    if update.email.is_some() {
        record.email = update.email.clone();
    }

    // A real wallet address is sticky; only placeholders may be replaced.
    if let Some(wallet) = &update.wallet_address {
        if is_placeholder_wallet(&record.wallet_address) && !is_placeholder_wallet(wallet) {
            record.wallet_address = wallet.clone();
        }
    }

    let sub = &mut record.subscription;
    match update.kind {
        UpdateKind::Checkout => {
            let (start, end) = update.period.unwrap_or((now, now + DEFAULT_PERIOD));
            *sub = SubscriptionState {
                status: if update.subscription_id.is_some() {
                    SubscriptionStatus::Premium
                } else {
                    SubscriptionStatus::Free
                },
                subscription_id: update.subscription_id.clone(),
                period_start_at: Some(start),
                period_end_at: Some(end),
                expiry_date: Some(end),
                cancel_at_period_end: update.cancel_at_period_end.unwrap_or(false),
            };
        }
        UpdateKind::ChargeConfirmed => {
            if let Some(status) = update.status {
                sub.status = status;
            }
            if let Some(cancel) = update.cancel_at_period_end {
                sub.cancel_at_period_end = cancel;
            }
        }
        UpdateKind::SubscriptionSync => {
            if let Some(status) = update.status {
                sub.status = status;
            }
            if update.subscription_id.is_some() {
                sub.subscription_id = update.subscription_id.clone();
            }
            if let Some((start, end)) = update.period {
                sub.period_start_at = Some(start);
                sub.period_end_at = Some(end);
                sub.expiry_date = Some(end);
            }
            if let Some(cancel) = update.cancel_at_period_end {
                sub.cancel_at_period_end = cancel;
            }
        }
        UpdateKind::CancelFlag => {
            if let Some(cancel) = update.cancel_at_period_end {
                sub.cancel_at_period_end = cancel;
            }
        }
        UpdateKind::Reset => {
            *sub = SubscriptionState {
                status: SubscriptionStatus::Free,
                subscription_id: None,
                period_start_at: None,
                period_end_at: None,
                expiry_date: None,
                cancel_at_period_end: true,
            };
        }
    }
}
