//! Reconciliation service.
//!
//! Composes the serialization gate, the retry executor and the engine into
//! the single entry point webhook handlers call. The gate is acquired inside
//! each retry attempt, so a released lock is immediately recontested among
//! waiters instead of being held across backoff sleeps.

use std::sync::Arc;
use std::time::Duration;

use coinchart_shared::{Clock, KeyedMutex};
use tokio_retry::RetryIf;

use crate::engine::{ReconcileOutcome, ReconciliationEngine};
use crate::error::{BillingError, BillingResult};
use crate::normalizer::NormalizedEvent;
use crate::retry::LinearBackoff;
use crate::store::CustomerStore;
use crate::update::SubscriptionUpdate;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    /// Deadline for acquiring the per-customer lock within one attempt.
    pub lock_timeout: Duration,
    /// Deadline for one engine execution once the lock is held.
    pub op_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(10),
            op_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ReconciliationService {
    engine: ReconciliationEngine,
    gate: Arc<KeyedMutex>,
    settings: ReconcilerSettings,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn CustomerStore>,
        clock: Arc<dyn Clock>,
        gate: Arc<KeyedMutex>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(store, clock),
            gate,
            settings,
        }
    }

    /// Entry point for a normalized webhook event. `Ok(None)` means the
    /// event was ignored; the caller still acks the delivery.
    pub async fn process(&self, event: NormalizedEvent) -> BillingResult<Option<ReconcileOutcome>> {
        match event {
            NormalizedEvent::Ignored { event_type, reason } => {
                tracing::info!(event_type = %event_type, reason = %reason, "ignoring webhook event");
                Ok(None)
            }
            NormalizedEvent::Update(update) => self.apply(update).await.map(Some),
        }
    }

    /// Runs the engine under the per-customer gate with bounded retries on
    /// conflict-class errors.
    pub async fn apply(&self, update: SubscriptionUpdate) -> BillingResult<ReconcileOutcome> {
        let retries = LinearBackoff::new(self.settings.base_delay)
            .take(self.settings.max_attempts.saturating_sub(1));

        let result = RetryIf::spawn(
            retries,
            || self.attempt(&update),
            BillingError::is_retryable,
        )
        .await;

        match result {
            Err(err) if err.is_retryable() => {
                tracing::error!(
                    key = %update.gate_key(),
                    attempts = self.settings.max_attempts,
                    last_error = %err,
                    "reconciliation retries exhausted"
                );
                Err(BillingError::RetriesExhausted {
                    attempts: self.settings.max_attempts,
                })
            }
            other => other,
        }
    }

    async fn attempt(&self, update: &SubscriptionUpdate) -> BillingResult<ReconcileOutcome> {
        let key = update.gate_key();
        let _guard = self
            .gate
            .acquire_timeout(&key, self.settings.lock_timeout)
            .await
            .ok_or(BillingError::Timeout("waiting for customer lock"))?;

        tokio::time::timeout(self.settings.op_timeout, self.engine.apply(update))
            .await
            .map_err(|_| BillingError::Timeout("applying reconciliation"))?
    }
}
