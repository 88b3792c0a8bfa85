// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Subscription Reconciliation
//!
//! Tests critical boundary conditions and race conditions in:
//! - Event normalization (REC-N01 to REC-N10)
//! - Reconciliation engine merge rules (REC-E01 to REC-E09)
//! - Per-customer serialization (REC-C01 to REC-C02)
//! - Conflict retries (REC-T01 to REC-T03)
//! - Read queries (REC-Q01 to REC-Q03)
//! - Store invariants (REC-I01 to REC-I02)

use std::sync::Arc;

use coinchart_shared::{Clock, CustomerRecord, KeyedMutex, ManualClock, SubscriptionStatus};
use time::macros::datetime;
use time::OffsetDateTime;

use crate::normalizer::{BoomFiNormalizer, NormalizedEvent, Normalizer, StripeNormalizer};
use crate::providers::boomfi::BoomFiWebhook;
use crate::providers::stripe::{StripeEvent, StripeEventEnvelope};
use crate::service::{ReconcilerSettings, ReconciliationService};
use crate::store::{CustomerStore, InMemoryCustomerStore};
use crate::update::SubscriptionUpdate;

const TEST_NOW: OffsetDateTime = datetime!(2024-06-01 00:00:00 UTC);

fn test_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(5),
        lock_timeout: std::time::Duration::from_secs(1),
        op_timeout: std::time::Duration::from_secs(1),
    }
}

fn service_over(store: Arc<dyn CustomerStore>, clock: Arc<ManualClock>) -> ReconciliationService {
    ReconciliationService::new(store, clock, Arc::new(KeyedMutex::new()), test_settings())
}

fn stripe_event(value: serde_json::Value) -> StripeEvent {
    let envelope: StripeEventEnvelope = serde_json::from_value(value).unwrap();
    StripeEvent::classify(envelope).unwrap()
}

fn normalize_stripe(value: serde_json::Value) -> NormalizedEvent {
    StripeNormalizer.normalize(stripe_event(value)).unwrap()
}

fn expect_update(event: NormalizedEvent) -> SubscriptionUpdate {
    match event {
        NormalizedEvent::Update(update) => update,
        NormalizedEvent::Ignored { event_type, reason } => {
            panic!("expected an update, got Ignored({event_type}: {reason})")
        }
    }
}

fn paid_checkout_json(customer: &str, subscription: &str, wallet: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "evt_checkout",
        "type": "checkout.session.completed",
        "created": 1717200000,
        "data": { "object": {
            "customer": customer,
            "payment_status": "paid",
            "subscription": subscription,
            "custom_fields": [{
                "key": "walletaddressforpremiumaccessonthewebsite",
                "type": "text",
                "label": { "custom": "Wallet address for premium access on the website" },
                "text": { "value": wallet }
            }],
            "customer_details": { "email": "ada@example.com", "name": "Ada" }
        }}
    })
}

fn subscription_event_json(
    event_type: &str,
    subscription: &str,
    customer: &str,
    status: &str,
    period_end_unix: i64,
) -> serde_json::Value {
    serde_json::json!({
        "id": "evt_sub",
        "type": event_type,
        "created": 1717200000,
        "data": { "object": {
            "id": subscription,
            "customer": customer,
            "status": status,
            "current_period_start": 1717200000i64,
            "current_period_end": period_end_unix,
            "cancel_at_period_end": false
        }}
    })
}

mod normalizer_tests {
    use super::*;
    use crate::error::BillingError;
    use crate::update::{CustomerKey, UpdateKind};

    // =========================================================================
    // REC-N01: Paid checkout with wallet custom field - full update
    // =========================================================================
    #[test]
    fn paid_checkout_produces_checkout_update() {
        let update = expect_update(normalize_stripe(paid_checkout_json("cus_1", "sub_1", "0xABC")));
        assert_eq!(update.kind, UpdateKind::Checkout);
        assert_eq!(
            update.customer_key,
            CustomerKey::ProviderCustomer("cus_1".to_string())
        );
        assert_eq!(update.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(update.wallet_address.as_deref(), Some("0xabc"), "wallet lowercased");
        assert_eq!(update.email.as_deref(), Some("ada@example.com"));
    }

    // =========================================================================
    // REC-N02: Unpaid checkout - ignored, never reaches the engine
    // =========================================================================
    #[test]
    fn unpaid_checkout_is_ignored() {
        let mut payload = paid_checkout_json("cus_1", "sub_1", "0xABC");
        payload["data"]["object"]["payment_status"] = serde_json::json!("unpaid");
        match normalize_stripe(payload) {
            NormalizedEvent::Ignored { reason, .. } => {
                assert_eq!(reason, "payment not completed");
            }
            NormalizedEvent::Update(_) => panic!("unpaid checkout must be ignored"),
        }
    }

    // =========================================================================
    // REC-N03: Checkout without customer - invalid payload
    // =========================================================================
    #[test]
    fn checkout_without_customer_is_invalid() {
        let mut payload = paid_checkout_json("cus_1", "sub_1", "0xABC");
        payload["data"]["object"]
            .as_object_mut()
            .unwrap()
            .remove("customer");
        let result = StripeNormalizer.normalize(stripe_event(payload));
        assert!(matches!(result, Err(BillingError::InvalidPayload(_))));
    }

    // =========================================================================
    // REC-N04: Wallet extraction falls back from key to label to metadata
    // =========================================================================
    #[test]
    fn wallet_extraction_precedence() {
        // Label match when the known key is absent.
        let by_label = serde_json::json!({
            "id": "evt_1", "type": "checkout.session.completed", "created": 0,
            "data": { "object": {
                "customer": "cus_1", "payment_status": "paid",
                "custom_fields": [{
                    "key": "somethingelse", "type": "text",
                    "label": { "custom": "Your Wallet Address here" },
                    "text": { "value": "0xFromLabel" }
                }]
            }}
        });
        let update = expect_update(normalize_stripe(by_label));
        assert_eq!(update.wallet_address.as_deref(), Some("0xfromlabel"));

        // Metadata when no custom field matches.
        let by_metadata = serde_json::json!({
            "id": "evt_2", "type": "checkout.session.completed", "created": 0,
            "data": { "object": {
                "customer": "cus_1", "payment_status": "paid",
                "metadata": { "wallet_address": "0xFromMeta" }
            }}
        });
        let update = expect_update(normalize_stripe(by_metadata));
        assert_eq!(update.wallet_address.as_deref(), Some("0xfrommeta"));
    }

    // =========================================================================
    // REC-N05: Charge without invoice - one-off payment, ignored
    // =========================================================================
    #[test]
    fn charge_without_invoice_is_ignored() {
        let payload = serde_json::json!({
            "id": "evt_charge", "type": "charge.succeeded", "created": 0,
            "data": { "object": { "customer": "cus_1" } }
        });
        assert!(matches!(
            normalize_stripe(payload),
            NormalizedEvent::Ignored { .. }
        ));
    }

    // =========================================================================
    // REC-N06: Unknown event type - ignored with the type preserved
    // =========================================================================
    #[test]
    fn unknown_event_type_is_ignored() {
        let payload = serde_json::json!({
            "id": "evt_x", "type": "invoice.finalized", "created": 0,
            "data": { "object": {} }
        });
        match normalize_stripe(payload) {
            NormalizedEvent::Ignored { event_type, .. } => {
                assert_eq!(event_type, "invoice.finalized");
            }
            NormalizedEvent::Update(_) => panic!("unknown event must be ignored"),
        }
    }

    // =========================================================================
    // REC-N07: Unknown provider status string - invalid payload
    // =========================================================================
    #[test]
    fn unknown_subscription_status_is_invalid() {
        let payload = subscription_event_json(
            "customer.subscription.updated",
            "sub_1",
            "cus_1",
            "hibernating",
            1719800000,
        );
        let result = StripeNormalizer.normalize(stripe_event(payload));
        assert!(matches!(result, Err(BillingError::InvalidPayload(_))));
    }

    // =========================================================================
    // REC-N08: BoomFi payload without wallet - rejected, nothing touched
    // =========================================================================
    #[test]
    fn boomfi_without_wallet_is_invalid() {
        let webhook: BoomFiWebhook = serde_json::from_value(serde_json::json!({
            "event": "Invoice.Updated",
            "payment_status": "Succeeded",
            "customer": { "id": "bf_1", "email": "x@y.z", "name": "X" }
        }))
        .unwrap();
        let result = BoomFiNormalizer::default().normalize(webhook);
        assert!(matches!(result, Err(BillingError::InvalidPayload(_))));
    }

    // =========================================================================
    // REC-N09: BoomFi succeeded invoice - premium sync with item period
    // =========================================================================
    #[test]
    fn boomfi_succeeded_invoice_promotes() {
        let webhook: BoomFiWebhook = serde_json::from_value(serde_json::json!({
            "event": "Invoice.Updated",
            "payment_status": "Succeeded",
            "customer": { "id": "bf_1", "wallet_address": "0xDEF", "name": "Bo" },
            "invoice_items": [{
                "subscription": { "id": "bf_sub_1" },
                "period_start_at": "2024-06-01T00:00:00Z",
                "period_end_at": "2024-07-01T00:00:00Z"
            }]
        }))
        .unwrap();
        let update = expect_update(BoomFiNormalizer::default().normalize(webhook).unwrap());
        assert_eq!(update.kind, UpdateKind::SubscriptionSync);
        assert_eq!(update.customer_key, CustomerKey::Wallet("0xdef".to_string()));
        assert_eq!(update.subscription_id.as_deref(), Some("bf_sub_1"));
        assert_eq!(update.status, Some(SubscriptionStatus::Premium));
        assert_eq!(update.cancel_at_period_end, Some(false));
        let (start, end) = update.period.unwrap();
        assert_eq!(start, datetime!(2024-06-01 00:00:00 UTC));
        assert_eq!(end, datetime!(2024-07-01 00:00:00 UTC));
    }

    // =========================================================================
    // REC-N10: BoomFi cancel-flag polarity honors the inversion config
    // =========================================================================
    #[test]
    fn boomfi_cancel_flag_polarity_is_configurable() {
        let payload = serde_json::json!({
            "event": "Subscription.Updated",
            "customer": { "wallet_address": "0xdef" },
            "cancel_at_period_end": true
        });

        let verbatim: BoomFiWebhook = serde_json::from_value(payload.clone()).unwrap();
        let update = expect_update(BoomFiNormalizer::new(false).normalize(verbatim).unwrap());
        assert_eq!(update.cancel_at_period_end, Some(true));

        let inverted: BoomFiWebhook = serde_json::from_value(payload).unwrap();
        let update = expect_update(BoomFiNormalizer::new(true).normalize(inverted).unwrap());
        assert_eq!(update.cancel_at_period_end, Some(false));
    }
}

mod engine_tests {
    use super::*;
    use crate::engine::ReconcileOutcome;
    use crate::update::{CustomerKey, UpdateKind};
    use time::Duration;

    async fn apply_stripe(
        service: &ReconciliationService,
        payload: serde_json::Value,
    ) -> Option<ReconcileOutcome> {
        service.process(normalize_stripe(payload)).await.unwrap()
    }

    // =========================================================================
    // REC-E01: New paid customer - created as Premium with lowercased wallet
    // =========================================================================
    #[tokio::test]
    async fn new_paid_customer_scenario() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        let outcome = apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xABC")).await;
        assert_eq!(outcome, Some(ReconcileOutcome::Created));

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.subscription.status, SubscriptionStatus::Premium);
        assert_eq!(record.subscription.subscription_id.as_deref(), Some("sub_1"));
        assert!(!record.subscription.cancel_at_period_end);
        assert_eq!(record.wallet_address, "0xabc");
        // Default period when the checkout carries no subscription object.
        assert_eq!(record.subscription.period_start_at, Some(TEST_NOW));
        assert_eq!(
            record.subscription.period_end_at,
            Some(TEST_NOW + Duration::days(30))
        );
        assert_eq!(
            record.subscription.expiry_date,
            record.subscription.period_end_at
        );
    }

    // =========================================================================
    // REC-E02: Same checkout delivered twice - second application is a no-op
    // =========================================================================
    #[tokio::test]
    async fn duplicate_checkout_is_idempotent() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        let payload = paid_checkout_json("cus_1", "sub_1", "0xABC");
        apply_stripe(&service, payload.clone()).await;
        let second = apply_stripe(&service, payload).await;
        assert_eq!(second, Some(ReconcileOutcome::Unchanged));

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.version, 1, "no redundant write happened");
    }

    // =========================================================================
    // REC-E03: Duplicate charge.succeeded on a Premium record - unchanged
    // =========================================================================
    #[tokio::test]
    async fn duplicate_charge_is_noop() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xABC")).await;
        let charge = serde_json::json!({
            "id": "evt_charge", "type": "charge.succeeded", "created": 0,
            "data": { "object": {
                "customer": "cus_1",
                "invoice": "in_1",
                "billing_details": { "email": "ada@example.com", "name": "Ada" }
            }}
        });
        let first = apply_stripe(&service, charge.clone()).await;
        assert_eq!(first, Some(ReconcileOutcome::Unchanged));
        let again = apply_stripe(&service, charge).await;
        assert_eq!(again, Some(ReconcileOutcome::Unchanged));
    }

    // =========================================================================
    // REC-E04: Fallback lookup by subscription id backfills the customer id
    // =========================================================================
    #[tokio::test]
    async fn fallback_lookup_backfills_customer_id() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));

        let mut seeded = CustomerRecord::minimal("0xfee".to_string(), TEST_NOW);
        seeded.subscription.subscription_id = Some("sub_2".to_string());
        let seeded = store.transactional_upsert(seeded, None).await.unwrap();

        let service = service_over(store.clone(), clock);
        let outcome = apply_stripe(
            &service,
            subscription_event_json(
                "customer.subscription.updated",
                "sub_2",
                "cus_9",
                "active",
                1719800000,
            ),
        )
        .await;
        assert_eq!(outcome, Some(ReconcileOutcome::Updated));

        let record = store.find_by_customer_id("cus_9").await.unwrap().unwrap();
        assert_eq!(record.id, seeded.id, "existing record was reused, not duplicated");
        assert_eq!(record.subscription.status, SubscriptionStatus::Active);
    }

    // =========================================================================
    // REC-E05: Cancellation then reactivation - Free, then Premium again
    // =========================================================================
    #[tokio::test]
    async fn cancellation_then_reactivation() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xABC")).await;
        apply_stripe(
            &service,
            subscription_event_json(
                "customer.subscription.deleted",
                "sub_1",
                "cus_1",
                "canceled",
                1719800000,
            ),
        )
        .await;

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.subscription.status, SubscriptionStatus::Free);
        assert!(record.subscription.cancel_at_period_end);
        assert!(record.subscription.subscription_id.is_none());
        assert!(record.subscription.period_start_at.is_none());
        assert!(record.subscription.period_end_at.is_none());
        assert!(record.subscription.expiry_date.is_none());

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_3", "0xABC")).await;
        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.subscription.status, SubscriptionStatus::Premium);
        assert_eq!(record.subscription.subscription_id.as_deref(), Some("sub_3"));
        assert!(!record.subscription.cancel_at_period_end);
        assert!(record.subscription.period_end_at.is_some());
    }

    // =========================================================================
    // REC-E06: Full reset clears period data regardless of prior state
    // =========================================================================
    #[tokio::test]
    async fn full_reset_from_any_state() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        apply_stripe(
            &service,
            subscription_event_json(
                "customer.subscription.created",
                "sub_1",
                "cus_1",
                "past_due",
                1719800000,
            ),
        )
        .await;
        apply_stripe(
            &service,
            subscription_event_json(
                "customer.subscription.deleted",
                "sub_1",
                "cus_1",
                "canceled",
                1719800000,
            ),
        )
        .await;

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.subscription.status, SubscriptionStatus::Free);
        assert!(record.subscription.cancel_at_period_end);
        assert!(record.subscription.period_start_at.is_none());
        assert!(record.subscription.period_end_at.is_none());
        assert!(record.subscription.expiry_date.is_none());
    }

    // =========================================================================
    // REC-E07: A real wallet address is sticky
    // =========================================================================
    #[tokio::test]
    async fn real_wallet_is_never_replaced() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xOriginal")).await;

        let mut update = SubscriptionUpdate::new(
            CustomerKey::ProviderCustomer("cus_1".to_string()),
            UpdateKind::SubscriptionSync,
        );
        update.customer_id = Some("cus_1".to_string());
        update.wallet_address = Some("0xintruder".to_string());
        update.status = Some(SubscriptionStatus::Active);
        service.apply(update).await.unwrap();

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.wallet_address, "0xoriginal");
    }

    // =========================================================================
    // REC-E08: A placeholder wallet is replaced by the first real address
    // =========================================================================
    #[tokio::test]
    async fn placeholder_wallet_is_replaced() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        // Charge for an unseen customer creates a record with no wallet.
        let charge = serde_json::json!({
            "id": "evt_charge", "type": "charge.succeeded", "created": 0,
            "data": { "object": { "customer": "cus_1", "invoice": "in_1" } }
        });
        apply_stripe(&service, charge).await;
        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert!(record.wallet_address.starts_with("no-wallet-"));

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xReal")).await;
        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.wallet_address, "0xreal");
    }

    // =========================================================================
    // REC-E09: Contact info only grows, never shrinks
    // =========================================================================
    #[tokio::test]
    async fn contact_fill_is_monotonic() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        apply_stripe(&service, paid_checkout_json("cus_1", "sub_1", "0xABC")).await;

        // A sync update with no contact fields leaves contact alone.
        apply_stripe(
            &service,
            subscription_event_json(
                "customer.subscription.updated",
                "sub_1",
                "cus_1",
                "active",
                1719800000,
            ),
        )
        .await;

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(record.email.as_deref(), Some("ada@example.com"));
        assert_eq!(record.name.as_deref(), Some("Ada"));
    }
}

mod concurrency_tests {
    use super::*;
    use crate::update::{CustomerKey, UpdateKind};
    use time::Duration;
    use tokio::sync::Barrier;

    fn sync_update(period_end: OffsetDateTime) -> SubscriptionUpdate {
        let mut update = SubscriptionUpdate::new(
            CustomerKey::ProviderCustomer("cus_1".to_string()),
            UpdateKind::SubscriptionSync,
        );
        update.customer_id = Some("cus_1".to_string());
        update.subscription_id = Some("sub_1".to_string());
        update.status = Some(SubscriptionStatus::Active);
        update.period = Some((TEST_NOW, period_end));
        update.cancel_at_period_end = Some(false);
        update
    }

    // =========================================================================
    // REC-C01: Concurrent updates to one customer - no lost writes
    // =========================================================================
    #[tokio::test]
    async fn concurrent_same_customer_updates_serialize() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = Arc::new(service_over(store.clone(), clock));

        // Seed the record so every task takes the update path.
        service.apply(sync_update(TEST_NOW + Duration::days(1))).await.unwrap();

        let tasks = 6;
        let barrier = Arc::new(Barrier::new(tasks));
        let mut handles = Vec::new();
        for i in 0..tasks {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let period_end = TEST_NOW + Duration::days(2 + i as i64);
                service.apply(sync_update(period_end)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.find_by_customer_id("cus_1").await.unwrap().unwrap();
        // One create plus six distinct updates, each applied exactly once.
        assert_eq!(record.version, 1 + tasks as i64);
        assert_eq!(record.subscription.expiry_date, record.subscription.period_end_at);
    }

    // =========================================================================
    // REC-C02: Updates for different customers proceed concurrently
    // =========================================================================
    #[tokio::test]
    async fn different_customers_do_not_contend() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = Arc::new(service_over(store.clone(), clock));

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let mut update = SubscriptionUpdate::new(
                    CustomerKey::ProviderCustomer(format!("cus_{i}")),
                    UpdateKind::ChargeConfirmed,
                );
                update.customer_id = Some(format!("cus_{i}"));
                update.status = Some(SubscriptionStatus::Premium);
                update.cancel_at_period_end = Some(false);
                service.apply(update).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list_all().await.unwrap().len(), 8);
    }
}

mod retry_tests {
    use super::*;
    use crate::error::{BillingError, BillingResult};
    use crate::update::{CustomerKey, UpdateKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store wrapper that fails the first N writes with a conflict.
    struct ConflictingStore {
        inner: InMemoryCustomerStore,
        conflicts_remaining: AtomicUsize,
        write_attempts: AtomicUsize,
    }

    impl ConflictingStore {
        fn new(conflicts: usize) -> Self {
            Self {
                inner: InMemoryCustomerStore::new(),
                conflicts_remaining: AtomicUsize::new(conflicts),
                write_attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CustomerStore for ConflictingStore {
        async fn find_by_customer_id(
            &self,
            customer_id: &str,
        ) -> BillingResult<Option<CustomerRecord>> {
            self.inner.find_by_customer_id(customer_id).await
        }

        async fn find_by_subscription_id(
            &self,
            subscription_id: &str,
        ) -> BillingResult<Option<CustomerRecord>> {
            self.inner.find_by_subscription_id(subscription_id).await
        }

        async fn find_by_wallet(
            &self,
            wallet_address: &str,
        ) -> BillingResult<Option<CustomerRecord>> {
            self.inner.find_by_wallet(wallet_address).await
        }

        async fn transactional_upsert(
            &self,
            record: CustomerRecord,
            expected_version: Option<i64>,
        ) -> BillingResult<CustomerRecord> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .conflicts_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(BillingError::WriteConflict);
            }
            self.inner.transactional_upsert(record, expected_version).await
        }

        async fn list_all(&self) -> BillingResult<Vec<CustomerRecord>> {
            self.inner.list_all().await
        }
    }

    fn charge_update() -> SubscriptionUpdate {
        let mut update = SubscriptionUpdate::new(
            CustomerKey::ProviderCustomer("cus_1".to_string()),
            UpdateKind::ChargeConfirmed,
        );
        update.customer_id = Some("cus_1".to_string());
        update.status = Some(SubscriptionStatus::Premium);
        update.cancel_at_period_end = Some(false);
        update
    }

    // =========================================================================
    // REC-T01: Two conflicts then success - retried to completion
    // =========================================================================
    #[tokio::test]
    async fn conflicts_are_retried_to_success() {
        let store = Arc::new(ConflictingStore::new(2));
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        service.apply(charge_update()).await.unwrap();
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 3);
        assert!(store
            .find_by_customer_id("cus_1")
            .await
            .unwrap()
            .is_some());
    }

    // =========================================================================
    // REC-T02: Persistent conflicts - RetriesExhausted after max attempts
    // =========================================================================
    #[tokio::test]
    async fn persistent_conflicts_exhaust_retries() {
        let store = Arc::new(ConflictingStore::new(usize::MAX));
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        let err = service.apply(charge_update()).await.unwrap_err();
        assert!(matches!(err, BillingError::RetriesExhausted { attempts: 3 }));
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 3);
    }

    // =========================================================================
    // REC-T03: Non-retryable store errors abort on the first attempt
    // =========================================================================
    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        struct BrokenStore {
            write_attempts: AtomicUsize,
        }

        #[async_trait]
        impl CustomerStore for BrokenStore {
            async fn find_by_customer_id(
                &self,
                _customer_id: &str,
            ) -> BillingResult<Option<CustomerRecord>> {
                Ok(None)
            }
            async fn find_by_subscription_id(
                &self,
                _subscription_id: &str,
            ) -> BillingResult<Option<CustomerRecord>> {
                Ok(None)
            }
            async fn find_by_wallet(
                &self,
                _wallet_address: &str,
            ) -> BillingResult<Option<CustomerRecord>> {
                Ok(None)
            }
            async fn transactional_upsert(
                &self,
                _record: CustomerRecord,
                _expected_version: Option<i64>,
            ) -> BillingResult<CustomerRecord> {
                self.write_attempts.fetch_add(1, Ordering::SeqCst);
                Err(BillingError::Database("connection reset".to_string()))
            }
            async fn list_all(&self) -> BillingResult<Vec<CustomerRecord>> {
                Ok(Vec::new())
            }
        }

        let store = Arc::new(BrokenStore {
            write_attempts: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        let err = service.apply(charge_update()).await.unwrap_err();
        assert!(matches!(err, BillingError::Database(_)));
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 1);
    }
}

mod query_tests {
    use super::*;
    use crate::queries::SubscriptionQueryService;
    use time::Duration;

    // =========================================================================
    // REC-Q01: Unknown wallet reports Free and inactive
    // =========================================================================
    #[tokio::test]
    async fn unknown_wallet_reports_free() {
        let store: Arc<dyn CustomerStore> = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let queries = SubscriptionQueryService::new(store, clock);

        let status = queries.status_for_wallet("0xunknown").await.unwrap();
        assert_eq!(status.status, SubscriptionStatus::Free);
        assert!(!status.is_active);
    }

    // =========================================================================
    // REC-Q02: Premium within its period reports Premium and active
    // =========================================================================
    #[tokio::test]
    async fn premium_wallet_reports_premium() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));

        let mut record = CustomerRecord::minimal("0xabc".to_string(), TEST_NOW);
        record.subscription.status = SubscriptionStatus::Premium;
        record.subscription.expiry_date = Some(TEST_NOW + Duration::days(10));
        store.transactional_upsert(record, None).await.unwrap();

        let queries = SubscriptionQueryService::new(store, clock.clone());
        let status = queries.status_for_wallet("0xABC").await.unwrap();
        assert_eq!(status.status, SubscriptionStatus::Premium);
        assert!(status.is_active);

        // Past expiry the same record reads as Free.
        clock.advance(Duration::days(11));
        let status = queries.status_for_wallet("0xabc").await.unwrap();
        assert_eq!(status.status, SubscriptionStatus::Free);
        assert!(!status.is_active);
    }

    // =========================================================================
    // REC-Q03: Lookup by subscription id returns the record with activity
    // =========================================================================
    #[tokio::test]
    async fn lookup_by_subscription_id() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));

        let mut record = CustomerRecord::minimal("0xabc".to_string(), TEST_NOW);
        record.subscription.status = SubscriptionStatus::Premium;
        record.subscription.subscription_id = Some("sub_1".to_string());
        store.transactional_upsert(record, None).await.unwrap();

        let queries = SubscriptionQueryService::new(store, clock);
        let (found, is_active) = queries
            .record_by_subscription_id("sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.subscription.subscription_id.as_deref(), Some("sub_1"));
        assert!(is_active);
        assert!(queries
            .record_by_subscription_id("sub_missing")
            .await
            .unwrap()
            .is_none());
    }
}

mod invariant_tests {
    use super::*;
    use crate::invariants::{InvariantChecker, ViolationSeverity};
    use time::Duration;

    // =========================================================================
    // REC-I01: A store produced by normal reconciliation is healthy
    // =========================================================================
    #[tokio::test]
    async fn reconciled_store_passes_all_checks() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        let service = service_over(store.clone(), clock);

        let event = normalize_stripe(paid_checkout_json("cus_1", "sub_1", "0xABC"));
        service.process(event).await.unwrap();

        let summary = InvariantChecker::new(store).run_all_checks().await.unwrap();
        assert!(summary.healthy, "violations: {:?}", summary.violations);
        assert_eq!(summary.checks_failed, 0);
    }

    // =========================================================================
    // REC-I02: Diverged expiry date is reported with High severity
    // =========================================================================
    #[tokio::test]
    async fn diverged_expiry_is_reported() {
        let store = Arc::new(InMemoryCustomerStore::new());

        let mut record = CustomerRecord::minimal("0xabc".to_string(), TEST_NOW);
        record.subscription.period_end_at = Some(TEST_NOW + Duration::days(30));
        record.subscription.expiry_date = Some(TEST_NOW + Duration::days(31));
        store.transactional_upsert(record, None).await.unwrap();

        let summary = InvariantChecker::new(store).run_all_checks().await.unwrap();
        assert!(!summary.healthy);
        let violation = summary
            .violations
            .iter()
            .find(|v| v.invariant == "expiry_mirrors_period_end")
            .expect("expiry divergence should be detected");
        assert_eq!(violation.severity, ViolationSeverity::High);
    }
}
