// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Coinchart Billing Module
//!
//! Reconciles subscription state from payment-provider webhooks onto one
//! customer record per paying entity.
//!
//! ## Features
//!
//! - **Event Normalization**: provider payloads mapped to one canonical update
//! - **Per-Customer Serialization**: keyed mutex gate, one reconciliation in
//!   flight per customer
//! - **Optimistic Writes**: version-conditioned upserts with bounded retry on
//!   conflict
//! - **Reconciliation Engine**: field-level merge with sticky wallets and
//!   monotonic contact fill
//! - **Queries**: read paths for frontend subscription polling
//! - **Invariants**: runnable consistency checks over the store

pub mod engine;
pub mod error;
pub mod invariants;
pub mod normalizer;
pub mod pg_store;
pub mod providers;
pub mod queries;
pub mod retry;
pub mod service;
pub mod store;
pub mod update;

#[cfg(test)]
mod edge_case_tests;

// Engine
pub use engine::{ReconcileOutcome, ReconciliationEngine};

// Error
pub use error::{BillingError, BillingResult};

// Normalizer
pub use normalizer::{BoomFiNormalizer, NormalizedEvent, Normalizer, StripeNormalizer};

// Providers
pub use providers::boomfi::BoomFiWebhook;
pub use providers::stripe::{StripeEvent, StripeEventEnvelope};

// Queries
pub use queries::{SubscriptionQueryService, WalletStatus};

// Retry
pub use retry::LinearBackoff;

// Service
pub use service::{ReconcilerSettings, ReconciliationService};

// Store
pub use store::{CustomerStore, InMemoryCustomerStore};
pub use pg_store::PgCustomerStore;

// Update
pub use update::{CustomerKey, SubscriptionUpdate, UpdateKind};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

use std::sync::Arc;

use coinchart_shared::{Clock, KeyedMutex};

/// Main billing service that combines reconciliation, queries and invariants
pub struct BillingService {
    pub reconciler: ReconciliationService,
    pub queries: SubscriptionQueryService,
    pub invariants: InvariantChecker,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn CustomerStore>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        let gate = Arc::new(KeyedMutex::new());
        Self {
            reconciler: ReconciliationService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                gate,
                settings,
            ),
            queries: SubscriptionQueryService::new(Arc::clone(&store), Arc::clone(&clock)),
            invariants: InvariantChecker::new(store),
        }
    }
}
