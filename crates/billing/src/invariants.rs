//! Customer-record invariants.
//!
//! Runnable consistency checks over the customer store. These can be run
//! after a webhook replay or a migration to confirm the data still honors
//! the rules the reconciliation engine relies on.
//!
//! ## Design Principles
//!
//! 1. **Executable**: each invariant is a real sweep over the store
//! 2. **Explanatory**: violations include enough context to debug
//! 3. **Non-destructive**: checks only read, never write

use std::collections::HashMap;
use std::sync::Arc;

use coinchart_shared::{is_placeholder_wallet, CustomerRecord, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::CustomerStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Record(s) affected
    pub record_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - lookups may resolve the wrong customer
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Service for running customer-record invariant checks
pub struct InvariantChecker {
    store: Arc<dyn CustomerStore>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn CustomerStore>) -> Self {
        Self { store }
    }

    /// Run all invariant checks and return a summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let records = self.store.list_all().await?;
        let mut violations = Vec::new();
        let mut checks_failed = 0;

        let checks = [
            check_customer_id_unique(&records),
            check_expiry_mirrors_period_end(&records),
            check_premium_has_subscription_id(&records),
            check_premium_has_real_wallet(&records),
        ];
        let checks_run = checks.len();
        for found in checks {
            if !found.is_empty() {
                checks_failed += 1;
            }
            violations.extend(found);
        }

        Ok(InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }
}

/// At most one record per provider customer id (sparse uniqueness).
fn check_customer_id_unique(records: &[CustomerRecord]) -> Vec<InvariantViolation> {
    let mut by_customer_id: HashMap<&str, Vec<Uuid>> = HashMap::new();
    for record in records {
        if let Some(customer_id) = record.customer_id.as_deref() {
            by_customer_id.entry(customer_id).or_default().push(record.id);
        }
    }
    by_customer_id
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(customer_id, ids)| InvariantViolation {
            invariant: "customer_id_unique".to_string(),
            description: format!(
                "{} records share provider customer id {}",
                ids.len(),
                customer_id
            ),
            record_ids: ids,
            severity: ViolationSeverity::Critical,
        })
        .collect()
}

/// `expiry_date` mirrors `period_end_at` whenever both are set.
fn check_expiry_mirrors_period_end(records: &[CustomerRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter(|record| {
            matches!(
                (
                    record.subscription.expiry_date,
                    record.subscription.period_end_at
                ),
                (Some(expiry), Some(period_end)) if expiry != period_end
            )
        })
        .map(|record| InvariantViolation {
            invariant: "expiry_mirrors_period_end".to_string(),
            record_ids: vec![record.id],
            description: format!(
                "expiry_date {:?} diverges from period_end_at {:?}",
                record.subscription.expiry_date, record.subscription.period_end_at
            ),
            severity: ViolationSeverity::High,
        })
        .collect()
}

/// Premium customers normally carry the subscription that pays for them. A
/// violation usually means a charge event arrived before any checkout or
/// subscription event for that customer.
fn check_premium_has_subscription_id(records: &[CustomerRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter(|record| {
            record.subscription.status == SubscriptionStatus::Premium
                && record.subscription.subscription_id.is_none()
        })
        .map(|record| InvariantViolation {
            invariant: "premium_has_subscription_id".to_string(),
            record_ids: vec![record.id],
            description: "Premium record with no subscription id".to_string(),
            severity: ViolationSeverity::Medium,
        })
        .collect()
}

/// Paying customers should have a real wallet on file eventually.
fn check_premium_has_real_wallet(records: &[CustomerRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter(|record| {
            record.subscription.status == SubscriptionStatus::Premium
                && is_placeholder_wallet(&record.wallet_address)
        })
        .map(|record| InvariantViolation {
            invariant: "premium_has_real_wallet".to_string(),
            record_ids: vec![record.id],
            description: format!(
                "Premium record still holds placeholder wallet {}",
                record.wallet_address
            ),
            severity: ViolationSeverity::Low,
        })
        .collect()
}
