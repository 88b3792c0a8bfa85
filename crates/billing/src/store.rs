//! Customer record store seam.
//!
//! The engine only sees this trait; production uses the Postgres
//! implementation in [`crate::pg_store`], tests use the in-memory one below.
//! `transactional_upsert` is the single write path: a conditional write that
//! fails with `WriteConflict` when the record changed since it was read.

use std::collections::HashMap;

use async_trait::async_trait;
use coinchart_shared::CustomerRecord;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_by_customer_id(&self, customer_id: &str)
        -> BillingResult<Option<CustomerRecord>>;

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<CustomerRecord>>;

    async fn find_by_wallet(&self, wallet_address: &str) -> BillingResult<Option<CustomerRecord>>;

    /// Persists `record` conditionally. `expected_version: None` inserts a
    /// new record; `Some(v)` updates only if the stored version is still `v`.
    /// Either way the stored version is bumped and the persisted record
    /// returned. A stale version or a uniqueness race yields `WriteConflict`.
    async fn transactional_upsert(
        &self,
        record: CustomerRecord,
        expected_version: Option<i64>,
    ) -> BillingResult<CustomerRecord>;

    /// Full scan, used by the invariant checker.
    async fn list_all(&self) -> BillingResult<Vec<CustomerRecord>>;
}

/// In-memory store with the same conflict semantics as Postgres.
#[derive(Debug, Default)]
pub struct InMemoryCustomerStore {
    records: RwLock<HashMap<Uuid, CustomerRecord>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<CustomerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| record.customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<CustomerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| record.subscription.subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn find_by_wallet(&self, wallet_address: &str) -> BillingResult<Option<CustomerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| record.wallet_address == wallet_address)
            .cloned())
    }

    async fn transactional_upsert(
        &self,
        mut record: CustomerRecord,
        expected_version: Option<i64>,
    ) -> BillingResult<CustomerRecord> {
        let mut records = self.records.write().await;

        // Sparse uniqueness on customer_id and full uniqueness on wallet.
        let clashes = records.values().any(|other| {
            other.id != record.id
                && (other.wallet_address == record.wallet_address
                    || (record.customer_id.is_some()
                        && other.customer_id == record.customer_id))
        });
        if clashes {
            return Err(BillingError::WriteConflict);
        }

        match expected_version {
            None => {
                if records.contains_key(&record.id) {
                    return Err(BillingError::WriteConflict);
                }
                record.version = 1;
            }
            Some(expected) => {
                let current = records
                    .get(&record.id)
                    .ok_or(BillingError::WriteConflict)?;
                if current.version != expected {
                    return Err(BillingError::WriteConflict);
                }
                record.version = expected + 1;
            }
        }

        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> BillingResult<Vec<CustomerRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}
