//! Postgres-backed customer store.
//!
//! Optimistic concurrency: every update is conditioned on the version read
//! earlier; zero rows affected means the record moved underneath us and the
//! caller retries.

use async_trait::async_trait;
use coinchart_shared::{CustomerRecord, SubscriptionState, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::CustomerStore;

#[derive(Debug, Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, wallet_address, customer_id, name, email, status, \
     subscription_id, period_start_at, period_end_at, expiry_date, cancel_at_period_end, \
     favorites, version, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    wallet_address: String,
    customer_id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    status: String,
    subscription_id: Option<String>,
    period_start_at: Option<OffsetDateTime>,
    period_end_at: Option<OffsetDateTime>,
    expiry_date: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    favorites: Vec<String>,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<CustomerRow> for CustomerRecord {
    type Error = BillingError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let status: SubscriptionStatus = row
            .status
            .parse()
            .map_err(|e: coinchart_shared::UnknownStatus| BillingError::Database(e.to_string()))?;
        Ok(CustomerRecord {
            id: row.id,
            wallet_address: row.wallet_address,
            customer_id: row.customer_id,
            name: row.name,
            email: row.email,
            subscription: SubscriptionState {
                status,
                subscription_id: row.subscription_id,
                period_start_at: row.period_start_at,
                period_end_at: row.period_end_at,
                expiry_date: row.expiry_date,
                cancel_at_period_end: row.cancel_at_period_end,
            },
            favorites: row.favorites,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<CustomerRecord>> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM customers WHERE customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CustomerRecord::try_from).transpose()
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<CustomerRecord>> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM customers WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CustomerRecord::try_from).transpose()
    }

    async fn find_by_wallet(&self, wallet_address: &str) -> BillingResult<Option<CustomerRecord>> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM customers WHERE wallet_address = $1"
        ))
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CustomerRecord::try_from).transpose()
    }

    async fn transactional_upsert(
        &self,
        mut record: CustomerRecord,
        expected_version: Option<i64>,
    ) -> BillingResult<CustomerRecord> {
        match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO customers (
                        id, wallet_address, customer_id, name, email, status,
                        subscription_id, period_start_at, period_end_at, expiry_date,
                        cancel_at_period_end, favorites, version, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, $13, $14)
                    "#,
                )
                .bind(record.id)
                .bind(&record.wallet_address)
                .bind(&record.customer_id)
                .bind(&record.name)
                .bind(&record.email)
                .bind(record.subscription.status.as_str())
                .bind(&record.subscription.subscription_id)
                .bind(record.subscription.period_start_at)
                .bind(record.subscription.period_end_at)
                .bind(record.subscription.expiry_date)
                .bind(record.subscription.cancel_at_period_end)
                .bind(&record.favorites)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&self.pool)
                .await?;
                record.version = 1;
                Ok(record)
            }
            Some(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE customers SET
                        wallet_address = $2,
                        customer_id = $3,
                        name = $4,
                        email = $5,
                        status = $6,
                        subscription_id = $7,
                        period_start_at = $8,
                        period_end_at = $9,
                        expiry_date = $10,
                        cancel_at_period_end = $11,
                        favorites = $12,
                        updated_at = $13,
                        version = version + 1
                    WHERE id = $1 AND version = $14
                    "#,
                )
                .bind(record.id)
                .bind(&record.wallet_address)
                .bind(&record.customer_id)
                .bind(&record.name)
                .bind(&record.email)
                .bind(record.subscription.status.as_str())
                .bind(&record.subscription.subscription_id)
                .bind(record.subscription.period_start_at)
                .bind(record.subscription.period_end_at)
                .bind(record.subscription.expiry_date)
                .bind(record.subscription.cancel_at_period_end)
                .bind(&record.favorites)
                .bind(record.updated_at)
                .bind(expected)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(BillingError::WriteConflict);
                }
                record.version = expected + 1;
                Ok(record)
            }
        }
    }

    async fn list_all(&self) -> BillingResult<Vec<CustomerRecord>> {
        let rows: Vec<CustomerRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM customers ORDER BY created_at"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(CustomerRecord::try_from).collect()
    }
}
