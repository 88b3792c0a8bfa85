//! Billing error taxonomy.
//!
//! Split along what the webhook caller must do: `InvalidPayload` rejects the
//! delivery without touching state, conflict-class errors are retried by the
//! executor, everything else surfaces as a server error so the provider
//! redelivers.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or uncorrelatable event. No record is touched.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The record changed between read and conditional write.
    #[error("write conflict: record was modified concurrently")]
    WriteConflict,

    /// A gate wait or store operation exceeded its deadline.
    #[error("timed out {0}")]
    Timeout(&'static str),

    /// Conflict-class failures persisted through every allowed attempt.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    /// The store cannot be reached at all.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected store-layer failure.
    #[error("database error: {0}")]
    Database(String),
}

impl BillingError {
    /// Conflict-class errors are safe to retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict | Self::Timeout(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                // 40001: serialization_failure, the optimistic write lost.
                if db.code().as_deref() == Some("40001") {
                    return Self::WriteConflict;
                }
                // A concurrent insert for the same customer raced us.
                if db.is_unique_violation() {
                    return Self::WriteConflict;
                }
                Self::Database(db.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::StoreUnavailable(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_timeout_are_retryable() {
        assert!(BillingError::WriteConflict.is_retryable());
        assert!(BillingError::Timeout("waiting for customer lock").is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!BillingError::InvalidPayload("x".into()).is_retryable());
        assert!(!BillingError::RetriesExhausted { attempts: 3 }.is_retryable());
        assert!(!BillingError::StoreUnavailable("down".into()).is_retryable());
        assert!(!BillingError::Database("boom".into()).is_retryable());
    }
}
