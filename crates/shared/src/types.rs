//! Customer and subscription domain types.
//!
//! One `CustomerRecord` exists per paying entity, regardless of which payment
//! provider the entity arrived through. The record carries a `version` counter
//! used for optimistic conditional writes.

use std::fmt;
use std::str::FromStr;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Billing lifecycle status.
///
/// `Free` and `Premium` are the application's own coarse states; the rest are
/// provider lifecycle statuses stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[serde(rename = "Free")]
    Free,
    #[serde(rename = "Premium")]
    Premium,
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Premium => "Premium",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status string does not name a known lifecycle state.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Free" => Ok(Self::Free),
            "Premium" => Ok(Self::Premium),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "unpaid" => Ok(Self::Unpaid),
            "paused" => Ok(Self::Paused),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Subscription sub-entity embedded in `CustomerRecord`.
///
/// `expiry_date` mirrors `period_end_at` whenever both are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub status: SubscriptionStatus,
    pub subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_start_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiry_date: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self {
            status: SubscriptionStatus::Free,
            subscription_id: None,
            period_start_at: None,
            period_end_at: None,
            expiry_date: None,
            cancel_at_period_end: false,
        }
    }
}

/// Aggregate root: one record per paying entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: Uuid,
    /// Lowercased wallet address, or a generated `no-wallet-*` placeholder.
    pub wallet_address: String,
    /// Provider-assigned customer id; unique when present.
    pub customer_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub subscription: SubscriptionState,
    pub favorites: Vec<String>,
    /// Optimistic concurrency counter, bumped on every persisted write.
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CustomerRecord {
    /// Minimal record for a customer first seen through a lifecycle event.
    pub fn minimal(wallet_address: String, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address,
            customer_id: None,
            name: None,
            email: None,
            subscription: SubscriptionState::default(),
            favorites: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived activity flag, never stored.
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.subscription.status == SubscriptionStatus::Premium
            && !self.subscription.cancel_at_period_end
            && self.subscription.expiry_date.map_or(true, |expiry| expiry > now)
    }
}

/// Generates a sentinel wallet address for records created without one.
pub fn placeholder_wallet(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("no-wallet-{}-{}", millis, suffix.to_lowercase())
}

/// A placeholder address is never treated as authoritative identity.
pub fn is_placeholder_wallet(address: &str) -> bool {
    address.is_empty() || address.starts_with("no-wallet-") || address.contains("missing-wallet")
}
