//! Canonical normalized update.
//!
//! Every provider event that touches state is reduced to one
//! `SubscriptionUpdate`. Optional fields mean "do not touch" downstream; the
//! `kind` selects which merge rules the reconciliation engine applies.

use coinchart_shared::SubscriptionStatus;
use time::OffsetDateTime;

/// The identity used to locate the customer record, resolved before the
/// serialization gate is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerKey {
    /// Provider-assigned customer id.
    ProviderCustomer(String),
    /// Lowercased wallet address.
    Wallet(String),
}

impl CustomerKey {
    /// Stable string form used as the serialization-gate key.
    pub fn gate_key(&self) -> String {
        match self {
            Self::ProviderCustomer(id) => format!("cus:{id}"),
            Self::Wallet(address) => format!("wallet:{address}"),
        }
    }
}

/// Which merge rules apply to this update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// New paid checkout. Coarse status, default period when none supplied,
    /// forces auto-renewal intent.
    Checkout,
    /// Recurring charge confirmation. Touches status and cancel flag only.
    ChargeConfirmed,
    /// Authoritative subscription object. Status and periods verbatim.
    SubscriptionSync,
    /// Only the cancel-at-period-end flag changes.
    CancelFlag,
    /// Full reset: demote to Free, clear all period data.
    Reset,
}

/// Provider-agnostic update produced by a normalizer.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub customer_key: CustomerKey,
    pub kind: UpdateKind,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub period: Option<(OffsetDateTime, OffsetDateTime)>,
    pub cancel_at_period_end: Option<bool>,
}

impl SubscriptionUpdate {
    pub fn new(customer_key: CustomerKey, kind: UpdateKind) -> Self {
        Self {
            customer_key,
            kind,
            customer_id: None,
            subscription_id: None,
            wallet_address: None,
            email: None,
            name: None,
            status: None,
            period: None,
            cancel_at_period_end: None,
        }
    }

    /// Key handed to the per-customer serialization gate.
    pub fn gate_key(&self) -> String {
        self.customer_key.gate_key()
    }
}
