//! Stripe-shaped webhook payloads.
//!
//! The envelope carries the event type as a string plus an untyped object;
//! `StripeEvent::classify` turns that into a closed sum so every event type
//! is either parsed into a concrete shape or explicitly `Unrecognized`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{BillingError, BillingResult};

/// Checkout custom-field key customers use to submit their wallet address.
pub const WALLET_CUSTOM_FIELD_KEY: &str = "walletaddressforpremiumaccessonthewebsite";

#[derive(Debug, Deserialize)]
pub struct StripeEventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug)]
pub enum StripeEvent {
    CheckoutCompleted(CheckoutSession),
    ChargeSucceeded(Charge),
    SubscriptionCreated(StripeSubscription),
    SubscriptionUpdated(StripeSubscription),
    SubscriptionDeleted(StripeSubscription),
    Unrecognized { event_type: String },
}

impl StripeEvent {
    pub fn classify(envelope: StripeEventEnvelope) -> BillingResult<Self> {
        let object = envelope.data.object;
        match envelope.event_type.as_str() {
            "checkout.session.completed" => Ok(Self::CheckoutCompleted(parse(object, "checkout session")?)),
            "charge.succeeded" => Ok(Self::ChargeSucceeded(parse(object, "charge")?)),
            "customer.subscription.created" => {
                Ok(Self::SubscriptionCreated(parse(object, "subscription")?))
            }
            "customer.subscription.updated" => {
                Ok(Self::SubscriptionUpdated(parse(object, "subscription")?))
            }
            "customer.subscription.deleted" => {
                Ok(Self::SubscriptionDeleted(parse(object, "subscription")?))
            }
            other => Ok(Self::Unrecognized {
                event_type: other.to_string(),
            }),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    object: serde_json::Value,
    what: &'static str,
) -> BillingResult<T> {
    serde_json::from_value(object)
        .map_err(|e| BillingError::InvalidPayload(format!("malformed {what} object: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub subscription: Option<SubscriptionRef>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Wallet extraction precedence: the known custom-field key, then any
    /// text custom field labelled as a wallet address, then metadata.
    pub fn wallet_address(&self) -> Option<String> {
        let by_key = self
            .custom_fields
            .iter()
            .find(|field| field.key.as_deref() == Some(WALLET_CUSTOM_FIELD_KEY))
            .and_then(CustomField::text_value);

        let by_label = || {
            self.custom_fields
                .iter()
                .find(|field| {
                    field.field_type.as_deref() == Some("text")
                        && field
                            .label
                            .as_ref()
                            .and_then(|label| label.custom.as_deref())
                            .map(|label| label.to_lowercase().contains("wallet address"))
                            .unwrap_or(false)
                })
                .and_then(CustomField::text_value)
        };

        by_key
            .or_else(by_label)
            .or_else(|| self.metadata.get("wallet_address").cloned())
            .map(|address| address.trim().to_lowercase())
            .filter(|address| !address.is_empty())
    }
}

/// Checkout sessions carry either a bare subscription id or, when the
/// webhook was configured with expansion, the full subscription object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionRef {
    Object(Box<StripeSubscription>),
    Id(String),
}

impl SubscriptionRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(sub) => &sub.id,
        }
    }

    pub fn object(&self) -> Option<&StripeSubscription> {
        match self {
            Self::Object(sub) => Some(sub),
            Self::Id(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomField {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub label: Option<CustomFieldLabel>,
    #[serde(default)]
    pub text: Option<CustomFieldText>,
}

impl CustomField {
    fn text_value(&self) -> Option<String> {
        self.text.as_ref().and_then(|text| text.value.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomFieldLabel {
    #[serde(default)]
    pub custom: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomFieldText {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Charge {
    #[serde(default)]
    pub customer: Option<String>,
    /// Absent for one-off charges with no subscription behind them.
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub billing_details: Option<BillingDetails>,
}

#[derive(Debug, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    pub status: String,
    /// Unix seconds.
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}
