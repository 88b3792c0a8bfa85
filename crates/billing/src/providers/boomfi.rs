//! BoomFi webhook payloads.
//!
//! A flat envelope: the event name is a string, the customer block carries
//! the wallet address that anchors identity, and invoice events embed their
//! subscription and billing period inside `invoice_items`.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BoomFiWebhook {
    pub event: String,
    #[serde(default)]
    pub customer: Option<BoomFiCustomer>,
    #[serde(default)]
    pub cancel_at_period_end: Option<bool>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub invoice_items: Vec<BoomFiInvoiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct BoomFiCustomer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BoomFiInvoiceItem {
    #[serde(default)]
    pub subscription: Option<BoomFiSubscriptionRef>,
    /// RFC 3339 timestamps.
    #[serde(default)]
    pub period_start_at: Option<String>,
    #[serde(default)]
    pub period_end_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BoomFiSubscriptionRef {
    #[serde(default)]
    pub id: Option<String>,
}
