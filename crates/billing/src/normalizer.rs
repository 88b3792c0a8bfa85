//! Provider-specific event normalizers.
//!
//! Each normalizer is a pure mapping from a provider event to either a
//! canonical `SubscriptionUpdate` or an `Ignored` signal. Ignored events are
//! acked to the provider without touching any record; `InvalidPayload` means
//! the event cannot be correlated to a customer at all.

use coinchart_shared::SubscriptionStatus;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::providers::boomfi::BoomFiWebhook;
use crate::providers::stripe::{Charge, CheckoutSession, StripeEvent, StripeSubscription};
use crate::update::{CustomerKey, SubscriptionUpdate, UpdateKind};

/// Outcome of normalization. `Ignored` must still be acked with success,
/// providers redeliver on anything else.
#[derive(Debug)]
pub enum NormalizedEvent {
    Update(SubscriptionUpdate),
    Ignored {
        event_type: String,
        reason: &'static str,
    },
}

/// A provider integration is one implementation of this trait; the engine
/// never sees provider-shaped data.
pub trait Normalizer {
    type Event;

    fn normalize(&self, event: Self::Event) -> BillingResult<NormalizedEvent>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StripeNormalizer;

impl Normalizer for StripeNormalizer {
    type Event = StripeEvent;

    fn normalize(&self, event: StripeEvent) -> BillingResult<NormalizedEvent> {
        match event {
            StripeEvent::CheckoutCompleted(session) => normalize_checkout(session),
            StripeEvent::ChargeSucceeded(charge) => normalize_charge(charge),
            StripeEvent::SubscriptionCreated(sub) | StripeEvent::SubscriptionUpdated(sub) => {
                normalize_subscription_sync(sub)
            }
            StripeEvent::SubscriptionDeleted(sub) => normalize_subscription_deleted(sub),
            StripeEvent::Unrecognized { event_type } => Ok(NormalizedEvent::Ignored {
                event_type,
                reason: "unrecognized event type",
            }),
        }
    }
}

fn normalize_checkout(session: CheckoutSession) -> BillingResult<NormalizedEvent> {
    if !session.is_paid() {
        return Ok(NormalizedEvent::Ignored {
            event_type: "checkout.session.completed".to_string(),
            reason: "payment not completed",
        });
    }
    let customer = session
        .customer
        .clone()
        .ok_or_else(|| BillingError::InvalidPayload("checkout session has no customer".into()))?;

    let mut update = SubscriptionUpdate::new(
        CustomerKey::ProviderCustomer(customer.clone()),
        UpdateKind::Checkout,
    );
    update.customer_id = Some(customer);
    update.wallet_address = session.wallet_address();
    if let Some(details) = &session.customer_details {
        update.email = non_empty(details.email.clone());
        update.name = non_empty(details.name.clone());
    }

    if let Some(subscription) = &session.subscription {
        update.subscription_id = Some(subscription.id().to_string());
        if let Some(object) = subscription.object() {
            update.period = unix_period(object)?;
            // A paid, active checkout always means auto-renewal intent; a
            // non-active expanded subscription keeps its own flag.
            update.cancel_at_period_end = if object.status == "active" {
                Some(false)
            } else {
                Some(object.cancel_at_period_end)
            };
        }
    }
    Ok(NormalizedEvent::Update(update))
}

fn normalize_charge(charge: Charge) -> BillingResult<NormalizedEvent> {
    if charge.invoice.is_none() {
        return Ok(NormalizedEvent::Ignored {
            event_type: "charge.succeeded".to_string(),
            reason: "charge has no invoice, not subscription-related",
        });
    }
    let customer = charge
        .customer
        .clone()
        .ok_or_else(|| BillingError::InvalidPayload("charge has no customer".into()))?;

    let mut update = SubscriptionUpdate::new(
        CustomerKey::ProviderCustomer(customer.clone()),
        UpdateKind::ChargeConfirmed,
    );
    update.customer_id = Some(customer);
    update.status = Some(SubscriptionStatus::Premium);
    update.cancel_at_period_end = Some(false);
    if let Some(details) = &charge.billing_details {
        update.email = non_empty(details.email.clone());
        update.name = non_empty(details.name.clone());
    }
    Ok(NormalizedEvent::Update(update))
}

fn normalize_subscription_sync(sub: StripeSubscription) -> BillingResult<NormalizedEvent> {
    let customer = sub
        .customer
        .clone()
        .ok_or_else(|| BillingError::InvalidPayload("subscription has no customer".into()))?;
    let status: SubscriptionStatus = sub
        .status
        .parse()
        .map_err(|e: coinchart_shared::UnknownStatus| BillingError::InvalidPayload(e.to_string()))?;

    let mut update = SubscriptionUpdate::new(
        CustomerKey::ProviderCustomer(customer.clone()),
        UpdateKind::SubscriptionSync,
    );
    update.customer_id = Some(customer);
    update.subscription_id = Some(sub.id.clone());
    update.status = Some(status);
    update.period = unix_period(&sub)?;
    update.cancel_at_period_end = Some(sub.cancel_at_period_end);
    Ok(NormalizedEvent::Update(update))
}

fn normalize_subscription_deleted(sub: StripeSubscription) -> BillingResult<NormalizedEvent> {
    let customer = sub
        .customer
        .clone()
        .ok_or_else(|| BillingError::InvalidPayload("subscription has no customer".into()))?;

    let mut update = SubscriptionUpdate::new(
        CustomerKey::ProviderCustomer(customer.clone()),
        UpdateKind::Reset,
    );
    update.customer_id = Some(customer);
    update.subscription_id = Some(sub.id.clone());
    Ok(NormalizedEvent::Update(update))
}

fn unix_period(sub: &StripeSubscription) -> BillingResult<Option<(OffsetDateTime, OffsetDateTime)>> {
    match (sub.current_period_start, sub.current_period_end) {
        (Some(start), Some(end)) => {
            let start = OffsetDateTime::from_unix_timestamp(start).map_err(|e| {
                BillingError::InvalidPayload(format!("bad period start timestamp: {e}"))
            })?;
            let end = OffsetDateTime::from_unix_timestamp(end).map_err(|e| {
                BillingError::InvalidPayload(format!("bad period end timestamp: {e}"))
            })?;
            Ok(Some((start, end)))
        }
        _ => Ok(None),
    }
}

/// Maps BoomFi events. The cancellation-flag polarity is configurable until
/// the provider's semantics are confirmed against a live account.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoomFiNormalizer {
    pub cancel_flag_inverted: bool,
}

impl BoomFiNormalizer {
    pub fn new(cancel_flag_inverted: bool) -> Self {
        Self {
            cancel_flag_inverted,
        }
    }
}

impl Normalizer for BoomFiNormalizer {
    type Event = BoomFiWebhook;

    fn normalize(&self, webhook: BoomFiWebhook) -> BillingResult<NormalizedEvent> {
        let customer = webhook
            .customer
            .as_ref()
            .ok_or_else(|| BillingError::InvalidPayload("webhook has no customer block".into()))?;
        let wallet = customer
            .wallet_address
            .as_deref()
            .map(str::trim)
            .filter(|wallet| !wallet.is_empty())
            .map(str::to_lowercase)
            .ok_or_else(|| BillingError::InvalidPayload("webhook has no wallet address".into()))?;

        let base = |kind| {
            let mut update = SubscriptionUpdate::new(CustomerKey::Wallet(wallet.clone()), kind);
            update.wallet_address = Some(wallet.clone());
            update.customer_id = non_empty(customer.id.clone());
            update.email = non_empty(customer.email.clone());
            update.name = non_empty(customer.name.clone());
            update
        };

        match webhook.event.as_str() {
            "Invoice.Updated" => {
                if webhook.payment_status.as_deref() != Some("Succeeded") {
                    return Ok(NormalizedEvent::Ignored {
                        event_type: "Invoice.Updated".to_string(),
                        reason: "invoice payment not succeeded",
                    });
                }
                let item = webhook.invoice_items.first().ok_or_else(|| {
                    BillingError::InvalidPayload("succeeded invoice has no invoice items".into())
                })?;
                let subscription_id = item
                    .subscription
                    .as_ref()
                    .and_then(|sub| sub.id.clone())
                    .ok_or_else(|| {
                        BillingError::InvalidPayload("invoice item has no subscription id".into())
                    })?;

                let mut update = base(UpdateKind::SubscriptionSync);
                update.subscription_id = Some(subscription_id);
                update.status = Some(SubscriptionStatus::Premium);
                update.period = rfc3339_period(item.period_start_at.as_deref(), item.period_end_at.as_deref())?;
                update.cancel_at_period_end = Some(false);
                Ok(NormalizedEvent::Update(update))
            }
            "Subscription.Updated" => match webhook.cancel_at_period_end {
                Some(flag) => {
                    let mut update = base(UpdateKind::CancelFlag);
                    update.cancel_at_period_end = Some(flag ^ self.cancel_flag_inverted);
                    Ok(NormalizedEvent::Update(update))
                }
                None => Ok(NormalizedEvent::Ignored {
                    event_type: "Subscription.Updated".to_string(),
                    reason: "no cancellation flag present",
                }),
            },
            "Subscription.Canceled" => Ok(NormalizedEvent::Update(base(UpdateKind::Reset))),
            _ => Ok(NormalizedEvent::Ignored {
                event_type: webhook.event.clone(),
                reason: "unrecognized event type",
            }),
        }
    }
}

fn rfc3339_period(
    start: Option<&str>,
    end: Option<&str>,
) -> BillingResult<Option<(OffsetDateTime, OffsetDateTime)>> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let start = OffsetDateTime::parse(start, &Rfc3339).map_err(|e| {
                BillingError::InvalidPayload(format!("bad period start timestamp: {e}"))
            })?;
            let end = OffsetDateTime::parse(end, &Rfc3339).map_err(|e| {
                BillingError::InvalidPayload(format!("bad period end timestamp: {e}"))
            })?;
            Ok(Some((start, end)))
        }
        _ => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
