//! Environment-driven server configuration.

use std::time::Duration;

use anyhow::Context;
use coinchart_billing::ReconcilerSettings;

/// Runtime configuration, read once at startup.
#[derive(Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_address: String,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Stripe webhook endpoint secret (`whsec_...`).
    pub stripe_webhook_secret: String,
    /// BoomFi webhook secret. Verification is skipped when unset.
    pub boomfi_webhook_secret: Option<String>,
    /// Flips the polarity of BoomFi's `cancel_at_period_end` flag.
    pub boomfi_cancel_flag_inverted: bool,
    /// Comma-separated CORS origin allowlist.
    pub allowed_origins: Vec<String>,
    /// Total reconciliation attempts per delivery, including the first.
    pub reconcile_max_attempts: usize,
    /// Base backoff delay between attempts, in milliseconds.
    pub reconcile_base_delay_ms: u64,
    /// Deadline for acquiring the per-customer lock, in seconds.
    pub customer_lock_timeout_secs: u64,
    /// Deadline for one reconciliation cycle once the lock is held, in seconds.
    pub reconcile_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .context("STRIPE_WEBHOOK_SECRET must be set")?;
        let boomfi_webhook_secret = std::env::var("BOOMFI_WEBHOOK_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty());
        let boomfi_cancel_flag_inverted = std::env::var("BOOMFI_CANCEL_FLAG_INVERTED")
            .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        let reconcile_max_attempts = env_number("RECONCILE_MAX_ATTEMPTS", 3)?;
        let reconcile_base_delay_ms = env_number("RECONCILE_BASE_DELAY_MS", 1_000)?;
        let customer_lock_timeout_secs = env_number("CUSTOMER_LOCK_TIMEOUT_SECS", 10)?;
        let reconcile_timeout_secs = env_number("RECONCILE_TIMEOUT_SECS", 10)?;

        Ok(Self {
            bind_address,
            database_url,
            stripe_webhook_secret,
            boomfi_webhook_secret,
            boomfi_cancel_flag_inverted,
            allowed_origins,
            reconcile_max_attempts: reconcile_max_attempts as usize,
            reconcile_base_delay_ms,
            customer_lock_timeout_secs,
            reconcile_timeout_secs,
        })
    }

    /// Maps the tuning knobs onto the reconciliation service settings.
    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            max_attempts: self.reconcile_max_attempts,
            base_delay: Duration::from_millis(self.reconcile_base_delay_ms),
            lock_timeout: Duration::from_secs(self.customer_lock_timeout_secs),
            op_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }
}

fn env_number(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}
