// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Coinchart Shared Module
//!
//! Domain types and infrastructure primitives used by the billing core and
//! the API surface.
//!
//! ## Contents
//!
//! - **Domain types**: `CustomerRecord`, `SubscriptionState`, `SubscriptionStatus`
//! - **Clock**: injectable time source for expiry comparisons
//! - **Keyed mutex**: per-customer serialization gate
//! - **Database**: Postgres pool construction and embedded migrations

pub mod clock;
pub mod db;
pub mod keyed_mutex;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{create_pool, run_migrations};
pub use keyed_mutex::{KeyGuard, KeyedMutex};
pub use types::{
    is_placeholder_wallet, placeholder_wallet, CustomerRecord, SubscriptionState,
    SubscriptionStatus, UnknownStatus,
};
