// API crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Coinchart API Server
//!
//! HTTP surface for the subscription reconciliation service: webhook
//! ingestion for both payment providers plus the read endpoints the
//! frontend polls.

pub mod config;
pub mod error;
pub mod routes;
pub mod signature;
pub mod state;


pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
