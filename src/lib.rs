//! GiftBay settlement service.
//!
//! Integrates the marketplace with its payment gateway: encrypted payload
//! exchange, callback/webhook settlement under a monotonic status rule,
//! wallet ledger with exactly-once credits, and background reconciliation
//! of payments stuck in flight.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
