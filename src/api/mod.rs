//! HTTP surface: payment lifecycle and wallet endpoints.

pub mod payments;
pub mod wallet;
