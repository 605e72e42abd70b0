//! Payment gateway protocol: payload cipher, canonical request strings,
//! status vocabulary and the injected client.

pub mod cipher;
pub mod client;
pub mod error;
pub mod payload;
pub mod status;
pub mod types;
