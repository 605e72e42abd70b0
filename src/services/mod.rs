//! Services module for business logic

pub mod settlement;
pub mod wallet;

pub use settlement::{
    InitiateCommand, InitiatedPayment, ReconciliationSummary, SettlementConfig, SettlementError,
    SettlementOutcome, SettlementService, VerificationReport,
};
pub use wallet::{WalletError, WalletService};
