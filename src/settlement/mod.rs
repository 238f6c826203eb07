//! Kasbon payment reconciliation.

pub mod engine;
pub mod line;

pub use engine::{CommitOutcome, CommitResult, LineFailure, SettlementEngine, SettlementError};
pub use line::{effective_amount, parse_amount, PaymentLine, PaymentMode, Violation};
