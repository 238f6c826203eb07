//! Kasbon Core Library
//!
//! Client-side realtime cache and kasbon settlement core for the payroll
//! console: search-as-you-type lookups, push-driven row/cache sync, and
//! partial-payment reconciliation against payroll slips.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod lookup;
pub mod models;
pub mod rows;
pub mod session;
pub mod settlement;
pub mod sync;

pub use backend::{Backend, HttpBackend, PaperBackend};
pub use cache::EntityCache;
pub use config::Config;
pub use error::BackendError;
pub use lookup::{LookupConfig, LookupOutcome, LookupResolver, LookupState};
pub use models::Entity;
pub use rows::RowCollection;
pub use session::Session;
pub use settlement::{CommitOutcome, CommitResult, PaymentMode, SettlementEngine, SettlementError};
pub use sync::{ChannelState, SyncChannel, SyncHandle};
