//! Backend collaborator surface.
//!
//! Persistence and business rules live server-side; the core only needs the
//! handful of calls below. `HttpBackend` talks to the real API, `PaperBackend`
//! keeps everything in memory for offline runs and tests.

pub mod http;
pub mod paper;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::models::{Entity, LedgerMutation, MutationRequest, OutstandingLoan, PayrollSlip};

pub use http::HttpBackend;
pub use paper::PaperBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /entities?q=&limit=`
    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>, BackendError>;

    /// `GET /entities/{key}`; `Ok(None)` when the key is unknown.
    async fn get_entity(&self, key: &str) -> Result<Option<Entity>, BackendError>;

    /// `GET /loans?subject={key}&status=disbursed`
    async fn disbursed_loans(&self, subject_key: &str) -> Result<Vec<OutstandingLoan>, BackendError>;

    /// `POST /loans/{id}/mutations`. The backend updates the loan's balance
    /// and status atomically with the insert.
    async fn create_mutation(
        &self,
        loan_id: &str,
        req: &MutationRequest,
    ) -> Result<LedgerMutation, BackendError>;

    /// `POST /financial-records` when `existing` is false, otherwise
    /// `PUT /financial-records/{id}`.
    async fn save_slip(&self, slip: &PayrollSlip, existing: bool) -> Result<PayrollSlip, BackendError>;
}
