//! In-memory backend.
//!
//! Mirrors the server's rules closely enough for offline runs: search by
//! name/key substring, loan balances updated atomically with each mutation,
//! slips keyed by id. Latency and failures can be injected per query, loan or
//! slip save.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::sleep;

use super::Backend;
use crate::error::BackendError;
use crate::models::{
    DeductionMethod, Entity, LedgerMutation, LoanStatus, MutationRequest, OutstandingLoan,
    PayrollSlip,
};

#[derive(Default)]
struct PaperState {
    entities: Vec<Entity>,
    loans: Vec<OutstandingLoan>,
    slips: HashMap<String, PayrollSlip>,
    mutations: Vec<LedgerMutation>,
    search_latency: HashMap<String, Duration>,
    failing_loans: HashMap<String, BackendError>,
    slip_failure: Option<BackendError>,
    loans_failure: Option<BackendError>,
    offline: HashSet<&'static str>,
    mutation_calls: usize,
    search_calls: usize,
}

#[derive(Default)]
pub struct PaperBackend {
    state: Mutex<PaperState>,
}

impl PaperBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small seeded dataset for offline operator runs.
    pub fn demo() -> Self {
        let backend = Self::new();
        for (id, name, dept) in [
            ("emp-001", "Budi Santoso", "Gudang"),
            ("emp-002", "Siti Rahmawati", "Keuangan"),
            ("emp-003", "Agus Pratama", "Pengiriman"),
            ("emp-004", "Dewi Lestari", "Pengiriman"),
        ] {
            backend.add_entity(
                Entity::new()
                    .with("id", id)
                    .with("name", name)
                    .with("department", dept),
            );
        }
        let date = |m, d| NaiveDate::from_ymd_opt(2026, m, d).unwrap_or_default();
        backend.add_loan(OutstandingLoan {
            id: "kb-1001".into(),
            subject_key: "emp-001".into(),
            principal: 1_000_000.0,
            balance: 500_000.0,
            origin_date: date(7, 1),
            disbursed_at: Some(date(7, 2)),
            deduction_method: DeductionMethod::PayrollDeduction,
            status: LoanStatus::Disbursed,
        });
        backend.add_loan(OutstandingLoan {
            id: "kb-1002".into(),
            subject_key: "emp-001".into(),
            principal: 750_000.0,
            balance: 750_000.0,
            origin_date: date(9, 15),
            disbursed_at: Some(date(9, 16)),
            deduction_method: DeductionMethod::ManualInstallment,
            status: LoanStatus::Disbursed,
        });
        backend
    }

    pub fn add_entity(&self, entity: Entity) {
        self.state.lock().entities.push(entity);
    }

    pub fn add_loan(&self, loan: OutstandingLoan) {
        self.state.lock().loans.push(loan);
    }

    pub fn set_search_latency(&self, query: &str, latency: Duration) {
        self.state
            .lock()
            .search_latency
            .insert(query.to_string(), latency);
    }

    pub fn fail_mutations_for(&self, loan_id: &str, error: BackendError) {
        self.state
            .lock()
            .failing_loans
            .insert(loan_id.to_string(), error);
    }

    pub fn clear_mutation_failures(&self) {
        self.state.lock().failing_loans.clear();
    }

    pub fn fail_slip_saves(&self, error: Option<BackendError>) {
        self.state.lock().slip_failure = error;
    }

    pub fn fail_loan_listing(&self, error: Option<BackendError>) {
        self.state.lock().loans_failure = error;
    }

    /// Make every search fail with a network error.
    pub fn set_search_offline(&self, offline: bool) {
        let mut state = self.state.lock();
        if offline {
            state.offline.insert("search");
        } else {
            state.offline.remove("search");
        }
    }

    pub fn loan(&self, loan_id: &str) -> Option<OutstandingLoan> {
        self.state
            .lock()
            .loans
            .iter()
            .find(|l| l.id == loan_id)
            .cloned()
    }

    pub fn slip(&self, slip_id: &str) -> Option<PayrollSlip> {
        self.state.lock().slips.get(slip_id).cloned()
    }

    pub fn mutations(&self) -> Vec<LedgerMutation> {
        self.state.lock().mutations.clone()
    }

    /// Mutation attempts, successful or not.
    pub fn mutation_calls(&self) -> usize {
        self.state.lock().mutation_calls
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().search_calls
    }
}

#[async_trait]
impl Backend for PaperBackend {
    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>, BackendError> {
        let latency = {
            let mut state = self.state.lock();
            state.search_calls += 1;
            if state.offline.contains("search") {
                return Err(BackendError::Network("connection refused".to_string()));
            }
            state.search_latency.get(query).copied()
        };
        if let Some(latency) = latency {
            sleep(latency).await;
        }

        let needle = query.to_lowercase();
        let state = self.state.lock();
        Ok(state
            .entities
            .iter()
            .filter(|e| {
                let name = e.get_str("name").unwrap_or_default().to_lowercase();
                let key = e.key().unwrap_or_default().to_lowercase();
                name.contains(&needle) || key.contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_entity(&self, key: &str) -> Result<Option<Entity>, BackendError> {
        let state = self.state.lock();
        Ok(state
            .entities
            .iter()
            .find(|e| e.key().as_deref() == Some(key))
            .cloned())
    }

    async fn disbursed_loans(&self, subject_key: &str) -> Result<Vec<OutstandingLoan>, BackendError> {
        let state = self.state.lock();
        if let Some(err) = &state.loans_failure {
            return Err(err.clone());
        }
        Ok(state
            .loans
            .iter()
            .filter(|l| l.subject_key == subject_key && l.status == LoanStatus::Disbursed)
            .cloned()
            .collect())
    }

    async fn create_mutation(
        &self,
        loan_id: &str,
        req: &MutationRequest,
    ) -> Result<LedgerMutation, BackendError> {
        let mut state = self.state.lock();
        state.mutation_calls += 1;

        if let Some(err) = state.failing_loans.get(loan_id) {
            return Err(err.clone());
        }
        if !(req.amount.is_finite() && req.amount > 0.0) {
            return Err(BackendError::from_status(
                422,
                r#"{"message":"amount must be positive"}"#,
            ));
        }

        let seq = state.mutations.len() + 1;
        let Some(loan) = state.loans.iter_mut().find(|l| l.id == loan_id) else {
            return Err(BackendError::NotFound);
        };
        if req.mutation_type.is_deduction() && req.amount > loan.balance {
            return Err(BackendError::from_status(
                422,
                r#"{"message":"amount exceeds outstanding balance"}"#,
            ));
        }

        let balance_before = loan.balance;
        let balance_after = if req.mutation_type.is_deduction() {
            balance_before - req.amount
        } else {
            balance_before
        };
        loan.balance = balance_after.max(0.0);

        let mutation = LedgerMutation {
            id: format!("mut-{:05}", seq),
            loan_id: loan_id.to_string(),
            mutation_type: req.mutation_type,
            amount: req.amount,
            balance_before,
            balance_after,
            parent_record_key: req.parent_record_key.clone(),
            created_at: Utc::now(),
        };
        loan.status = mutation.loan_status_after();
        state.mutations.push(mutation.clone());
        Ok(mutation)
    }

    async fn save_slip(&self, slip: &PayrollSlip, existing: bool) -> Result<PayrollSlip, BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.slip_failure {
            return Err(err.clone());
        }
        if existing && !state.slips.contains_key(&slip.id) {
            return Err(BackendError::NotFound);
        }
        state.slips.insert(slip.id.clone(), slip.clone());
        Ok(slip.clone())
    }
}
