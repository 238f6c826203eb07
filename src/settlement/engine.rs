//! Kasbon settlement against a payroll slip.
//!
//! Commit runs in two phases and is not atomic across them:
//! 1. save the slip; on failure nothing else is attempted
//! 2. apply one ledger mutation per line with a positive effective amount,
//!    each independent of the others
//!
//! Lines that were applied are remembered, so a retry only re-attempts the
//! lines that failed.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::line::{validate_line, PaymentLine, PaymentMode, Violation};
use crate::backend::Backend;
use crate::cache::EntityCache;
use crate::error::{with_timeout, BackendError};
use crate::models::{
    Entity, LedgerMutation, MutationRequest, MutationType, OutstandingLoan, PayrollSlip,
    PayrollSlipDraft,
};
use crate::rows::RowCollection;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("no payment line at index {0}")]
    NoSuchLine(usize),

    #[error("amount of line {} is read-only in full mode", line_number(.0))]
    AmountReadOnly(usize),

    #[error("loan deduction is computed from the selected kasbon lines")]
    ManualDeductionLocked,

    #[error("slip is for {got} but the loaded kasbon lines belong to {expected}")]
    SubjectMismatch { expected: String, got: String },

    #[error("{}", describe_violations(.0))]
    Invalid(Vec<Violation>),

    #[error("failed to save payroll slip: {}", .0.user_message())]
    ParentWrite(BackendError),
}

fn line_number(index: &usize) -> usize {
    index + 1
}

fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One line whose ledger mutation failed after the slip was saved.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFailure {
    pub line: usize,
    pub loan_id: String,
    pub amount: f64,
    pub error: BackendError,
}

impl LineFailure {
    pub fn message(&self) -> String {
        self.error.user_message()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    pub slip: PayrollSlip,
    pub applied: Vec<LedgerMutation>,
    pub failures: Vec<LineFailure>,
}

impl CommitResult {
    pub fn is_fully_settled(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn outcome(&self) -> CommitOutcome {
        if self.failures.is_empty() {
            CommitOutcome::FullySettled
        } else {
            CommitOutcome::SavedWithFailures(self.failures.len())
        }
    }

    /// Operator-facing summary; failed lines are listed one by one.
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return format!(
                "Payroll slip {} saved; {} kasbon deduction(s) applied",
                self.slip.id,
                self.applied.len()
            );
        }
        let failed = self
            .failures
            .iter()
            .map(|f| format!("loan {}: {}", f.loan_id, f.message()))
            .collect::<Vec<_>>()
            .join("; ");
        format!(
            "Payroll slip {} saved with {} deduction(s) failed: {}",
            self.slip.id,
            self.failures.len(),
            failed
        )
    }
}

/// The three outcomes a commit can end in. They must stay distinct.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    FullySettled,
    SavedWithFailures(usize),
    SaveFailed(String),
}

impl CommitOutcome {
    pub fn from_result(result: &Result<CommitResult, SettlementError>) -> Self {
        match result {
            Ok(r) => r.outcome(),
            Err(e) => CommitOutcome::SaveFailed(e.to_string()),
        }
    }
}

pub struct SettlementEngine {
    backend: Arc<dyn Backend>,
    cache: EntityCache,
    loan_rows: Option<RowCollection>,
    request_timeout: Duration,
    subject_key: Option<String>,
    lines: Vec<PaymentLine>,
    load_error: Option<String>,
    manual_loan_deduction: f64,
}

impl SettlementEngine {
    pub fn new(backend: Arc<dyn Backend>, cache: EntityCache, request_timeout: Duration) -> Self {
        Self {
            backend,
            cache,
            loan_rows: None,
            request_timeout,
            subject_key: None,
            lines: Vec::new(),
            load_error: None,
            manual_loan_deduction: 0.0,
        }
    }

    /// Keep a loan table view in step with applied deductions.
    pub fn with_loan_rows(mut self, rows: RowCollection) -> Self {
        self.loan_rows = Some(rows);
        self
    }

    pub fn lines(&self) -> &[PaymentLine] {
        &self.lines
    }

    pub fn subject_key(&self) -> Option<&str> {
        self.subject_key.as_deref()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Replace the lines with one disabled, full-mode line per disbursed loan
    /// that still has a balance. On failure the line list is left empty.
    pub async fn load_outstanding(&mut self, subject_key: &str) -> Result<&[PaymentLine], BackendError> {
        self.subject_key = Some(subject_key.to_string());
        self.lines.clear();
        self.load_error = None;

        let res = with_timeout(
            self.request_timeout,
            self.backend.disbursed_loans(subject_key),
        )
        .await;

        match res {
            Ok(loans) => {
                let outstanding: Vec<OutstandingLoan> =
                    loans.into_iter().filter(|l| l.is_outstanding()).collect();
                let key_field = self.cache.key_field();
                for loan in &outstanding {
                    if let Some(entity) = Entity::from_keyed_record(loan, key_field, &loan.id) {
                        self.cache.upsert(entity);
                    }
                }
                debug!(subject = subject_key, count = outstanding.len(), "Loaded outstanding kasbon");
                self.lines = outstanding.into_iter().map(PaymentLine::new).collect();
                Ok(self.lines.as_slice())
            }
            Err(e) => {
                warn!(subject = subject_key, error = %e, "Failed to load outstanding kasbon");
                self.load_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    fn line_mut(&mut self, index: usize) -> Result<&mut PaymentLine, SettlementError> {
        self.lines
            .get_mut(index)
            .ok_or(SettlementError::NoSuchLine(index))
    }

    pub fn toggle(&mut self, index: usize) -> Result<bool, SettlementError> {
        let line = self.line_mut(index)?;
        line.enabled = !line.enabled;
        Ok(line.enabled)
    }

    /// Full mode shows the balance read-only; partial mode brings back
    /// whatever was typed last.
    pub fn set_mode(&mut self, index: usize, mode: PaymentMode) -> Result<(), SettlementError> {
        self.line_mut(index)?.mode = mode;
        Ok(())
    }

    /// Store the typed text as-is; coercion happens only when amounts are
    /// computed or validated.
    pub fn set_amount(&mut self, index: usize, raw: impl Into<String>) -> Result<(), SettlementError> {
        let line = self.line_mut(index)?;
        if line.mode == PaymentMode::Full {
            return Err(SettlementError::AmountReadOnly(index));
        }
        line.raw_amount = raw.into();
        Ok(())
    }

    pub fn any_enabled(&self) -> bool {
        self.lines.iter().any(|l| l.enabled)
    }

    pub fn aggregate_deduction(&self) -> f64 {
        self.lines.iter().map(PaymentLine::effective_amount).sum()
    }

    /// Value of the slip's loan deduction field: computed while any line is
    /// enabled, operator-entered otherwise.
    pub fn loan_deduction_field(&self) -> f64 {
        if self.any_enabled() {
            self.aggregate_deduction()
        } else {
            self.manual_loan_deduction
        }
    }

    pub fn loan_deduction_editable(&self) -> bool {
        !self.any_enabled()
    }

    pub fn set_manual_loan_deduction(&mut self, amount: f64) -> Result<(), SettlementError> {
        if self.any_enabled() {
            return Err(SettlementError::ManualDeductionLocked);
        }
        self.manual_loan_deduction = amount;
        Ok(())
    }

    /// Problems on lines that are still to be applied. Settled lines are
    /// skipped: their balance already reflects the applied deduction.
    pub fn validate(&self) -> Vec<Violation> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_settled())
            .filter_map(|(i, line)| validate_line(i, line))
            .collect()
    }

    /// Build the slip that phase 1 would write, without writing it.
    pub fn build_slip(&self, mut draft: PayrollSlipDraft) -> PayrollSlip {
        let id = draft
            .id
            .take()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        draft.into_slip(id, self.loan_deduction_field())
    }

    pub async fn commit(&mut self, draft: PayrollSlipDraft) -> Result<CommitResult, SettlementError> {
        let violations = self.validate();
        if !violations.is_empty() {
            return Err(SettlementError::Invalid(violations));
        }
        if let Some(expected) = &self.subject_key {
            if self.any_enabled() && expected != &draft.subject_key {
                return Err(SettlementError::SubjectMismatch {
                    expected: expected.clone(),
                    got: draft.subject_key.clone(),
                });
            }
        }

        let existing = draft.persisted;
        let slip = self.build_slip(draft);
        info!(
            slip = %slip.id,
            subject = %slip.subject_key,
            loan_deduction = slip.deductions.loan_deduction,
            existing,
            "Saving payroll slip"
        );

        let saved = with_timeout(self.request_timeout, self.backend.save_slip(&slip, existing))
            .await
            .map_err(|e| {
                warn!(slip = %slip.id, error = %e, "Payroll slip save failed; no deductions attempted");
                SettlementError::ParentWrite(e)
            })?;

        let slip_entity = Entity::from_keyed_record(&saved, self.cache.key_field(), &saved.id);
        if let Some(entity) = slip_entity {
            self.cache.upsert(entity);
        }

        let (applied, failures) = self.apply_lines(&saved).await;
        Ok(CommitResult {
            slip: saved,
            applied,
            failures,
        })
    }

    /// Re-attempt only the lines that have not been applied yet, against an
    /// already saved slip. The slip itself is not written again.
    pub async fn retry_failed(&mut self, slip: &PayrollSlip) -> Result<CommitResult, SettlementError> {
        let violations = self.validate();
        if !violations.is_empty() {
            return Err(SettlementError::Invalid(violations));
        }
        let (applied, failures) = self.apply_lines(slip).await;
        Ok(CommitResult {
            slip: slip.clone(),
            applied,
            failures,
        })
    }

    async fn apply_lines(&mut self, slip: &PayrollSlip) -> (Vec<LedgerMutation>, Vec<LineFailure>) {
        let pending: Vec<(usize, String, MutationRequest)> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_settled())
            .filter_map(|(i, line)| {
                let amount = line.effective_amount();
                (amount > 0.0).then(|| {
                    let req = MutationRequest {
                        mutation_type: MutationType::PayrollDeduction,
                        amount,
                        parent_record_key: Some(slip.id.clone()),
                        note: Some(format!("Payroll {} slip {}", slip.period, slip.id)),
                    };
                    (i, line.loan.id.clone(), req)
                })
            })
            .collect();

        let timeout = self.request_timeout;
        let attempts = pending.into_iter().map(|(i, loan_id, req)| {
            let backend = self.backend.clone();
            async move {
                let res = with_timeout(timeout, backend.create_mutation(&loan_id, &req)).await;
                (i, loan_id, req.amount, res)
            }
        });
        let results = join_all(attempts).await;

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for (i, loan_id, amount, res) in results {
            match res {
                Ok(mutation) => {
                    self.record_applied(i, &mutation);
                    applied.push(mutation);
                }
                Err(error) => {
                    warn!(slip = %slip.id, loan = %loan_id, amount, error = %error, "Kasbon deduction failed");
                    failures.push(LineFailure {
                        line: i,
                        loan_id,
                        amount,
                        error,
                    });
                }
            }
        }

        info!(
            slip = %slip.id,
            applied = applied.len(),
            failed = failures.len(),
            "Kasbon deductions committed"
        );
        (applied, failures)
    }

    fn record_applied(&mut self, index: usize, mutation: &LedgerMutation) {
        let patch = Entity::new()
            .with(self.cache.key_field(), mutation.loan_id.clone())
            .with("balance", mutation.balance_after.max(0.0))
            .with("status", mutation.loan_status_after().as_str());
        self.cache.upsert(patch.clone());
        if let Some(rows) = &self.loan_rows {
            rows.patch(patch);
        }
        if let Some(line) = self.lines.get_mut(index) {
            line.loan.balance = mutation.balance_after.max(0.0);
            line.loan.status = mutation.loan_status_after();
            line.applied = Some(mutation.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PaperBackend;
    use crate::models::{DeductionMethod, LoanStatus};
    use chrono::NaiveDate;

    fn loan(id: &str, balance: f64) -> OutstandingLoan {
        OutstandingLoan {
            id: id.into(),
            subject_key: "emp-1".into(),
            principal: balance.max(1_000_000.0),
            balance,
            origin_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            disbursed_at: NaiveDate::from_ymd_opt(2026, 6, 2),
            deduction_method: DeductionMethod::PayrollDeduction,
            status: LoanStatus::Disbursed,
        }
    }

    async fn engine_with(loans: &[(&str, f64)]) -> (Arc<PaperBackend>, SettlementEngine, EntityCache) {
        let backend = Arc::new(PaperBackend::new());
        for (id, balance) in loans {
            backend.add_loan(loan(id, *balance));
        }
        let cache = EntityCache::new();
        let mut engine = SettlementEngine::new(backend.clone(), cache.clone(), Duration::from_secs(12));
        engine.load_outstanding("emp-1").await.unwrap();
        (backend, engine, cache)
    }

    fn draft() -> PayrollSlipDraft {
        PayrollSlipDraft::new("emp-1", "2026-10", 4_000_000.0).with_item("bpjs", 80_000.0)
    }

    #[tokio::test]
    async fn test_load_filters_and_builds_fresh_lines() {
        let backend = Arc::new(PaperBackend::new());
        backend.add_loan(loan("kb-1", 500_000.0));
        backend.add_loan(loan("kb-zero", 0.0));
        let mut other = loan("kb-other", 100.0);
        other.subject_key = "emp-2".into();
        backend.add_loan(other);

        let cache = EntityCache::new();
        let mut engine = SettlementEngine::new(backend, cache.clone(), Duration::from_secs(12));
        let lines = engine.load_outstanding("emp-1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].enabled);
        assert_eq!(lines[0].mode, PaymentMode::Full);
        assert!(lines[0].raw_amount.is_empty());
        assert!(cache.contains("kb-1"));
    }

    #[tokio::test]
    async fn test_load_failure_leaves_empty_lines_and_error() {
        let (backend, mut engine, _) = engine_with(&[("kb-1", 100.0)]).await;
        assert_eq!(engine.lines().len(), 1);

        backend.fail_loan_listing(Some(BackendError::Network("down".into())));
        assert!(engine.load_outstanding("emp-1").await.is_err());
        assert!(engine.lines().is_empty());
        assert!(engine.load_error().is_some());
    }

    #[tokio::test]
    async fn test_toggle_mode_amount_and_aggregate() {
        let (_, mut engine, _) = engine_with(&[("kb-1", 500_000.0), ("kb-2", 300_000.0)]).await;
        assert_eq!(engine.aggregate_deduction(), 0.0);

        assert!(engine.toggle(0).unwrap());
        assert_eq!(engine.aggregate_deduction(), 500_000.0);

        engine.toggle(1).unwrap();
        engine.set_mode(1, PaymentMode::Partial).unwrap();
        engine.set_amount(1, "120000").unwrap();
        assert_eq!(engine.aggregate_deduction(), 620_000.0);
        // Recomputing without a state change is stable
        assert_eq!(engine.aggregate_deduction(), engine.aggregate_deduction());

        // Back to full and partial again: the typed amount survives
        engine.set_mode(1, PaymentMode::Full).unwrap();
        assert_eq!(engine.lines()[1].display_amount(), "300000");
        engine.set_mode(1, PaymentMode::Partial).unwrap();
        assert_eq!(engine.lines()[1].display_amount(), "120000");

        assert_eq!(engine.set_amount(0, "1"), Err(SettlementError::AmountReadOnly(0)));
        assert_eq!(engine.toggle(9), Err(SettlementError::NoSuchLine(9)));
    }

    #[tokio::test]
    async fn test_manual_deduction_locked_while_lines_enabled() {
        let (_, mut engine, _) = engine_with(&[("kb-1", 500_000.0)]).await;
        engine.set_manual_loan_deduction(75_000.0).unwrap();
        assert_eq!(engine.loan_deduction_field(), 75_000.0);

        engine.toggle(0).unwrap();
        assert!(!engine.loan_deduction_editable());
        assert_eq!(
            engine.set_manual_loan_deduction(1.0),
            Err(SettlementError::ManualDeductionLocked)
        );
        assert_eq!(engine.loan_deduction_field(), 500_000.0);

        engine.toggle(0).unwrap();
        assert_eq!(engine.loan_deduction_field(), 75_000.0);
    }

    #[tokio::test]
    async fn test_commit_refused_before_any_network_call() {
        let (backend, mut engine, _) = engine_with(&[("kb-1", 500_000.0), ("kb-2", 10.0)]).await;
        engine.toggle(1).unwrap();
        engine.set_mode(1, PaymentMode::Partial).unwrap();
        engine.set_amount(1, "11").unwrap();

        let res = engine.commit(draft()).await;
        let Err(SettlementError::Invalid(violations)) = &res else {
            panic!("expected validation refusal");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].loan_id, "kb-2");
        assert!(matches!(CommitOutcome::from_result(&res), CommitOutcome::SaveFailed(_)));
        assert_eq!(backend.mutation_calls(), 0);
        assert!(backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_commit_one_full_line_one_disabled() {
        let (backend, mut engine, cache) = engine_with(&[("kb-1", 500_000.0), ("kb-2", 200_000.0)]).await;
        engine.toggle(0).unwrap();

        let result = engine.commit(draft()).await.unwrap();
        assert_eq!(result.slip.deductions.loan_deduction, 500_000.0);
        assert_eq!(result.slip.total_deductions, 580_000.0);
        assert_eq!(result.slip.net_pay, 3_420_000.0);
        assert_eq!(backend.mutation_calls(), 1);
        assert_eq!(result.outcome(), CommitOutcome::FullySettled);
        // The deduction field keeps matching the saved slip
        assert_eq!(engine.loan_deduction_field(), 500_000.0);
        assert_eq!(engine.lines()[0].loan.balance, 0.0);

        let m = &result.applied[0];
        assert_eq!(m.parent_record_key.as_deref(), Some(result.slip.id.as_str()));
        let cached = cache.get("kb-1").unwrap();
        assert_eq!(cached.get_f64("balance"), Some(0.0));
        assert_eq!(cached.get_str("status"), Some("paid-off"));
        assert!(cache.contains(&result.slip.id));
        assert!(backend.slip(&result.slip.id).is_some());
    }

    #[tokio::test]
    async fn test_parent_write_failure_aborts_everything() {
        let (backend, mut engine, _) = engine_with(&[("kb-1", 500_000.0)]).await;
        engine.toggle(0).unwrap();
        backend.fail_slip_saves(Some(BackendError::from_status(
            409,
            r#"{"message":"period already closed"}"#,
        )));

        let res = engine.commit(draft()).await;
        assert_eq!(
            CommitOutcome::from_result(&res),
            CommitOutcome::SaveFailed("failed to save payroll slip: period already closed".into())
        );
        assert_eq!(backend.mutation_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_reported_per_line_then_retried() {
        let (backend, mut engine, cache) = engine_with(&[("kb-1", 500_000.0), ("kb-2", 300_000.0)]).await;
        let rows = RowCollection::new();
        rows.replace_all(
            engine
                .lines()
                .iter()
                .filter_map(|l| Entity::from_record(&l.loan))
                .collect(),
        );
        engine = engine.with_loan_rows(rows.clone());

        engine.toggle(0).unwrap();
        engine.toggle(1).unwrap();
        engine.set_mode(1, PaymentMode::Partial).unwrap();
        engine.set_amount(1, "100000").unwrap();
        backend.fail_mutations_for(
            "kb-2",
            BackendError::from_status(500, r#"{"message":"ledger locked"}"#),
        );

        let result = engine.commit(draft()).await.unwrap();
        assert_eq!(result.slip.deductions.loan_deduction, 600_000.0);
        assert_eq!(result.outcome(), CommitOutcome::SavedWithFailures(1));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].loan_id, "kb-2");
        assert!(result.summary().contains("loan kb-2: ledger locked"));

        // The succeeding loan is reflected locally
        assert_eq!(cache.get("kb-1").unwrap().get_f64("balance"), Some(0.0));
        assert_eq!(rows.get("kb-1").unwrap().get_str("status"), Some("paid-off"));
        assert_eq!(rows.get("kb-2").unwrap().get_f64("balance"), Some(300_000.0));

        // Retry touches only the failed line
        backend.clear_mutation_failures();
        let calls_before = backend.mutation_calls();
        let retry = engine.retry_failed(&result.slip).await.unwrap();
        assert_eq!(backend.mutation_calls(), calls_before + 1);
        assert!(retry.is_fully_settled());
        assert_eq!(retry.applied[0].loan_id, "kb-2");
        assert_eq!(backend.loan("kb-1").unwrap().balance, 0.0);
        assert_eq!(backend.loan("kb-2").unwrap().balance, 200_000.0);
    }

    #[tokio::test]
    async fn test_subject_mismatch_refused() {
        let (_, mut engine, _) = engine_with(&[("kb-1", 500_000.0)]).await;
        engine.toggle(0).unwrap();
        let res = engine
            .commit(PayrollSlipDraft::new("emp-2", "2026-10", 1.0))
            .await;
        assert!(matches!(res, Err(SettlementError::SubjectMismatch { .. })));
    }

    #[tokio::test]
    async fn test_existing_slip_is_updated_not_created() {
        let (backend, mut engine, _) = engine_with(&[]).await;
        let mut d = draft();
        d.id = Some("slip-fixed".into());
        d.persisted = true;
        // Update of an unknown slip fails: it was never created
        assert!(engine.commit(d.clone()).await.is_err());

        d.persisted = false;
        let created = engine.commit(d.clone()).await.unwrap();
        assert_eq!(created.slip.id, "slip-fixed");

        d.persisted = true;
        d.gross_pay = 4_500_000.0;
        let updated = engine.commit(d).await.unwrap();
        assert_eq!(backend.slip("slip-fixed").unwrap().gross_pay, 4_500_000.0);
        assert!(updated.applied.is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_settled_partial_line() {
        let (backend, mut engine, _) = engine_with(&[("kb-1", 500_000.0), ("kb-2", 300_000.0)]).await;
        engine.toggle(0).unwrap();
        engine.set_mode(0, PaymentMode::Partial).unwrap();
        engine.set_amount(0, "300000").unwrap();
        engine.toggle(1).unwrap();
        backend.fail_mutations_for("kb-2", BackendError::Network("reset".into()));

        let result = engine.commit(draft()).await.unwrap();
        assert_eq!(result.outcome(), CommitOutcome::SavedWithFailures(1));
        // kb-1 now sits at 200000, below the 300000 that was typed
        assert_eq!(engine.lines()[0].loan.balance, 200_000.0);
        assert!(engine.validate().is_empty());
        assert_eq!(engine.loan_deduction_field(), result.slip.deductions.loan_deduction);

        backend.clear_mutation_failures();
        let retry = engine.retry_failed(&result.slip).await.unwrap();
        assert!(retry.is_fully_settled());
        assert_eq!(retry.applied.len(), 1);
        assert_eq!(retry.applied[0].loan_id, "kb-2");
        assert_eq!(backend.loan("kb-1").unwrap().balance, 200_000.0);
        assert_eq!(backend.loan("kb-2").unwrap().balance, 0.0);
        assert_eq!(engine.loan_deduction_field(), 600_000.0);
    }

    #[tokio::test]
    async fn test_cache_and_rows_follow_configured_key_field() {
        let backend = Arc::new(PaperBackend::new());
        backend.add_loan(loan("kb-1", 500_000.0));
        let cache = EntityCache::with_key_field("uuid");
        let rows = RowCollection::with_key_field("uuid");
        let mut engine = SettlementEngine::new(backend.clone(), cache.clone(), Duration::from_secs(12))
            .with_loan_rows(rows.clone());

        engine.load_outstanding("emp-1").await.unwrap();
        assert_eq!(cache.get("kb-1").unwrap().get_f64("balance"), Some(500_000.0));
        rows.replace_all(vec![cache.get("kb-1").unwrap()]);

        engine.toggle(0).unwrap();
        let result = engine.commit(draft()).await.unwrap();
        assert_eq!(result.outcome(), CommitOutcome::FullySettled);
        assert!(cache.contains(&result.slip.id));
        assert_eq!(cache.get("kb-1").unwrap().get_str("status"), Some("paid-off"));
        assert_eq!(rows.get("kb-1").unwrap().get_f64("balance"), Some(0.0));
    }
}
