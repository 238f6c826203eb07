//! Payment lines: one proposed settlement per outstanding loan.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{LedgerMutation, OutstandingLoan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Full,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLine {
    pub loan: OutstandingLoan,
    pub enabled: bool,
    pub mode: PaymentMode,
    /// Exactly what the operator typed; never rewritten
    pub raw_amount: String,
    /// Mutation applied for this line by an earlier commit
    pub applied: Option<LedgerMutation>,
}

impl PaymentLine {
    /// Fresh line: disabled, full mode, blank amount.
    pub fn new(loan: OutstandingLoan) -> Self {
        Self {
            loan,
            enabled: false,
            mode: PaymentMode::Full,
            raw_amount: String::new(),
            applied: None,
        }
    }

    pub fn loan_id(&self) -> &str {
        &self.loan.id
    }

    pub fn is_settled(&self) -> bool {
        self.applied.is_some()
    }

    /// Typed amount as a finite number, if it parses.
    pub fn proposed_amount(&self) -> Option<f64> {
        parse_amount(&self.raw_amount)
    }

    /// Text shown in the amount field: the balance (read-only) in full mode,
    /// the operator's own text in partial mode.
    pub fn display_amount(&self) -> String {
        match self.mode {
            PaymentMode::Full => format!("{}", self.loan.balance.max(0.0)),
            PaymentMode::Partial => self.raw_amount.clone(),
        }
    }

    pub fn effective_amount(&self) -> f64 {
        effective_amount(self)
    }
}

/// Amount that would actually be deducted for `line`. Never exceeds the
/// loan's current balance and is 0 for disabled lines or unusable input.
/// A settled line reports what was applied, since its balance has moved.
pub fn effective_amount(line: &PaymentLine) -> f64 {
    if !line.enabled {
        return 0.0;
    }
    if let Some(applied) = &line.applied {
        return applied.amount;
    }
    let balance = line.loan.balance.max(0.0);
    match line.mode {
        PaymentMode::Full => balance,
        PaymentMode::Partial => match line.proposed_amount() {
            Some(amount) if amount > 0.0 => amount.min(balance),
            _ => 0.0,
        },
    }
}

/// Accepts plain numbers with optional surrounding whitespace and `_` or
/// space digit grouping.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A commit-blocking problem on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub line: usize,
    pub loan_id: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} (loan {}): {}", self.line + 1, self.loan_id, self.message)
    }
}

/// Enabled partial lines need a positive amount within the balance.
pub fn validate_line(index: usize, line: &PaymentLine) -> Option<Violation> {
    if !line.enabled || line.mode != PaymentMode::Partial {
        return None;
    }
    let violation = |message: String| Violation {
        line: index,
        loan_id: line.loan.id.clone(),
        message,
    };

    if line.raw_amount.trim().is_empty() {
        return Some(violation("partial amount is required".to_string()));
    }
    match line.proposed_amount() {
        None => Some(violation(format!(
            "partial amount '{}' is not a number",
            line.raw_amount.trim()
        ))),
        Some(amount) if amount <= 0.0 => {
            Some(violation("partial amount must be greater than zero".to_string()))
        }
        Some(amount) if amount > line.loan.balance => Some(violation(format!(
            "partial amount {} exceeds outstanding balance {}",
            amount, line.loan.balance
        ))),
        Some(_) => None,
    }
}
