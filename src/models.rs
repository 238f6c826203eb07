use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field that carries an entity's key unless configured otherwise.
pub const DEFAULT_KEY_FIELD: &str = "id";

/// A loosely-typed record identified by an opaque key.
///
/// Partial entities (key + display name only) are valid; later upserts merge
/// fields shallowly, last write wins per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Only objects are entities.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Project any serializable record into an entity.
    pub fn from_record<T: Serialize>(record: &T) -> Option<Self> {
        serde_json::to_value(record).ok().and_then(Self::from_value)
    }

    /// Project a record and store `key` under `key_field`, so it lands in a
    /// cache or row collection keyed on something other than `id`.
    pub fn from_keyed_record<T: Serialize>(record: &T, key_field: &str, key: &str) -> Option<Self> {
        Self::from_record(record).map(|entity| entity.with(key_field, key))
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Key stored under `field`. Numeric keys are stringified; empty strings
    /// are treated as absent.
    pub fn key_of(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<String> {
        self.key_of(DEFAULT_KEY_FIELD)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    /// Shallow merge: every top-level field of `other` overwrites ours.
    pub fn merge(&mut self, other: Entity) {
        for (field, value) in other.0 {
            self.0.insert(field, value);
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// How an outstanding cash advance is normally repaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeductionMethod {
    PayrollDeduction,
    ManualInstallment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    PaidOff,
    Rejected,
}

impl LoanStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::PaidOff => "paid-off",
            LoanStatus::Rejected => "rejected",
        }
    }
}

/// One active cash advance (kasbon) of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingLoan {
    pub id: String,
    pub subject_key: String,
    /// Approved principal
    pub principal: f64,
    /// Current outstanding balance, never above `principal`
    pub balance: f64,
    pub origin_date: NaiveDate,
    #[serde(default)]
    pub disbursed_at: Option<NaiveDate>,
    pub deduction_method: DeductionMethod,
    pub status: LoanStatus,
}

impl OutstandingLoan {
    /// Disbursed and still owing something.
    pub fn is_outstanding(&self) -> bool {
        self.status == LoanStatus::Disbursed && self.balance > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationType {
    PayrollDeduction,
    ManualInstallment,
    Adjustment,
}

impl MutationType {
    pub fn is_deduction(&self) -> bool {
        matches!(
            self,
            MutationType::PayrollDeduction | MutationType::ManualInstallment
        )
    }
}

/// Body of `POST /loans/{id}/mutations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    #[serde(rename = "type")]
    pub mutation_type: MutationType,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_record_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Append-only record of one balance-changing event against a loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMutation {
    pub id: String,
    pub loan_id: String,
    #[serde(rename = "type")]
    pub mutation_type: MutationType,
    pub amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    #[serde(default)]
    pub parent_record_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerMutation {
    pub fn pays_off(&self) -> bool {
        self.mutation_type.is_deduction() && self.balance_after <= 0.0
    }

    pub fn loan_status_after(&self) -> LoanStatus {
        if self.pays_off() {
            LoanStatus::PaidOff
        } else {
            LoanStatus::Disbursed
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deductions {
    /// Named deductions other than loans (insurance, absence, ...)
    #[serde(default)]
    pub itemized: BTreeMap<String, f64>,
    /// Sum of settled kasbon amounts
    #[serde(default)]
    pub loan_deduction: f64,
}

impl Deductions {
    pub fn total(&self) -> f64 {
        self.itemized.values().sum::<f64>() + self.loan_deduction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlipStatus {
    Draft,
    Final,
    Paid,
}

/// Payroll slip: the parent financial record of a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollSlip {
    pub id: String,
    pub subject_key: String,
    /// Pay period, e.g. "2026-10"
    pub period: String,
    pub gross_pay: f64,
    pub deductions: Deductions,
    pub total_deductions: f64,
    pub net_pay: f64,
    pub status: SlipStatus,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_note: Option<String>,
}

/// Operator input for a slip before the loan deduction is wired in.
#[derive(Debug, Clone, PartialEq)]
pub struct PayrollSlipDraft {
    /// Existing key, or None to have one generated before saving
    pub id: Option<String>,
    /// True when the slip already exists on the backend (update, not create)
    pub persisted: bool,
    pub subject_key: String,
    pub period: String,
    pub gross_pay: f64,
    pub itemized: BTreeMap<String, f64>,
    pub status: SlipStatus,
    pub payment_note: Option<String>,
}

impl PayrollSlipDraft {
    pub fn new(subject_key: impl Into<String>, period: impl Into<String>, gross_pay: f64) -> Self {
        Self {
            id: None,
            persisted: false,
            subject_key: subject_key.into(),
            period: period.into(),
            gross_pay,
            itemized: BTreeMap::new(),
            status: SlipStatus::Final,
            payment_note: None,
        }
    }

    pub fn with_item(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.itemized.insert(name.into(), amount);
        self
    }

    /// Finalize into a slip carrying the given loan deduction.
    pub fn into_slip(self, id: String, loan_deduction: f64) -> PayrollSlip {
        let deductions = Deductions {
            itemized: self.itemized,
            loan_deduction,
        };
        let total_deductions = deductions.total();
        PayrollSlip {
            id,
            subject_key: self.subject_key,
            period: self.period,
            gross_pay: self.gross_pay,
            net_pay: self.gross_pay - total_deductions,
            total_deductions,
            deductions,
            status: self.status,
            paid_at: None,
            payment_note: self.payment_note,
        }
    }
}
