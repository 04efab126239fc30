//! Core data models: ledger entities, the untrusted intent payload and
//! the closed action sum type the dispatcher matches on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommitmentKind {
    /// The user owes money ("debo").
    Debt,
    /// Money is owed to the user ("me deben").
    Loan,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommitmentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PendingStatus {
    Pending,
    Processed,
    Ignored,
}

//
// ================= Ledger entities =================
//

/// A named budget line inside a section. Sections have no row of their
/// own — they materialize from the categories that share one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub user_id: Uuid,
    /// Upper-cased at write time.
    pub section: String,
    /// Stored with original casing; compared case-insensitively.
    pub name: String,
    /// Minor currency units. CLP has no fractional units.
    pub budget: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: i64,
    pub user_id: Uuid,
    pub section: String,
    pub category: String,
    pub amount: i64,
    pub concept: String,
    pub date: NaiveDate,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commitment {
    pub id: i64,
    pub user_id: Uuid,
    /// Counterparty plus reason, e.g. "Pedro - asado".
    pub title: String,
    pub kind: CommitmentKind,
    pub total_amount: i64,
    pub paid_amount: i64,
    pub status: CommitmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyBudget {
    pub user_id: Uuid,
    /// Calendar month key, "2026-08".
    pub month: String,
    pub amount: i64,
}

/// An externally-detected transaction (email/OCR ingestion) waiting for
/// the user to supply a category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingExpense {
    pub id: i64,
    pub user_id: Uuid,
    pub amount: i64,
    pub concept: String,
    pub status: PendingStatus,
}

/// Month key for a date, used by the monthly budget upsert.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

//
// ================= Intent payload =================
//

/// Raw intent record as produced upstream (LLM or deterministic
/// parser). Every field is optional: the payload is untrusted and the
/// engine re-validates before mutating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawIntent {
    pub intent: Option<String>,
    pub section: Option<String>,
    pub category: Option<String>,
    /// May arrive as a number or a currency-formatted string.
    pub amount: Option<Value>,
    pub concept: Option<String>,
    pub target_id: Option<Value>,
    pub target_type: Option<String>,
    pub new_name: Option<String>,
    pub new_section: Option<String>,
    pub new_budget: Option<Value>,
    pub commitment_type: Option<String>,
    pub payment_method: Option<String>,
    pub response_text: Option<String>,
}

/// Closed set of intent kinds. One variant per kind, carrying only the
/// slots that kind needs; the dispatcher matches exhaustively so a new
/// kind is a compile-time-checked addition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateExpense {
        section: Option<String>,
        category: Option<String>,
        amount: Option<i64>,
        concept: Option<String>,
        payment_method: Option<String>,
    },
    UpdateExpense {
        target_id: Option<i64>,
        amount: Option<i64>,
        concept: Option<String>,
        category: Option<String>,
        section: Option<String>,
    },
    DeleteExpense {
        target_id: Option<i64>,
    },
    CreateCategory {
        section: Option<String>,
        category: Option<String>,
        budget: Option<i64>,
    },
    UpdateCategory {
        section: Option<String>,
        category: Option<String>,
        new_name: Option<String>,
        new_section: Option<String>,
        new_budget: Option<i64>,
    },
    DeleteCategory {
        section: Option<String>,
        category: Option<String>,
    },
    CreateCommitment {
        counterparty: Option<String>,
        amount: Option<i64>,
        reason: Option<String>,
        kind: CommitmentKind,
    },
    MarkCommitmentPaid {
        target_id: Option<i64>,
    },
    DeleteCommitment {
        target_id: Option<i64>,
    },
    UpdateGlobalBudget {
        amount: Option<i64>,
    },
    IgnorePending,
    Talk {
        response_text: Option<String>,
    },
}

impl Action {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::CreateExpense { .. } => "CREATE",
            Action::UpdateExpense { .. } => "UPDATE",
            Action::DeleteExpense { .. } => "DELETE",
            Action::CreateCategory { .. } => "CREATE_CATEGORY",
            Action::UpdateCategory { .. } => "UPDATE_CATEGORY",
            Action::DeleteCategory { .. } => "DELETE_CATEGORY",
            Action::CreateCommitment { .. } => "CREATE_COMMITMENT",
            Action::MarkCommitmentPaid { .. } => "MARK_PAID_COMMITMENT",
            Action::DeleteCommitment { .. } => "DELETE_COMMITMENT",
            Action::UpdateGlobalBudget { .. } => "UPDATE_GLOBAL_BUDGET",
            Action::IgnorePending => "IGNORE_PENDING",
            Action::Talk { .. } => "TALK",
        }
    }

    /// TALK and unknown intents carry no mutation.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Talk { .. })
    }
}

//
// ================= Engine reply =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReply {
    pub reply: String,
    /// Number of ledger mutations actually applied.
    pub mutations: usize,
}

impl fmt::Display for CommitmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitmentKind::Debt => "DEBT",
            CommitmentKind::Loan => "LOAN",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitmentStatus::Pending => "PENDING",
            CommitmentStatus::Paid => "PAID",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::Processed => "PROCESSED",
            PendingStatus::Ignored => "IGNORED",
        };
        write!(f, "{}", s)
    }
}

impl CommitmentKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "DEBT" | "DEUDA" => Some(CommitmentKind::Debt),
            "LOAN" | "PRESTAMO" | "PRÉSTAMO" => Some(CommitmentKind::Loan),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_kind_parsing() {
        assert_eq!(CommitmentKind::parse("DEBT"), Some(CommitmentKind::Debt));
        assert_eq!(CommitmentKind::parse("loan"), Some(CommitmentKind::Loan));
        assert_eq!(CommitmentKind::parse(" deuda "), Some(CommitmentKind::Debt));
        assert_eq!(CommitmentKind::parse("other"), None);
    }

    #[test]
    fn raw_intent_tolerates_partial_payloads() {
        let raw: RawIntent =
            serde_json::from_str(r#"{"intent":"CREATE","amount":"$120.000"}"#).unwrap();
        assert_eq!(raw.intent.as_deref(), Some("CREATE"));
        assert!(raw.section.is_none());
        assert!(raw.amount.is_some());
    }

    #[test]
    fn month_key_format() {
        let d = NaiveDate::from_ymd_opt(2026, 8, 28).unwrap();
        assert_eq!(month_key(d), "2026-08");
    }
}
