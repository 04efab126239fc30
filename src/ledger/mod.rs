//! Durable ledger storage
//!
//! Relational storage for categories, expenses, commitments, monthly
//! budgets and pending third-party-detected expenses. Two backends:
//! Postgres for production and in-memory for development and tests.
//!
//! Invariants enforced here:
//! - `(user, section, name)` is unique among categories, compared
//!   case-insensitively on the name;
//! - section names are canonicalized (upper-cased) before they reach
//!   the store;
//! - renaming a category rewrites every historical expense referencing
//!   the old pair, in one transaction on the Postgres backend.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use crate::models::{
    Category, Commitment, CommitmentKind, Expense, MonthlyBudget, PendingExpense, PendingStatus,
};
use crate::Result;
use chrono::NaiveDate;
use uuid::Uuid;

/// Canonical form of a section name: trimmed and upper-cased.
pub fn canonical_section(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Case-insensitive name comparison used for category uniqueness.
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Fields for a new expense row.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub user_id: Uuid,
    pub section: String,
    pub category: String,
    pub amount: i64,
    pub concept: String,
    pub date: NaiveDate,
    pub payment_method: String,
}

/// Partial field patch for an existing expense.
#[derive(Debug, Clone, Default)]
pub struct ExpensePatch {
    pub amount: Option<i64>,
    pub concept: Option<String>,
    pub category: Option<String>,
    pub section: Option<String>,
}

impl ExpensePatch {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.concept.is_none()
            && self.category.is_none()
            && self.section.is_none()
    }
}

/// Trait for ledger persistence. All rows are scoped to one owner;
/// no operation crosses users.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- categories ----

    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>>;

    async fn find_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
    ) -> Result<Option<Category>>;

    /// All categories with this name, across sections.
    async fn find_categories_named(&self, user_id: Uuid, name: &str) -> Result<Vec<Category>>;

    /// Fails with `Conflict` if the `(user, section, name)` triple
    /// already exists.
    async fn insert_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<Category>;

    async fn set_category_budget(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<()>;

    /// Rename and/or move a category, rewriting the section/name pair
    /// on every historical expense that referenced the old one.
    /// Returns the number of cascaded expense rows.
    async fn rename_category(
        &self,
        user_id: Uuid,
        old_section: &str,
        old_name: &str,
        new_section: &str,
        new_name: &str,
    ) -> Result<u64>;

    async fn delete_category(&self, user_id: Uuid, section: &str, name: &str) -> Result<()>;

    async fn count_expenses_for_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
    ) -> Result<i64>;

    // ---- expenses ----

    async fn insert_expense(&self, expense: NewExpense) -> Result<Expense>;

    async fn get_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>>;

    /// Patch supplied fields in place. Returns the updated row, or
    /// `None` if the id does not resolve for this user.
    async fn update_expense(
        &self,
        user_id: Uuid,
        id: i64,
        patch: ExpensePatch,
    ) -> Result<Option<Expense>>;

    async fn delete_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>>;

    async fn recent_expenses(&self, user_id: Uuid, limit: usize) -> Result<Vec<Expense>>;

    // ---- commitments ----

    async fn insert_commitment(
        &self,
        user_id: Uuid,
        title: &str,
        kind: CommitmentKind,
        total_amount: i64,
    ) -> Result<Commitment>;

    /// Sets `paid_amount = total_amount`, `status = PAID`. Idempotent:
    /// re-applying the terminal state is not an error.
    async fn mark_commitment_paid(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>>;

    async fn delete_commitment(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>>;

    async fn recent_commitments(&self, user_id: Uuid, limit: usize) -> Result<Vec<Commitment>>;

    // ---- monthly budget ----

    async fn get_monthly_budget(&self, user_id: Uuid, month: &str)
        -> Result<Option<MonthlyBudget>>;

    /// One row per calendar month, overwritten on repeat.
    async fn upsert_monthly_budget(
        &self,
        user_id: Uuid,
        month: &str,
        amount: i64,
    ) -> Result<MonthlyBudget>;

    // ---- pending expenses ----

    async fn insert_pending_expense(
        &self,
        user_id: Uuid,
        amount: i64,
        concept: &str,
    ) -> Result<PendingExpense>;

    async fn get_pending_expense(&self, user_id: Uuid, id: i64) -> Result<Option<PendingExpense>>;

    async fn set_pending_status(
        &self,
        user_id: Uuid,
        id: i64,
        status: PendingStatus,
    ) -> Result<Option<PendingExpense>>;
}
