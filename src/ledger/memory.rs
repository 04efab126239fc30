//! In-memory ledger store for development and tests.

use super::{names_match, ExpensePatch, LedgerStore, NewExpense};
use crate::error::EngineError;
use crate::models::{
    Category, Commitment, CommitmentKind, CommitmentStatus, Expense, MonthlyBudget, PendingExpense,
    PendingStatus,
};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    categories: Vec<Category>,
    expenses: Vec<Expense>,
    commitments: Vec<Commitment>,
    budgets: HashMap<(Uuid, String), i64>,
    pending: Vec<PendingExpense>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct InMemoryLedgerStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        Ok(inner
            .categories
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
    ) -> Result<Option<Category>> {
        let inner = self.inner.read().await;
        Ok(inner
            .categories
            .iter()
            .find(|c| c.user_id == user_id && c.section == section && names_match(&c.name, name))
            .cloned())
    }

    async fn find_categories_named(&self, user_id: Uuid, name: &str) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        Ok(inner
            .categories
            .iter()
            .filter(|c| c.user_id == user_id && names_match(&c.name, name))
            .cloned()
            .collect())
    }

    async fn insert_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<Category> {
        let mut inner = self.inner.write().await;

        let exists = inner
            .categories
            .iter()
            .any(|c| c.user_id == user_id && c.section == section && names_match(&c.name, name));
        if exists {
            return Err(EngineError::Conflict(format!(
                "category '{}' already exists in '{}'",
                name, section
            )));
        }

        let category = Category {
            id: inner.next_id(),
            user_id,
            section: section.to_string(),
            name: name.trim().to_string(),
            budget,
        };
        inner.categories.push(category.clone());
        Ok(category)
    }

    async fn set_category_budget(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .iter_mut()
            .find(|c| c.user_id == user_id && c.section == section && names_match(&c.name, name))
            .ok_or_else(|| {
                EngineError::NotFound(format!("category '{}' in '{}'", name, section))
            })?;
        category.budget = budget;
        Ok(())
    }

    async fn rename_category(
        &self,
        user_id: Uuid,
        old_section: &str,
        old_name: &str,
        new_section: &str,
        new_name: &str,
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;

        let target_exists = inner.categories.iter().any(|c| {
            c.user_id == user_id
                && c.section == new_section
                && names_match(&c.name, new_name)
                && !(c.section == old_section && names_match(&c.name, old_name))
        });
        if target_exists {
            return Err(EngineError::Conflict(format!(
                "category '{}' already exists in '{}'",
                new_name, new_section
            )));
        }

        let category = inner
            .categories
            .iter_mut()
            .find(|c| {
                c.user_id == user_id && c.section == old_section && names_match(&c.name, old_name)
            })
            .ok_or_else(|| {
                EngineError::NotFound(format!("category '{}' in '{}'", old_name, old_section))
            })?;
        category.section = new_section.to_string();
        category.name = new_name.trim().to_string();

        let mut cascaded = 0u64;
        for expense in inner.expenses.iter_mut().filter(|e| {
            e.user_id == user_id && e.section == old_section && names_match(&e.category, old_name)
        }) {
            expense.section = new_section.to_string();
            expense.category = new_name.trim().to_string();
            cascaded += 1;
        }

        Ok(cascaded)
    }

    async fn delete_category(&self, user_id: Uuid, section: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.categories.len();
        inner.categories.retain(|c| {
            !(c.user_id == user_id && c.section == section && names_match(&c.name, name))
        });
        if inner.categories.len() == before {
            return Err(EngineError::NotFound(format!(
                "category '{}' in '{}'",
                name, section
            )));
        }
        Ok(())
    }

    async fn count_expenses_for_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
    ) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .expenses
            .iter()
            .filter(|e| {
                e.user_id == user_id && e.section == section && names_match(&e.category, name)
            })
            .count() as i64)
    }

    async fn insert_expense(&self, expense: NewExpense) -> Result<Expense> {
        let mut inner = self.inner.write().await;
        let row = Expense {
            id: inner.next_id(),
            user_id: expense.user_id,
            section: expense.section,
            category: expense.category,
            amount: expense.amount,
            concept: expense.concept,
            date: expense.date,
            payment_method: expense.payment_method,
        };
        inner.expenses.push(row.clone());
        Ok(row)
    }

    async fn get_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>> {
        let inner = self.inner.read().await;
        Ok(inner
            .expenses
            .iter()
            .find(|e| e.user_id == user_id && e.id == id)
            .cloned())
    }

    async fn update_expense(
        &self,
        user_id: Uuid,
        id: i64,
        patch: ExpensePatch,
    ) -> Result<Option<Expense>> {
        let mut inner = self.inner.write().await;
        let Some(expense) = inner
            .expenses
            .iter_mut()
            .find(|e| e.user_id == user_id && e.id == id)
        else {
            return Ok(None);
        };

        if let Some(amount) = patch.amount {
            expense.amount = amount;
        }
        if let Some(concept) = patch.concept {
            expense.concept = concept;
        }
        if let Some(category) = patch.category {
            expense.category = category;
        }
        if let Some(section) = patch.section {
            expense.section = section;
        }
        Ok(Some(expense.clone()))
    }

    async fn delete_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>> {
        let mut inner = self.inner.write().await;
        let position = inner
            .expenses
            .iter()
            .position(|e| e.user_id == user_id && e.id == id);
        Ok(position.map(|i| inner.expenses.remove(i)))
    }

    async fn recent_expenses(&self, user_id: Uuid, limit: usize) -> Result<Vec<Expense>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Expense> = inner
            .expenses
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_commitment(
        &self,
        user_id: Uuid,
        title: &str,
        kind: CommitmentKind,
        total_amount: i64,
    ) -> Result<Commitment> {
        let mut inner = self.inner.write().await;
        let row = Commitment {
            id: inner.next_id(),
            user_id,
            title: title.to_string(),
            kind,
            total_amount,
            paid_amount: 0,
            status: CommitmentStatus::Pending,
            created_at: Utc::now(),
        };
        inner.commitments.push(row.clone());
        Ok(row)
    }

    async fn mark_commitment_paid(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>> {
        let mut inner = self.inner.write().await;
        let Some(commitment) = inner
            .commitments
            .iter_mut()
            .find(|c| c.user_id == user_id && c.id == id)
        else {
            return Ok(None);
        };
        commitment.paid_amount = commitment.total_amount;
        commitment.status = CommitmentStatus::Paid;
        Ok(Some(commitment.clone()))
    }

    async fn delete_commitment(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>> {
        let mut inner = self.inner.write().await;
        let position = inner
            .commitments
            .iter()
            .position(|c| c.user_id == user_id && c.id == id);
        Ok(position.map(|i| inner.commitments.remove(i)))
    }

    async fn recent_commitments(&self, user_id: Uuid, limit: usize) -> Result<Vec<Commitment>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Commitment> = inner
            .commitments
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_monthly_budget(
        &self,
        user_id: Uuid,
        month: &str,
    ) -> Result<Option<MonthlyBudget>> {
        let inner = self.inner.read().await;
        Ok(inner
            .budgets
            .get(&(user_id, month.to_string()))
            .map(|amount| MonthlyBudget {
                user_id,
                month: month.to_string(),
                amount: *amount,
            }))
    }

    async fn upsert_monthly_budget(
        &self,
        user_id: Uuid,
        month: &str,
        amount: i64,
    ) -> Result<MonthlyBudget> {
        let mut inner = self.inner.write().await;
        inner.budgets.insert((user_id, month.to_string()), amount);
        Ok(MonthlyBudget {
            user_id,
            month: month.to_string(),
            amount,
        })
    }

    async fn insert_pending_expense(
        &self,
        user_id: Uuid,
        amount: i64,
        concept: &str,
    ) -> Result<PendingExpense> {
        let mut inner = self.inner.write().await;
        let row = PendingExpense {
            id: inner.next_id(),
            user_id,
            amount,
            concept: concept.to_string(),
            status: PendingStatus::Pending,
        };
        inner.pending.push(row.clone());
        Ok(row)
    }

    async fn get_pending_expense(&self, user_id: Uuid, id: i64) -> Result<Option<PendingExpense>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pending
            .iter()
            .find(|p| p.user_id == user_id && p.id == id)
            .cloned())
    }

    async fn set_pending_status(
        &self,
        user_id: Uuid,
        id: i64,
        status: PendingStatus,
    ) -> Result<Option<PendingExpense>> {
        let mut inner = self.inner.write().await;
        let Some(pending) = inner
            .pending
            .iter_mut()
            .find(|p| p.user_id == user_id && p.id == id)
        else {
            return Ok(None);
        };
        pending.status = status;
        Ok(Some(pending.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn new_expense(user_id: Uuid, section: &str, category: &str, amount: i64) -> NewExpense {
        NewExpense {
            user_id,
            section: section.to_string(),
            category: category.to_string(),
            amount,
            concept: category.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            payment_method: "Efectivo".to_string(),
        }
    }

    #[tokio::test]
    async fn category_triple_is_unique_case_insensitive() {
        let store = InMemoryLedgerStore::new();
        let user = Uuid::new_v4();

        store
            .insert_category(user, "CASA", "Arriendo", 0)
            .await
            .unwrap();
        let duplicate = store.insert_category(user, "CASA", "arriendo", 0).await;
        assert!(matches!(duplicate, Err(EngineError::Conflict(_))));

        // Same name in another section is fine.
        store
            .insert_category(user, "OFICINA", "Arriendo", 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rename_cascades_to_expenses() {
        let store = InMemoryLedgerStore::new();
        let user = Uuid::new_v4();

        store
            .insert_category(user, "CASA", "Arriendo", 0)
            .await
            .unwrap();
        for _ in 0..3 {
            store
                .insert_expense(new_expense(user, "CASA", "Arriendo", 1000))
                .await
                .unwrap();
        }

        let cascaded = store
            .rename_category(user, "CASA", "Arriendo", "CASA", "Alquiler")
            .await
            .unwrap();
        assert_eq!(cascaded, 3);

        let rows = store.recent_expenses(user, 10).await.unwrap();
        assert!(rows.iter().all(|e| e.category == "Alquiler"));
    }

    #[tokio::test]
    async fn rows_are_scoped_per_user() {
        let store = InMemoryLedgerStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let expense = store
            .insert_expense(new_expense(alice, "CASA", "Luz", 5000))
            .await
            .unwrap();

        assert!(store.get_expense(bob, expense.id).await.unwrap().is_none());
        assert!(store.delete_expense(bob, expense.id).await.unwrap().is_none());
        assert!(store.get_expense(alice, expense.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mark_paid_is_terminal_and_idempotent() {
        let store = InMemoryLedgerStore::new();
        let user = Uuid::new_v4();
        let commitment = store
            .insert_commitment(user, "Pedro - asado", CommitmentKind::Loan, 5000)
            .await
            .unwrap();

        let first = store
            .mark_commitment_paid(user, commitment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, CommitmentStatus::Paid);
        assert_eq!(first.paid_amount, 5000);

        let second = store
            .mark_commitment_paid(user, commitment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, CommitmentStatus::Paid);
        assert_eq!(second.paid_amount, 5000);
    }

    #[tokio::test]
    async fn monthly_budget_upsert_overwrites() {
        let store = InMemoryLedgerStore::new();
        let user = Uuid::new_v4();

        store
            .upsert_monthly_budget(user, "2026-08", 500_000)
            .await
            .unwrap();
        store
            .upsert_monthly_budget(user, "2026-08", 600_000)
            .await
            .unwrap();

        let row = store
            .get_monthly_budget(user, "2026-08")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.amount, 600_000);
    }
}
