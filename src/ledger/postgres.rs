//! Postgres ledger store.
//!
//! Schema is bootstrapped lazily on first use. Uniqueness of the
//! `(user, section, lower(name))` category triple is enforced by a
//! unique index as a backstop against check-then-insert races: a race
//! produces a clean conflict error instead of a duplicate row.

use super::{ExpensePatch, LedgerStore, NewExpense};
use crate::error::EngineError;
use crate::models::{
    Category, Commitment, CommitmentKind, CommitmentStatus, Expense, MonthlyBudget, PendingExpense,
    PendingStatus,
};
use crate::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PgLedgerStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| EngineError::Database(format!("Failed to configure pool: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS categories (
                      id BIGSERIAL PRIMARY KEY,
                      user_id UUID NOT NULL,
                      section TEXT NOT NULL,
                      name TEXT NOT NULL,
                      budget BIGINT NOT NULL DEFAULT 0
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_triple
                    ON categories (user_id, section, LOWER(name));
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS expenses (
                      id BIGSERIAL PRIMARY KEY,
                      user_id UUID NOT NULL,
                      section TEXT NOT NULL,
                      category TEXT NOT NULL,
                      amount BIGINT NOT NULL,
                      concept TEXT NOT NULL,
                      date DATE NOT NULL,
                      payment_method TEXT NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_expenses_user_recent
                    ON expenses (user_id, id DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS commitments (
                      id BIGSERIAL PRIMARY KEY,
                      user_id UUID NOT NULL,
                      title TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      total_amount BIGINT NOT NULL,
                      paid_amount BIGINT NOT NULL DEFAULT 0,
                      status TEXT NOT NULL DEFAULT 'PENDING',
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS monthly_budgets (
                      user_id UUID NOT NULL,
                      month TEXT NOT NULL,
                      amount BIGINT NOT NULL,
                      PRIMARY KEY (user_id, month)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS pending_expenses (
                      id BIGSERIAL PRIMARY KEY,
                      user_id UUID NOT NULL,
                      amount BIGINT NOT NULL,
                      concept TEXT NOT NULL,
                      status TEXT NOT NULL DEFAULT 'PENDING'
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                EngineError::Database(format!("Failed to initialize ledger schema: {}", e))
            })?;

        Ok(())
    }
}

fn kind_to_db(kind: CommitmentKind) -> &'static str {
    match kind {
        CommitmentKind::Debt => "DEBT",
        CommitmentKind::Loan => "LOAN",
    }
}

fn kind_from_db(kind: &str) -> CommitmentKind {
    match kind {
        "LOAN" => CommitmentKind::Loan,
        _ => CommitmentKind::Debt,
    }
}

fn status_from_db(status: &str) -> CommitmentStatus {
    match status {
        "PAID" => CommitmentStatus::Paid,
        _ => CommitmentStatus::Pending,
    }
}

fn pending_status_to_db(status: PendingStatus) -> &'static str {
    match status {
        PendingStatus::Pending => "PENDING",
        PendingStatus::Processed => "PROCESSED",
        PendingStatus::Ignored => "IGNORED",
    }
}

fn pending_status_from_db(status: &str) -> PendingStatus {
    match status {
        "PROCESSED" => PendingStatus::Processed,
        "IGNORED" => PendingStatus::Ignored,
        _ => PendingStatus::Pending,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn category_from_row(row: &PgRow) -> std::result::Result<Category, sqlx::Error> {
    Ok(Category {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        section: row.try_get("section")?,
        name: row.try_get("name")?,
        budget: row.try_get("budget")?,
    })
}

fn expense_from_row(row: &PgRow) -> std::result::Result<Expense, sqlx::Error> {
    Ok(Expense {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        section: row.try_get("section")?,
        category: row.try_get("category")?,
        amount: row.try_get("amount")?,
        concept: row.try_get("concept")?,
        date: row.try_get("date")?,
        payment_method: row.try_get("payment_method")?,
    })
}

fn commitment_from_row(row: &PgRow) -> std::result::Result<Commitment, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(Commitment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        kind: kind_from_db(&kind),
        total_amount: row.try_get("total_amount")?,
        paid_amount: row.try_get("paid_amount")?,
        status: status_from_db(&status),
        created_at: row.try_get("created_at")?,
    })
}

fn pending_from_row(row: &PgRow) -> std::result::Result<PendingExpense, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(PendingExpense {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        concept: row.try_get("concept")?,
        status: pending_status_from_db(&status),
    })
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn list_categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, user_id, section, name, budget FROM categories WHERE user_id = $1 ORDER BY section, name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| category_from_row(row).map_err(EngineError::from))
            .collect()
    }

    async fn find_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
    ) -> Result<Option<Category>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT id, user_id, section, name, budget FROM categories
            WHERE user_id = $1 AND section = $2 AND LOWER(name) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(section)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| category_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn find_categories_named(&self, user_id: Uuid, name: &str) -> Result<Vec<Category>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, section, name, budget FROM categories
            WHERE user_id = $1 AND LOWER(name) = LOWER($2)
            ORDER BY section
            "#,
        )
        .bind(user_id)
        .bind(name.trim())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| category_from_row(row).map_err(EngineError::from))
            .collect()
    }

    async fn insert_category(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<Category> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO categories (user_id, section, name, budget)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, section, name, budget
            "#,
        )
        .bind(user_id)
        .bind(section)
        .bind(name.trim())
        .bind(budget)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EngineError::Conflict(format!(
                    "category '{}' already exists in '{}'",
                    name, section
                ))
            } else {
                EngineError::from(e)
            }
        })?;

        Ok(category_from_row(&row)?)
    }

    async fn set_category_budget(
        &self,
        user_id: Uuid,
        section: &str,
        name: &str,
        budget: i64,
    ) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            r#"
            UPDATE categories SET budget = $4
            WHERE user_id = $1 AND section = $2 AND LOWER(name) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(section)
        .bind(name.trim())
        .bind(budget)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!(
                "category '{}' in '{}'",
                name, section
            )));
        }
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
        self.ensure_schema().await?;

        // Rename and cascade in one transaction so a failure cannot
        // leave expenses pointing at a name that no longer exists.
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE categories SET section = $4, name = $5
            WHERE user_id = $1 AND section = $2 AND LOWER(name) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(old_section)
        .bind(old_name.trim())
        .bind(new_section)
        .bind(new_name.trim())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EngineError::Conflict(format!(
                    "category '{}' already exists in '{}'",
                    new_name, new_section
                ))
            } else {
                EngineError::from(e)
            }
        })?;

        if updated.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!(
                "category '{}' in '{}'",
                old_name, old_section
            )));
        }

        let cascaded = sqlx::query(
            r#"
            UPDATE expenses SET section = $4, category = $5
            WHERE user_id = $1 AND section = $2 AND LOWER(category) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(old_section)
        .bind(old_name.trim())
        .bind(new_section)
        .bind(new_name.trim())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(cascaded.rows_affected())
    }

    async fn delete_category(&self, user_id: Uuid, section: &str, name: &str) -> Result<()> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM categories
            WHERE user_id = $1 AND section = $2 AND LOWER(name) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(section)
        .bind(name.trim())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
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
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM expenses
            WHERE user_id = $1 AND section = $2 AND LOWER(category) = LOWER($3)
            "#,
        )
        .bind(user_id)
        .bind(section)
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("n")?)
    }

    async fn insert_expense(&self, expense: NewExpense) -> Result<Expense> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO expenses (user_id, section, category, amount, concept, date, payment_method)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, section, category, amount, concept, date, payment_method
            "#,
        )
        .bind(expense.user_id)
        .bind(&expense.section)
        .bind(&expense.category)
        .bind(expense.amount)
        .bind(&expense.concept)
        .bind(expense.date)
        .bind(&expense.payment_method)
        .fetch_one(&self.pool)
        .await?;

        Ok(expense_from_row(&row)?)
    }

    async fn get_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT id, user_id, section, category, amount, concept, date, payment_method
            FROM expenses WHERE user_id = $1 AND id = $2
            "#,
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| expense_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn update_expense(
        &self,
        user_id: Uuid,
        id: i64,
        patch: ExpensePatch,
    ) -> Result<Option<Expense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            UPDATE expenses SET
              amount = COALESCE($3, amount),
              concept = COALESCE($4, concept),
              category = COALESCE($5, category),
              section = COALESCE($6, section)
            WHERE user_id = $1 AND id = $2
            RETURNING id, user_id, section, category, amount, concept, date, payment_method
            "#,
        )
        .bind(user_id)
        .bind(id)
        .bind(patch.amount)
        .bind(patch.concept)
        .bind(patch.category)
        .bind(patch.section)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| expense_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn delete_expense(&self, user_id: Uuid, id: i64) -> Result<Option<Expense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            DELETE FROM expenses WHERE user_id = $1 AND id = $2
            RETURNING id, user_id, section, category, amount, concept, date, payment_method
            "#,
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| expense_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn recent_expenses(&self, user_id: Uuid, limit: usize) -> Result<Vec<Expense>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, section, category, amount, concept, date, payment_method
            FROM expenses WHERE user_id = $1 ORDER BY id DESC LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| expense_from_row(row).map_err(EngineError::from))
            .collect()
    }

    async fn insert_commitment(
        &self,
        user_id: Uuid,
        title: &str,
        kind: CommitmentKind,
        total_amount: i64,
    ) -> Result<Commitment> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO commitments (user_id, title, kind, total_amount, paid_amount, status)
            VALUES ($1, $2, $3, $4, 0, 'PENDING')
            RETURNING id, user_id, title, kind, total_amount, paid_amount, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(kind_to_db(kind))
        .bind(total_amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(commitment_from_row(&row)?)
    }

    async fn mark_commitment_paid(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            UPDATE commitments SET paid_amount = total_amount, status = 'PAID'
            WHERE user_id = $1 AND id = $2
            RETURNING id, user_id, title, kind, total_amount, paid_amount, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| commitment_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn delete_commitment(&self, user_id: Uuid, id: i64) -> Result<Option<Commitment>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            DELETE FROM commitments WHERE user_id = $1 AND id = $2
            RETURNING id, user_id, title, kind, total_amount, paid_amount, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| commitment_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn recent_commitments(&self, user_id: Uuid, limit: usize) -> Result<Vec<Commitment>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, kind, total_amount, paid_amount, status, created_at
            FROM commitments WHERE user_id = $1 ORDER BY id DESC LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| commitment_from_row(row).map_err(EngineError::from))
            .collect()
    }

    async fn get_monthly_budget(
        &self,
        user_id: Uuid,
        month: &str,
    ) -> Result<Option<MonthlyBudget>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT user_id, month, amount FROM monthly_budgets WHERE user_id = $1 AND month = $2",
        )
        .bind(user_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(MonthlyBudget {
                user_id: r.try_get("user_id")?,
                month: r.try_get("month")?,
                amount: r.try_get("amount")?,
            }),
            None => None,
        })
    }

    async fn upsert_monthly_budget(
        &self,
        user_id: Uuid,
        month: &str,
        amount: i64,
    ) -> Result<MonthlyBudget> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO monthly_budgets (user_id, month, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, month) DO UPDATE SET amount = EXCLUDED.amount
            "#,
        )
        .bind(user_id)
        .bind(month)
        .bind(amount)
        .execute(&self.pool)
        .await?;

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
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO pending_expenses (user_id, amount, concept, status)
            VALUES ($1, $2, $3, 'PENDING')
            RETURNING id, user_id, amount, concept, status
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(concept)
        .fetch_one(&self.pool)
        .await?;

        Ok(pending_from_row(&row)?)
    }

    async fn get_pending_expense(&self, user_id: Uuid, id: i64) -> Result<Option<PendingExpense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT id, user_id, amount, concept, status FROM pending_expenses WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| pending_from_row(&r).map_err(EngineError::from))
            .transpose()
    }

    async fn set_pending_status(
        &self,
        user_id: Uuid,
        id: i64,
        status: PendingStatus,
    ) -> Result<Option<PendingExpense>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            UPDATE pending_expenses SET status = $3
            WHERE user_id = $1 AND id = $2
            RETURNING id, user_id, amount, concept, status
            "#,
        )
        .bind(user_id)
        .bind(id)
        .bind(pending_status_to_db(status))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| pending_from_row(&r).map_err(EngineError::from))
            .transpose()
    }
}
