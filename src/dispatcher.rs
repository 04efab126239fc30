//! Action dispatcher
//!
//! Stateless per call. Matches exhaustively over the closed `Action`
//! type and routes each intent to its executor. A batch runs strictly
//! in order, so later intents observe earlier effects; a recoverable
//! failure becomes a fragment and the rest of the batch still runs.

use crate::executors::{self, ExecCtx};
use crate::memory::PendingQuestion;
use crate::models::Action;
use crate::Result;
use tracing::{debug, warn};

/// Accumulated result of one intent batch.
#[derive(Debug, Default)]
pub struct DispatchResult {
    pub fragments: Vec<String>,
    pub mutations: usize,
    /// Question to leave open for the next message. At most one; with
    /// several askers in one batch the last one wins.
    pub pending: Option<PendingQuestion>,
}

pub async fn dispatch_batch(ctx: &ExecCtx<'_>, actions: Vec<Action>) -> Result<DispatchResult> {
    let mut result = DispatchResult::default();

    for action in actions {
        let kind = action.kind_name();
        debug!("Dispatching {}", kind);

        match dispatch_one(ctx, action).await {
            Ok(outcome) => {
                if outcome.mutated {
                    result.mutations += 1;
                }
                if let Some(fragment) = outcome.fragment {
                    result.fragments.push(fragment);
                }
                if outcome.pending.is_some() {
                    result.pending = outcome.pending;
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("{} recovered into a fragment: {}", kind, e);
                if let Some(msg) = e.user_message() {
                    result.fragments.push(msg.to_string());
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(result)
}

async fn dispatch_one(ctx: &ExecCtx<'_>, action: Action) -> Result<executors::ExecOutcome> {
    match action {
        Action::CreateExpense {
            section,
            category,
            amount,
            concept,
            payment_method,
        } => executors::create_expense(ctx, section, category, amount, concept, payment_method).await,
        Action::UpdateExpense {
            target_id,
            amount,
            concept,
            category,
            section,
        } => executors::update_expense(ctx, target_id, amount, concept, category, section).await,
        Action::DeleteExpense { target_id } => executors::delete_expense(ctx, target_id).await,
        Action::CreateCategory {
            section,
            category,
            budget,
        } => executors::create_category(ctx, section, category, budget).await,
        Action::UpdateCategory {
            section,
            category,
            new_name,
            new_section,
            new_budget,
        } => {
            executors::update_category(ctx, section, category, new_name, new_section, new_budget)
                .await
        }
        Action::DeleteCategory { section, category } => {
            executors::delete_category(ctx, section, category).await
        }
        Action::CreateCommitment {
            counterparty,
            amount,
            reason,
            kind,
        } => executors::create_commitment(ctx, counterparty, amount, reason, kind).await,
        Action::MarkCommitmentPaid { target_id } => {
            executors::mark_commitment_paid(ctx, target_id).await
        }
        Action::DeleteCommitment { target_id } => {
            executors::delete_commitment(ctx, target_id).await
        }
        Action::UpdateGlobalBudget { amount } => {
            executors::update_global_budget(ctx, amount).await
        }
        Action::IgnorePending => executors::ignore_pending(ctx).await,
        Action::Talk { response_text } => Ok(executors::talk(response_text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::{InMemoryLedgerStore, LedgerStore};
    use crate::mirror::{Mirror, NullMirror};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use uuid::Uuid;

    fn test_ctx<'a>(
        ledger: &'a InMemoryLedgerStore,
        mirror: &'a Mirror,
        user_id: Uuid,
        message: &'a str,
    ) -> ExecCtx<'a> {
        ExecCtx {
            ledger,
            mirror,
            user_id,
            message,
            today: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
            pending_ref: None,
        }
    }

    #[tokio::test]
    async fn later_intents_observe_earlier_effects() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = Mirror::spawn(Arc::new(NullMirror), &EngineConfig::default());
        let user = Uuid::new_v4();
        let ctx = test_ctx(&ledger, &mirror, user, "crea auto y anota bencina 5000");

        let batch = vec![
            Action::CreateCategory {
                section: Some("AUTO".into()),
                category: Some("Bencina".into()),
                budget: None,
            },
            Action::CreateExpense {
                section: None,
                category: Some("Bencina".into()),
                amount: Some(5_000),
                concept: Some("Bencina".into()),
                payment_method: None,
            },
        ];

        let result = dispatch_batch(&ctx, batch).await.unwrap();
        assert_eq!(result.mutations, 2);
        assert_eq!(result.fragments.len(), 2);
        // The expense found the category created one intent earlier.
        let expenses = ledger.recent_expenses(user, 10).await.unwrap();
        assert_eq!(expenses[0].section, "AUTO");
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = Mirror::spawn(Arc::new(NullMirror), &EngineConfig::default());
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Luz", 0).await.unwrap();
        let ctx = test_ctx(&ledger, &mirror, user, "borra el gasto 999 y anota luz 10000");

        let batch = vec![
            Action::DeleteExpense {
                target_id: Some(999),
            },
            Action::CreateExpense {
                section: Some("CASA".into()),
                category: Some("Luz".into()),
                amount: Some(10_000),
                concept: Some("Luz".into()),
                payment_method: None,
            },
        ];

        let result = dispatch_batch(&ctx, batch).await.unwrap();
        assert_eq!(result.mutations, 1);
        assert_eq!(result.fragments.len(), 2);
        assert!(result.fragments[0].contains("No encontré el gasto 999"));
    }

    #[tokio::test]
    async fn talk_without_text_produces_nothing() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = Mirror::spawn(Arc::new(NullMirror), &EngineConfig::default());
        let ctx = test_ctx(&ledger, &mirror, Uuid::new_v4(), "asdf");

        let result = dispatch_batch(&ctx, vec![Action::Talk {
            response_text: None,
        }])
        .await
        .unwrap();

        assert_eq!(result.mutations, 0);
        assert!(result.fragments.is_empty());
    }
}
