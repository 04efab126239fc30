//! Mutation executors
//!
//! One executor per intent kind. Each validates its slots against the
//! ledger, applies the mutation, produces the Spanish fragment the user
//! sees, and enqueues a mirror event. Validation, not-found and
//! conflict failures carry user-facing text; the dispatcher converts
//! them into fragments instead of failing the message.

use crate::error::EngineError;
use crate::ledger::{canonical_section, ExpensePatch, LedgerStore, NewExpense};
use crate::memory::PendingQuestion;
use crate::mirror::{ExpenseRow, Mirror, MirrorEvent};
use crate::models::{month_key, CommitmentKind, Expense, PendingStatus};
use crate::resolver;
use crate::Result;
use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

/// Reasons too generic to identify a commitment later.
const GENERIC_REASONS: [&str; 4] = ["deuda", "plata", "pago", "debo"];

/// Verbs that turn a budget-change intent into an increment instead of
/// an overwrite.
const INCREMENT_VERBS: [&str; 4] = ["suma", "agrega", "añade", "+"];

/// Everything an executor needs for one intent.
pub struct ExecCtx<'a> {
    pub ledger: &'a dyn LedgerStore,
    pub mirror: &'a Mirror,
    pub user_id: Uuid,
    /// Verbatim user message, used for increment-verb detection and
    /// silent section disambiguation.
    pub message: &'a str,
    pub today: NaiveDate,
    /// Pending-expense row in play for this message, if any.
    pub pending_ref: Option<i64>,
}

/// What one executor produced.
#[derive(Debug)]
pub struct ExecOutcome {
    pub fragment: Option<String>,
    pub mutated: bool,
    pub pending: Option<PendingQuestion>,
}

impl ExecOutcome {
    fn mutation(fragment: String) -> Self {
        Self {
            fragment: Some(fragment),
            mutated: true,
            pending: None,
        }
    }

    fn reply(fragment: String) -> Self {
        Self {
            fragment: Some(fragment),
            mutated: false,
            pending: None,
        }
    }

    fn question(fragment: String, pending: PendingQuestion) -> Self {
        Self {
            fragment: Some(fragment),
            mutated: false,
            pending: Some(pending),
        }
    }

    fn silent() -> Self {
        Self {
            fragment: None,
            mutated: false,
            pending: None,
        }
    }
}

/// "$1.234.567" — CLP has no fractional units.
pub fn format_clp(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    format!("${}", out)
}

/// Budget-change policy: an increment verb in the message means
/// old + delta instead of overwrite.
pub fn is_increment_request(message: &str) -> bool {
    let lowered = message.to_lowercase();
    INCREMENT_VERBS.iter().any(|v| lowered.contains(v))
}

fn is_generic_reason(reason: &str) -> bool {
    let lowered = reason.trim().to_lowercase();
    lowered.is_empty() || GENERIC_REASONS.contains(&lowered.as_str())
}

fn expense_row(expense: &Expense) -> ExpenseRow {
    ExpenseRow {
        date: expense.date,
        concept: expense.concept.clone(),
        section: expense.section.clone(),
        category: expense.category.clone(),
        amount: expense.amount,
        payment_method: expense.payment_method.clone(),
    }
}

fn require_amount(amount: Option<i64>, what: &str) -> Result<i64> {
    amount
        .filter(|a| *a > 0)
        .ok_or_else(|| EngineError::Validation(format!("Necesito un monto para {}.", what)))
}

/// Resolve a category reference that may omit the section. With no
/// section the name has to be unique across sections; a collision is a
/// conflict the user resolves by naming the folder.
async fn resolve_category(
    ctx: &ExecCtx<'_>,
    section: Option<String>,
    name: &str,
) -> Result<crate::models::Category> {
    match section {
        Some(s) if !s.trim().is_empty() => {
            let section = canonical_section(&s);
            ctx.ledger
                .find_category(ctx.user_id, &section, name)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "No encontré la categoría \"{}\" en {}.",
                        name, section
                    ))
                })
        }
        _ => {
            let mut matches = ctx.ledger.find_categories_named(ctx.user_id, name).await?;
            match matches.len() {
                0 => Err(EngineError::NotFound(format!(
                    "No encontré la categoría \"{}\".",
                    name
                ))),
                1 => Ok(matches.remove(0)),
                _ => {
                    let sections: Vec<String> =
                        matches.iter().map(|c| c.section.clone()).collect();
                    Err(EngineError::Conflict(format!(
                        "Tienes \"{}\" en varias carpetas: {}. Indícame la carpeta.",
                        name,
                        sections.join(", ")
                    )))
                }
            }
        }
    }
}

//
// ================= Expenses =================
//

pub async fn create_expense(
    ctx: &ExecCtx<'_>,
    section: Option<String>,
    category: Option<String>,
    amount: Option<i64>,
    concept: Option<String>,
    payment_method: Option<String>,
) -> Result<ExecOutcome> {
    let category = category
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| EngineError::Validation("¿Qué gasto quieres registrar?".to_string()))?;
    let amount = require_amount(amount, "registrar el gasto")?;
    let concept = concept
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| category.clone());

    let section = match section {
        Some(s) if !s.trim().is_empty() => canonical_section(&s),
        _ => {
            let existing = ctx
                .ledger
                .find_categories_named(ctx.user_id, &category)
                .await?;
            match existing.len() {
                1 => existing[0].section.clone(),
                0 => {
                    return Ok(ExecOutcome::question(
                        format!("¿A qué carpeta pertenece \"{}\"?", category),
                        PendingQuestion::SectionForExpense {
                            category,
                            amount,
                            concept,
                            payment_method,
                            candidates: Vec::new(),
                            pending_ref: ctx.pending_ref,
                        },
                    ));
                }
                _ => {
                    let sections: Vec<String> =
                        existing.iter().map(|c| c.section.clone()).collect();
                    match resolver::message_names_candidate(ctx.message, &sections) {
                        Some(matched) => matched,
                        None => {
                            return Ok(ExecOutcome::question(
                                format!(
                                    "Tienes \"{}\" en varias carpetas: {}. ¿En cuál va?",
                                    category,
                                    sections.join(", ")
                                ),
                                PendingQuestion::SectionForExpense {
                                    category,
                                    amount,
                                    concept,
                                    payment_method,
                                    candidates: sections,
                                    pending_ref: ctx.pending_ref,
                                },
                            ));
                        }
                    }
                }
            }
        }
    };

    let mut created_category = false;
    let target = match ctx
        .ledger
        .find_category(ctx.user_id, &section, &category)
        .await?
    {
        Some(c) => c,
        None => {
            created_category = true;
            match ctx
                .ledger
                .insert_category(ctx.user_id, &section, &category, 0)
                .await
            {
                Ok(c) => c,
                // Lost a check-then-insert race; the row is there now.
                Err(EngineError::Conflict(_)) => ctx
                    .ledger
                    .find_category(ctx.user_id, &section, &category)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Integrity(format!(
                            "No pude crear la categoría \"{}\" en {}.",
                            category, section
                        ))
                    })?,
                Err(e) => return Err(e),
            }
        }
    };

    let payment_method = payment_method
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "Efectivo".to_string());

    let expense = ctx
        .ledger
        .insert_expense(NewExpense {
            user_id: ctx.user_id,
            section: target.section.clone(),
            category: target.name.clone(),
            amount,
            concept: concept.clone(),
            date: ctx.today,
            payment_method,
        })
        .await?;

    if let Some(pending_id) = ctx.pending_ref {
        if ctx
            .ledger
            .set_pending_status(ctx.user_id, pending_id, PendingStatus::Processed)
            .await?
            .is_none()
        {
            warn!("Pending expense {} vanished before fold", pending_id);
        }
    }

    ctx.mirror.publish(MirrorEvent::ExpenseCreated {
        user_id: ctx.user_id,
        row: expense_row(&expense),
    });

    let mut fragment = format!(
        "✅ Gasto registrado: {} {} en {} / {}",
        expense.concept,
        format_clp(expense.amount),
        expense.section,
        expense.category
    );
    if created_category {
        fragment.push_str(" (categoría nueva)");
    }
    Ok(ExecOutcome::mutation(fragment))
}

pub async fn update_expense(
    ctx: &ExecCtx<'_>,
    target_id: Option<i64>,
    amount: Option<i64>,
    concept: Option<String>,
    category: Option<String>,
    section: Option<String>,
) -> Result<ExecOutcome> {
    let id = target_id.ok_or_else(|| {
        EngineError::Validation("Necesito el ID del gasto a actualizar.".to_string())
    })?;

    let patch = ExpensePatch {
        amount: amount.filter(|a| *a > 0),
        concept: concept.filter(|c| !c.trim().is_empty()),
        category: category.filter(|c| !c.trim().is_empty()),
        section: section
            .filter(|s| !s.trim().is_empty())
            .map(|s| canonical_section(&s)),
    };
    if patch.is_empty() {
        return Err(EngineError::Validation(
            "No veo qué cambiar en el gasto.".to_string(),
        ));
    }

    let previous = ctx
        .ledger
        .get_expense(ctx.user_id, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("No encontré el gasto {}.", id)))?;

    let updated = ctx
        .ledger
        .update_expense(ctx.user_id, id, patch)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("No encontré el gasto {}.", id)))?;

    ctx.mirror.publish(MirrorEvent::ExpenseUpdated {
        user_id: ctx.user_id,
        previous: expense_row(&previous),
        row: expense_row(&updated),
    });

    Ok(ExecOutcome::mutation(format!(
        "Gasto {} actualizado: {} {}",
        id,
        updated.concept,
        format_clp(updated.amount)
    )))
}

pub async fn delete_expense(ctx: &ExecCtx<'_>, target_id: Option<i64>) -> Result<ExecOutcome> {
    let id = target_id.ok_or_else(|| {
        EngineError::Validation("Necesito el ID del gasto a eliminar.".to_string())
    })?;

    let deleted = ctx
        .ledger
        .delete_expense(ctx.user_id, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("No encontré el gasto {}.", id)))?;

    ctx.mirror.publish(MirrorEvent::ExpenseDeleted {
        user_id: ctx.user_id,
        row: expense_row(&deleted),
    });

    Ok(ExecOutcome::mutation(format!(
        "Gasto {} eliminado ({} {}).",
        id,
        deleted.concept,
        format_clp(deleted.amount)
    )))
}

//
// ================= Categories =================
//

pub async fn create_category(
    ctx: &ExecCtx<'_>,
    section: Option<String>,
    category: Option<String>,
    budget: Option<i64>,
) -> Result<ExecOutcome> {
    let (section, name) = match (section, category) {
        (Some(s), Some(c)) if !s.trim().is_empty() && !c.trim().is_empty() => {
            (canonical_section(&s), c)
        }
        _ => {
            return Err(EngineError::Validation(
                "Necesito carpeta y nombre para crear la categoría.".to_string(),
            ))
        }
    };
    let budget = budget.unwrap_or(0).max(0);

    let created = ctx
        .ledger
        .insert_category(ctx.user_id, &section, &name, budget)
        .await
        .map_err(|e| match e {
            EngineError::Conflict(_) => EngineError::Conflict(format!(
                "La categoría \"{}\" ya existe en {}.",
                name, section
            )),
            other => other,
        })?;

    ctx.mirror.publish(MirrorEvent::CategoryCreated {
        user_id: ctx.user_id,
        section: created.section.clone(),
        name: created.name.clone(),
        budget: created.budget,
    });

    // A category born with a budget also gets an opening expense for
    // that amount, so the replica's column sums stay consistent.
    if created.budget > 0 {
        let opening = ctx
            .ledger
            .insert_expense(NewExpense {
                user_id: ctx.user_id,
                section: created.section.clone(),
                category: created.name.clone(),
                amount: created.budget,
                concept: created.name.clone(),
                date: ctx.today,
                payment_method: "Efectivo".to_string(),
            })
            .await?;
        ctx.mirror.publish(MirrorEvent::ExpenseCreated {
            user_id: ctx.user_id,
            row: expense_row(&opening),
        });
    }

    let fragment = if created.budget > 0 {
        format!(
            "✅ Categoría \"{}\" creada en {} con presupuesto {}",
            created.name,
            created.section,
            format_clp(created.budget)
        )
    } else {
        format!("✅ Categoría \"{}\" creada en {}", created.name, created.section)
    };
    Ok(ExecOutcome::mutation(fragment))
}

pub async fn update_category(
    ctx: &ExecCtx<'_>,
    section: Option<String>,
    category: Option<String>,
    new_name: Option<String>,
    new_section: Option<String>,
    new_budget: Option<i64>,
) -> Result<ExecOutcome> {
    let name = category
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            EngineError::Validation("¿Qué categoría quieres modificar?".to_string())
        })?;

    let new_name = new_name.filter(|n| !n.trim().is_empty());
    let new_section = new_section
        .filter(|s| !s.trim().is_empty())
        .map(|s| canonical_section(&s));
    if new_name.is_none() && new_section.is_none() && new_budget.is_none() {
        return Err(EngineError::Validation(
            "No veo qué cambiar en la categoría.".to_string(),
        ));
    }

    let current = resolve_category(ctx, section, &name).await?;

    let mut parts: Vec<String> = Vec::new();
    let mut final_section = current.section.clone();
    let mut final_name = current.name.clone();

    if new_name.is_some() || new_section.is_some() {
        let target_section = new_section.clone().unwrap_or_else(|| current.section.clone());
        let target_name = new_name.clone().unwrap_or_else(|| current.name.clone());

        let cascaded = ctx
            .ledger
            .rename_category(
                ctx.user_id,
                &current.section,
                &current.name,
                &target_section,
                &target_name,
            )
            .await
            .map_err(|e| match e {
                EngineError::Conflict(_) => EngineError::Conflict(format!(
                    "Ya existe una categoría \"{}\" en {}.",
                    target_name, target_section
                )),
                other => other,
            })?;

        ctx.mirror.publish(MirrorEvent::CategoryRenamed {
            user_id: ctx.user_id,
            old_section: current.section.clone(),
            old_name: current.name.clone(),
            section: target_section.clone(),
            name: target_name.clone(),
        });

        parts.push(format!(
            "Categoría \"{}\" ahora es \"{}\" en {} ({} gastos actualizados)",
            current.name, target_name, target_section, cascaded
        ));
        final_section = target_section;
        final_name = target_name;
    }

    if let Some(delta) = new_budget {
        let budget = if is_increment_request(ctx.message) {
            current.budget + delta
        } else {
            delta
        };

        ctx.ledger
            .set_category_budget(ctx.user_id, &final_section, &final_name, budget)
            .await?;

        ctx.mirror.publish(MirrorEvent::CategoryBudgetSet {
            user_id: ctx.user_id,
            section: final_section.clone(),
            name: final_name.clone(),
            budget,
        });

        parts.push(format!(
            "Presupuesto de \"{}\": {}",
            final_name,
            format_clp(budget)
        ));
    }

    Ok(ExecOutcome::mutation(parts.join(". ")))
}

pub async fn delete_category(
    ctx: &ExecCtx<'_>,
    section: Option<String>,
    category: Option<String>,
) -> Result<ExecOutcome> {
    let name = category
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            EngineError::Validation("¿Qué categoría quieres eliminar?".to_string())
        })?;

    let current = resolve_category(ctx, section, &name).await?;

    let blocking = ctx
        .ledger
        .count_expenses_for_category(ctx.user_id, &current.section, &current.name)
        .await?;
    if blocking > 0 {
        // Refusal, not an error: the ledger stays untouched and the
        // user gets the count.
        return Ok(ExecOutcome::reply(format!(
            "No puedo eliminar \"{}\": tiene {} gastos asociados.",
            current.name, blocking
        )));
    }

    ctx.ledger
        .delete_category(ctx.user_id, &current.section, &current.name)
        .await?;

    ctx.mirror.publish(MirrorEvent::CategoryDeleted {
        user_id: ctx.user_id,
        section: current.section.clone(),
        name: current.name.clone(),
    });

    Ok(ExecOutcome::mutation(format!(
        "Categoría \"{}\" eliminada de {}.",
        current.name, current.section
    )))
}

//
// ================= Commitments =================
//

pub async fn create_commitment(
    ctx: &ExecCtx<'_>,
    counterparty: Option<String>,
    amount: Option<i64>,
    reason: Option<String>,
    kind: CommitmentKind,
) -> Result<ExecOutcome> {
    let counterparty = counterparty
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            EngineError::Validation(match kind {
                CommitmentKind::Debt => "¿Con quién es la deuda?".to_string(),
                CommitmentKind::Loan => "¿A quién le prestaste?".to_string(),
            })
        })?;
    let amount = require_amount(amount, "registrar el compromiso")?;

    // A reason like "deuda" or "plata" would make the row impossible
    // to tell apart later; ask for a concrete one before creating.
    let reason = match reason {
        Some(r) if !is_generic_reason(&r) => r.trim().to_string(),
        _ => {
            let question = match kind {
                CommitmentKind::Debt => {
                    format!("¿Por qué es la deuda con {}?", counterparty)
                }
                CommitmentKind::Loan => {
                    format!("¿Por qué es el préstamo a {}?", counterparty)
                }
            };
            return Ok(ExecOutcome::question(
                question,
                PendingQuestion::CommitmentReason {
                    counterparty,
                    amount,
                    kind,
                },
            ));
        }
    };

    let title = format!("{} - {}", counterparty.trim(), reason);
    let commitment = ctx
        .ledger
        .insert_commitment(ctx.user_id, &title, kind, amount)
        .await?;

    ctx.mirror.publish(MirrorEvent::CommitmentCreated {
        user_id: ctx.user_id,
        title: commitment.title.clone(),
        kind,
        amount: commitment.total_amount,
    });

    let label = match kind {
        CommitmentKind::Debt => "Deuda registrada",
        CommitmentKind::Loan => "Préstamo registrado",
    };
    Ok(ExecOutcome::mutation(format!(
        "✅ {}: {} {}",
        label,
        commitment.title,
        format_clp(commitment.total_amount)
    )))
}

pub async fn mark_commitment_paid(
    ctx: &ExecCtx<'_>,
    target_id: Option<i64>,
) -> Result<ExecOutcome> {
    let id = target_id
        .ok_or_else(|| EngineError::Validation("Necesito el ID del compromiso.".to_string()))?;

    // Idempotent: re-marking a paid commitment reports the same
    // confirmation.
    let commitment = ctx
        .ledger
        .mark_commitment_paid(ctx.user_id, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("No encontré el compromiso {}.", id)))?;

    ctx.mirror.publish(MirrorEvent::CommitmentPaid {
        user_id: ctx.user_id,
        title: commitment.title.clone(),
    });

    Ok(ExecOutcome::mutation(format!(
        "✅ \"{}\" marcado como pagado.",
        commitment.title
    )))
}

pub async fn delete_commitment(
    ctx: &ExecCtx<'_>,
    target_id: Option<i64>,
) -> Result<ExecOutcome> {
    let id = target_id
        .ok_or_else(|| EngineError::Validation("Necesito el ID del compromiso.".to_string()))?;

    let deleted = ctx
        .ledger
        .delete_commitment(ctx.user_id, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("No encontré el compromiso {}.", id)))?;

    ctx.mirror.publish(MirrorEvent::CommitmentDeleted {
        user_id: ctx.user_id,
        title: deleted.title.clone(),
    });

    Ok(ExecOutcome::mutation(format!(
        "Compromiso eliminado: {}.",
        deleted.title
    )))
}

//
// ================= Budget / pending / talk =================
//

pub async fn update_global_budget(
    ctx: &ExecCtx<'_>,
    amount: Option<i64>,
) -> Result<ExecOutcome> {
    let delta = require_amount(amount, "el presupuesto")?;
    let month = month_key(ctx.today);

    let budget = if is_increment_request(ctx.message) {
        let current = ctx
            .ledger
            .get_monthly_budget(ctx.user_id, &month)
            .await?
            .map(|b| b.amount)
            .unwrap_or(0);
        current + delta
    } else {
        delta
    };

    let saved = ctx
        .ledger
        .upsert_monthly_budget(ctx.user_id, &month, budget)
        .await?;

    ctx.mirror.publish(MirrorEvent::BudgetSet {
        user_id: ctx.user_id,
        month: saved.month.clone(),
        amount: saved.amount,
    });

    Ok(ExecOutcome::mutation(format!(
        "Presupuesto de {}: {}.",
        saved.month,
        format_clp(saved.amount)
    )))
}

/// No-op when no pending expense is in play: nothing to report, nothing
/// to mutate.
pub async fn ignore_pending(ctx: &ExecCtx<'_>) -> Result<ExecOutcome> {
    let Some(id) = ctx.pending_ref else {
        return Ok(ExecOutcome::silent());
    };

    match ctx
        .ledger
        .set_pending_status(ctx.user_id, id, PendingStatus::Ignored)
        .await?
    {
        Some(_) => Ok(ExecOutcome::mutation("Listo, lo ignoro.".to_string())),
        None => {
            warn!("Pending expense {} vanished before ignore", id);
            Ok(ExecOutcome::silent())
        }
    }
}

pub fn talk(response_text: Option<String>) -> ExecOutcome {
    match response_text.filter(|t| !t.trim().is_empty()) {
        Some(text) => ExecOutcome::reply(text),
        None => ExecOutcome::silent(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::InMemoryLedgerStore;
    use crate::mirror::NullMirror;
    use std::sync::Arc;

    fn test_mirror() -> Mirror {
        Mirror::spawn(Arc::new(NullMirror), &EngineConfig::default())
    }

    fn ctx<'a>(
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

    #[test]
    fn clp_formatting() {
        assert_eq!(format_clp(0), "$0");
        assert_eq!(format_clp(950), "$950");
        assert_eq!(format_clp(120_000), "$120.000");
        assert_eq!(format_clp(1_234_567), "$1.234.567");
    }

    #[test]
    fn increment_verbs() {
        assert!(is_increment_request("suma 50 al presupuesto"));
        assert!(is_increment_request("Agrega 50000"));
        assert!(is_increment_request("presupuesto +50000"));
        assert!(!is_increment_request("presupuesto 500000"));
    }

    #[tokio::test]
    async fn create_expense_known_category_resolves_section_silently() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger
            .insert_category(user, "CASA", "Arriendo", 500_000)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "Arriendo 120000");
        let outcome = create_expense(
            &ctx,
            None,
            Some("Arriendo".into()),
            Some(120_000),
            Some("Arriendo".into()),
            None,
        )
        .await
        .unwrap();

        assert!(outcome.mutated);
        assert!(outcome.pending.is_none());
        let expenses = ledger.recent_expenses(user, 10).await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].section, "CASA");
        assert_eq!(expenses[0].payment_method, "Efectivo");
    }

    #[tokio::test]
    async fn create_expense_unknown_category_asks_for_section() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "Arriendo 120000");
        let outcome = create_expense(
            &ctx,
            None,
            Some("Arriendo".into()),
            Some(120_000),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(!outcome.mutated);
        assert!(matches!(
            outcome.pending,
            Some(PendingQuestion::SectionForExpense { .. })
        ));
        assert!(ledger.recent_expenses(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_category_disambiguates_from_message_text() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Luz", 0).await.unwrap();
        ledger
            .insert_category(user, "OFICINA", "Luz", 0)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "pagué la luz de la oficina 30000");
        let outcome = create_expense(
            &ctx,
            None,
            Some("Luz".into()),
            Some(30_000),
            Some("Luz".into()),
            None,
        )
        .await
        .unwrap();

        assert!(outcome.mutated);
        let expenses = ledger.recent_expenses(user, 10).await.unwrap();
        assert_eq!(expenses[0].section, "OFICINA");
    }

    #[tokio::test]
    async fn duplicate_category_without_hint_asks_with_candidates() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Luz", 0).await.unwrap();
        ledger
            .insert_category(user, "OFICINA", "Luz", 0)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "Luz 30000");
        let outcome = create_expense(
            &ctx,
            None,
            Some("Luz".into()),
            Some(30_000),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(!outcome.mutated);
        match outcome.pending {
            Some(PendingQuestion::SectionForExpense { candidates, .. }) => {
                assert_eq!(candidates, vec!["CASA".to_string(), "OFICINA".to_string()]);
            }
            other => panic!("unexpected pending: {:?}", other),
        }
        assert!(ledger.recent_expenses(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_expense_with_section_autocreates_category() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "gasté 5000 en bencina, carpeta auto");
        let outcome = create_expense(
            &ctx,
            Some("auto".into()),
            Some("Bencina".into()),
            Some(5_000),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(outcome.mutated);
        assert!(outcome.fragment.unwrap().contains("categoría nueva"));
        assert!(ledger
            .find_category(user, "AUTO", "Bencina")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn create_expense_folds_pending_reference() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Super", 0).await.unwrap();
        let pending = ledger
            .insert_pending_expense(user, 45_000, "Compra Jumbo")
            .await
            .unwrap();

        let mut ctx = ctx(&ledger, &mirror, user, "eso va en Super");
        ctx.pending_ref = Some(pending.id);
        create_expense(
            &ctx,
            Some("CASA".into()),
            Some("Super".into()),
            Some(45_000),
            Some("Compra Jumbo".into()),
            None,
        )
        .await
        .unwrap();

        let folded = ledger
            .get_pending_expense(user, pending.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(folded.status, PendingStatus::Processed);
    }

    #[tokio::test]
    async fn expense_patch_touches_only_supplied_fields() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let expense = ledger
            .insert_expense(NewExpense {
                user_id: user,
                section: "CASA".into(),
                category: "Super".into(),
                amount: 30_000,
                concept: "Jumbo".into(),
                date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                payment_method: "Tarjeta".into(),
            })
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "el gasto eran 35000");
        let outcome = update_expense(&ctx, Some(expense.id), Some(35_000), None, None, None)
            .await
            .unwrap();

        assert!(outcome.mutated);
        let updated = ledger.get_expense(user, expense.id).await.unwrap().unwrap();
        assert_eq!(updated.amount, 35_000);
        assert_eq!(updated.concept, "Jumbo");
        assert_eq!(updated.category, "Super");
        assert_eq!(updated.section, "CASA");
        assert_eq!(updated.payment_method, "Tarjeta");
    }

    #[tokio::test]
    async fn expense_patch_canonicalizes_target_section() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let expense = ledger
            .insert_expense(NewExpense {
                user_id: user,
                section: "CASA".into(),
                category: "Luz".into(),
                amount: 10_000,
                concept: "Luz".into(),
                date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                payment_method: "Efectivo".into(),
            })
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "ese gasto va en oficina");
        update_expense(
            &ctx,
            Some(expense.id),
            None,
            None,
            None,
            Some("oficina".into()),
        )
        .await
        .unwrap();

        let updated = ledger.get_expense(user, expense.id).await.unwrap().unwrap();
        assert_eq!(updated.section, "OFICINA");
        assert_eq!(updated.amount, 10_000);
    }

    #[tokio::test]
    async fn empty_expense_patch_is_rejected() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let expense = ledger
            .insert_expense(NewExpense {
                user_id: user,
                section: "CASA".into(),
                category: "Luz".into(),
                amount: 10_000,
                concept: "Luz".into(),
                date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                payment_method: "Efectivo".into(),
            })
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "cambia el gasto");
        let err = update_expense(&ctx, Some(expense.id), None, None, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        let untouched = ledger.get_expense(user, expense.id).await.unwrap().unwrap();
        assert_eq!(untouched.amount, 10_000);
    }

    #[tokio::test]
    async fn delete_commitment_removes_row_and_reports_title() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let commitment = ledger
            .insert_commitment(user, "Pedro - asado", CommitmentKind::Debt, 5_000)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "borra la deuda con pedro");
        let outcome = delete_commitment(&ctx, Some(commitment.id)).await.unwrap();

        assert!(outcome.mutated);
        assert!(outcome.fragment.unwrap().contains("Pedro - asado"));
        assert!(ledger.recent_commitments(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_category_with_expenses_refuses_and_counts() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Luz", 0).await.unwrap();
        for i in 0..3 {
            ledger
                .insert_expense(NewExpense {
                    user_id: user,
                    section: "CASA".into(),
                    category: "Luz".into(),
                    amount: 10_000 + i,
                    concept: "Luz".into(),
                    date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                    payment_method: "Efectivo".into(),
                })
                .await
                .unwrap();
        }

        let ctx = ctx(&ledger, &mirror, user, "elimina la categoría luz");
        let outcome = delete_category(&ctx, Some("CASA".into()), Some("Luz".into()))
            .await
            .unwrap();

        assert!(!outcome.mutated);
        assert!(outcome.fragment.unwrap().contains("3 gastos"));
        assert!(ledger.find_category(user, "CASA", "Luz").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn generic_commitment_reason_asks_instead_of_creating() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "le debo 5000 a Pedro");
        let outcome = create_commitment(
            &ctx,
            Some("Pedro".into()),
            Some(5_000),
            Some("deuda".into()),
            CommitmentKind::Debt,
        )
        .await
        .unwrap();

        assert!(!outcome.mutated);
        assert!(matches!(
            outcome.pending,
            Some(PendingQuestion::CommitmentReason { .. })
        ));
        assert!(ledger.recent_commitments(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concrete_reason_creates_titled_commitment() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "le debo 5000 a Pedro por el asado");
        let outcome = create_commitment(
            &ctx,
            Some("Pedro".into()),
            Some(5_000),
            Some("asado".into()),
            CommitmentKind::Debt,
        )
        .await
        .unwrap();

        assert!(outcome.mutated);
        let commitments = ledger.recent_commitments(user, 10).await.unwrap();
        assert_eq!(commitments[0].title, "Pedro - asado");
    }

    #[tokio::test]
    async fn mark_paid_twice_reports_success_both_times() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let commitment = ledger
            .insert_commitment(user, "Pedro - asado", CommitmentKind::Debt, 5_000)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "ya le pagué a Pedro");
        let first = mark_commitment_paid(&ctx, Some(commitment.id)).await.unwrap();
        let second = mark_commitment_paid(&ctx, Some(commitment.id)).await.unwrap();

        assert!(first.mutated);
        assert!(second.mutated);
        assert_eq!(first.fragment, second.fragment);
    }

    #[tokio::test]
    async fn global_budget_overwrites_without_increment_verb() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx1 = ctx(&ledger, &mirror, user, "presupuesto 500000");
        update_global_budget(&ctx1, Some(500_000)).await.unwrap();
        let ctx2 = ctx(&ledger, &mirror, user, "presupuesto 300000");
        update_global_budget(&ctx2, Some(300_000)).await.unwrap();

        let budget = ledger
            .get_monthly_budget(user, "2026-08")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(budget.amount, 300_000);
    }

    #[tokio::test]
    async fn global_budget_increments_on_verb() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx1 = ctx(&ledger, &mirror, user, "presupuesto 500000");
        update_global_budget(&ctx1, Some(500_000)).await.unwrap();
        let ctx2 = ctx(&ledger, &mirror, user, "suma 50000 al presupuesto");
        update_global_budget(&ctx2, Some(50_000)).await.unwrap();

        let budget = ledger
            .get_monthly_budget(user, "2026-08")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(budget.amount, 550_000);
    }

    #[tokio::test]
    async fn category_budget_increment_uses_old_value() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger
            .insert_category(user, "CASA", "Super", 200_000)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "agrega 50000 al presupuesto de super");
        update_category(
            &ctx,
            Some("CASA".into()),
            Some("Super".into()),
            None,
            None,
            Some(50_000),
        )
        .await
        .unwrap();

        let cat = ledger
            .find_category(user, "CASA", "Super")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cat.budget, 250_000);
    }

    #[tokio::test]
    async fn budgeted_category_creation_logs_opening_expense() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "crea arriendo en casa con 500000");
        let outcome = create_category(
            &ctx,
            Some("Casa".into()),
            Some("Arriendo".into()),
            Some(500_000),
        )
        .await
        .unwrap();

        assert!(outcome.mutated);
        let expenses = ledger.recent_expenses(user, 10).await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].amount, 500_000);
        assert_eq!(expenses[0].category, "Arriendo");
    }

    #[tokio::test]
    async fn category_without_budget_logs_no_expense() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "crea la categoría luz en casa");
        create_category(&ctx, Some("Casa".into()), Some("Luz".into()), None)
            .await
            .unwrap();

        assert!(ledger.recent_expenses(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_category_without_section_resolves_unique_name() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger
            .insert_category(user, "CASA", "Super", 100_000)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "presupuesto de super 200000");
        update_category(
            &ctx,
            None,
            Some("Super".into()),
            None,
            None,
            Some(200_000),
        )
        .await
        .unwrap();

        let cat = ledger
            .find_category(user, "CASA", "Super")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cat.budget, 200_000);
    }

    #[tokio::test]
    async fn update_category_ambiguous_name_asks_for_section() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Luz", 0).await.unwrap();
        ledger
            .insert_category(user, "OFICINA", "Luz", 0)
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "presupuesto de luz 50000");
        let err = update_category(&ctx, None, Some("Luz".into()), None, None, Some(50_000))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Conflict(_)));
        assert!(err.user_message().unwrap().contains("varias carpetas"));
    }

    #[tokio::test]
    async fn ignore_without_pending_is_a_noop() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();

        let ctx = ctx(&ledger, &mirror, user, "ignóralo");
        let outcome = ignore_pending(&ctx).await.unwrap();

        assert!(!outcome.mutated);
        assert!(outcome.fragment.is_none());
    }

    #[tokio::test]
    async fn ignore_marks_pending_row() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        let pending = ledger
            .insert_pending_expense(user, 45_000, "Compra Jumbo")
            .await
            .unwrap();

        let mut ctx = ctx(&ledger, &mirror, user, "ignóralo");
        ctx.pending_ref = Some(pending.id);
        let outcome = ignore_pending(&ctx).await.unwrap();

        assert!(outcome.mutated);
        let row = ledger
            .get_pending_expense(user, pending.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, PendingStatus::Ignored);
    }

    #[tokio::test]
    async fn rename_reports_cascade_count() {
        let ledger = InMemoryLedgerStore::new();
        let mirror = test_mirror();
        let user = Uuid::new_v4();
        ledger.insert_category(user, "CASA", "Super", 0).await.unwrap();
        ledger
            .insert_expense(NewExpense {
                user_id: user,
                section: "CASA".into(),
                category: "Super".into(),
                amount: 30_000,
                concept: "Jumbo".into(),
                date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                payment_method: "Efectivo".into(),
            })
            .await
            .unwrap();

        let ctx = ctx(&ledger, &mirror, user, "renombra super a supermercado");
        let outcome = update_category(
            &ctx,
            Some("CASA".into()),
            Some("Super".into()),
            Some("Supermercado".into()),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(outcome.fragment.unwrap().contains("1 gastos actualizados"));
        let expenses = ledger.recent_expenses(user, 10).await.unwrap();
        assert_eq!(expenses[0].category, "Supermercado");
    }
}
