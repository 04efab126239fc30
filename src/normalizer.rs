//! Intent normalizer
//!
//! Best-effort cleanup of the raw intent payload: strips bracket/arrow
//! decoration the producer sometimes echoes back from its context
//! window, coerces currency-formatted amounts to integers, substitutes
//! the `<USER_MESSAGE>` placeholder, and maps the record onto the
//! closed `Action` sum type. Pure, no side effects, never fails.

use crate::models::{Action, CommitmentKind, RawIntent};
use serde_json::Value;

/// Reserved token the producer uses for "take the user's message
/// verbatim as the concept".
pub const USER_MESSAGE_PLACEHOLDER: &str = "<USER_MESSAGE>";

/// Strip enclosing decoration from a name field: `[CASA]`, `-> Arriendo`,
/// `→ Arriendo`, surrounding quotes. Applied repeatedly until stable.
pub fn strip_decoration(value: &str) -> String {
    let mut current = value.trim().to_string();

    loop {
        let before = current.clone();

        if let Some(rest) = current.strip_prefix("->") {
            current = rest.trim().to_string();
        }
        if let Some(rest) = current.strip_prefix('→') {
            current = rest.trim().to_string();
        }
        if current.len() >= 2 && current.starts_with('[') && current.ends_with(']') {
            current = current[1..current.len() - 1].trim().to_string();
        }
        if current.len() >= 2
            && ((current.starts_with('"') && current.ends_with('"'))
                || (current.starts_with('\'') && current.ends_with('\'')))
        {
            current = current[1..current.len() - 1].trim().to_string();
        }

        if current == before {
            return current;
        }
    }
}

/// Parse an amount that may arrive as a JSON number or a
/// currency-formatted string ("$120.000", "5,000"). Thousands
/// separators are stripped; there are no fractional minor units.
/// Returns `None` on parse failure or negative values.
pub fn coerce_amount(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '-')
                .collect();
            cleaned.parse::<i64>().ok()
        }
        _ => None,
    };

    parsed.filter(|v| *v >= 0)
}

/// Parse a row id that may arrive as a number or a numeric string.
pub fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn clean_name(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(strip_decoration)
        .filter(|v| !v.is_empty() && v != "None" && v != "null")
}

/// Clean the raw record in place: decoration stripping, amount
/// coercion, placeholder substitution.
pub fn normalize(mut raw: RawIntent, user_message: &str) -> RawIntent {
    raw.section = clean_name(&raw.section);
    raw.category = clean_name(&raw.category);
    raw.new_name = clean_name(&raw.new_name);
    raw.new_section = clean_name(&raw.new_section);

    raw.amount = raw
        .amount
        .as_ref()
        .and_then(coerce_amount)
        .map(|v| Value::Number(v.into()));
    raw.new_budget = raw
        .new_budget
        .as_ref()
        .and_then(coerce_amount)
        .map(|v| Value::Number(v.into()));

    if raw.concept.as_deref() == Some(USER_MESSAGE_PLACEHOLDER) {
        raw.concept = Some(user_message.to_string());
    }
    raw.concept = raw
        .concept
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    raw
}

/// Map a normalized record onto the closed action set. Unknown intent
/// strings degrade to `Talk` with no response text, which produces no
/// fragment and lets the aggregator emit its fallback.
pub fn to_action(raw: &RawIntent) -> Action {
    let intent = raw
        .intent
        .as_deref()
        .map(|v| v.trim().to_uppercase())
        .unwrap_or_default();

    let amount = raw.amount.as_ref().and_then(coerce_amount);
    let new_budget = raw.new_budget.as_ref().and_then(coerce_amount);
    let target_id = raw.target_id.as_ref().and_then(coerce_id);
    let targets_commitment = raw
        .target_type
        .as_deref()
        .map(|t| t.trim().eq_ignore_ascii_case("COMMITMENT"))
        .unwrap_or(false);

    match intent.as_str() {
        "CREATE" => Action::CreateExpense {
            section: raw.section.clone(),
            category: raw.category.clone(),
            amount,
            // The producer occasionally omits the concept; fall back to
            // the category name, as the upstream contract allows.
            concept: raw.concept.clone().or_else(|| raw.category.clone()),
            payment_method: raw.payment_method.clone(),
        },
        "UPDATE" => Action::UpdateExpense {
            target_id,
            amount,
            concept: raw.concept.clone(),
            category: raw.category.clone(),
            section: raw.section.clone(),
        },
        "DELETE" if targets_commitment => Action::DeleteCommitment { target_id },
        "DELETE" => Action::DeleteExpense { target_id },
        "CREATE_CATEGORY" => Action::CreateCategory {
            section: raw.section.clone(),
            category: raw.category.clone(),
            budget: amount.or(new_budget),
        },
        "UPDATE_CATEGORY" => Action::UpdateCategory {
            section: raw.section.clone(),
            category: raw.category.clone(),
            new_name: raw.new_name.clone(),
            new_section: raw.new_section.clone(),
            new_budget: new_budget.or(amount),
        },
        "DELETE_CATEGORY" => Action::DeleteCategory {
            section: raw.section.clone(),
            category: raw.category.clone(),
        },
        "CREATE_COMMITMENT" => Action::CreateCommitment {
            // The producer reports the counterparty in `category` and
            // the reason in `concept`.
            counterparty: raw.category.clone(),
            amount,
            reason: raw.concept.clone(),
            kind: raw
                .commitment_type
                .as_deref()
                .and_then(CommitmentKind::parse)
                .unwrap_or(CommitmentKind::Debt),
        },
        "MARK_PAID_COMMITMENT" => Action::MarkCommitmentPaid { target_id },
        "DELETE_COMMITMENT" => Action::DeleteCommitment { target_id },
        "UPDATE_GLOBAL_BUDGET" => Action::UpdateGlobalBudget { amount },
        "IGNORE_PENDING" => Action::IgnorePending,
        "TALK" | "CHAT" => Action::Talk {
            response_text: raw.response_text.clone(),
        },
        _ => Action::Talk {
            response_text: None,
        },
    }
}

/// Parse the producer payload into a batch of raw intents. Accepts a
/// single object, an array, or a `MULTI_ACTION` envelope with an
/// `actions` array; anything malformed yields an empty batch.
pub fn parse_batch(payload: &Value) -> Vec<RawIntent> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        Value::Object(map) => {
            if let Some(Value::Array(actions)) = map.get("actions") {
                let mut batch: Vec<RawIntent> = actions
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect();

                // A MULTI_ACTION envelope may still carry a reply for
                // the user alongside its actions.
                if let Some(Value::String(text)) = map.get("response_text") {
                    if batch.is_empty() {
                        batch.push(RawIntent {
                            intent: Some("TALK".to_string()),
                            response_text: Some(text.clone()),
                            ..Default::default()
                        });
                    }
                }
                batch
            } else {
                serde_json::from_value(payload.clone())
                    .map(|raw| vec![raw])
                    .unwrap_or_default()
            }
        }
        _ => Vec::new(),
    }
}
