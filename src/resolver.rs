//! Disambiguation resolver
//!
//! Decides whether the current message answers the question the
//! assistant left open (typed `PendingQuestion`, structural check) and
//! merges the answer into the slot the question was about. Also hosts
//! the candidate-section matching used when a category name collides
//! across sections.

use crate::ledger::canonical_section;
use crate::memory::PendingQuestion;
use crate::models::Action;

/// Outcome of resolving one inbound message against session state.
#[derive(Debug)]
pub struct Resolution {
    pub actions: Vec<Action>,
    /// Pending-expense row carried over from the turn that opened the
    /// question, so a CREATE replay can still fold it.
    pub pending_ref: Option<i64>,
}

/// A fresh batch with at least one mutating action overrides a stale
/// open question; only slot-less messages are treated as answers.
pub fn overrides_pending(actions: &[Action]) -> bool {
    actions.iter().any(|a| a.is_mutating())
}

/// If the message textually names exactly one of the candidate
/// sections (case-insensitive, whole words only), return it. Ambiguous
/// or zero hits return `None`.
pub fn message_names_candidate(message: &str, candidates: &[String]) -> Option<String> {
    let haystack = message.to_lowercase();
    let mut hits = candidates
        .iter()
        .filter(|c| contains_word(&haystack, &c.to_lowercase()));

    match (hits.next(), hits.next()) {
        (Some(section), None) => Some(section.clone()),
        _ => None,
    }
}

/// Substring match bounded by non-alphanumeric characters, so "auto"
/// does not hit inside "autorización".
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let begin = from + offset;
        let end = begin + needle.len();
        let open = haystack[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let close = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if open && close {
            return true;
        }
        from = end;
    }
    false
}

/// Merge the current message into the slot the open question was
/// about, recovering the original intent from the stored slots.
pub fn continuation(pending: PendingQuestion, message: &str) -> Resolution {
    match pending {
        PendingQuestion::SectionForExpense {
            category,
            amount,
            concept,
            payment_method,
            candidates,
            pending_ref,
        } => {
            // The answer is either one of the offered candidates or a
            // free-form section name.
            let section = message_names_candidate(message, &candidates)
                .unwrap_or_else(|| canonical_section(message));

            Resolution {
                actions: vec![Action::CreateExpense {
                    section: Some(section),
                    category: Some(category),
                    amount: Some(amount),
                    concept: Some(concept),
                    payment_method,
                }],
                pending_ref,
            }
        }
        PendingQuestion::CommitmentReason {
            counterparty,
            amount,
            kind,
        } => Resolution {
            actions: vec![Action::CreateCommitment {
                counterparty: Some(counterparty),
                amount: Some(amount),
                reason: Some(message.trim().to_string()),
                kind,
            }],
            pending_ref: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommitmentKind;

    #[test]
    fn candidate_match_is_case_insensitive_and_unique() {
        let candidates = vec!["CASA".to_string(), "OFICINA".to_string()];

        assert_eq!(
            message_names_candidate("la de la casa", &candidates),
            Some("CASA".to_string())
        );
        assert_eq!(message_names_candidate("no sé", &candidates), None);
        // Both named: stays ambiguous.
        assert_eq!(
            message_names_candidate("casa u oficina", &candidates),
            None
        );
    }

    #[test]
    fn candidate_inside_longer_word_does_not_match() {
        let candidates = vec!["AUTO".to_string(), "CASA".to_string()];

        assert_eq!(
            message_names_candidate("espero tu autorización", &candidates),
            None
        );
        assert_eq!(
            message_names_candidate("va en el auto", &candidates),
            Some("AUTO".to_string())
        );
        // Punctuation still counts as a boundary.
        assert_eq!(
            message_names_candidate("auto, creo", &candidates),
            Some("AUTO".to_string())
        );
    }

    #[test]
    fn section_answer_replays_the_original_create() {
        let pending = PendingQuestion::SectionForExpense {
            category: "Luz".into(),
            amount: 10_000,
            concept: "Luz".into(),
            payment_method: None,
            candidates: vec!["CASA".into(), "OFICINA".into()],
            pending_ref: Some(3),
        };

        let resolution = continuation(pending, "oficina");
        assert_eq!(resolution.pending_ref, Some(3));
        match &resolution.actions[0] {
            Action::CreateExpense {
                section, amount, ..
            } => {
                assert_eq!(section.as_deref(), Some("OFICINA"));
                assert_eq!(*amount, Some(10_000));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn free_form_section_answer_is_canonicalized() {
        let pending = PendingQuestion::SectionForExpense {
            category: "Arriendo".into(),
            amount: 120_000,
            concept: "Arriendo".into(),
            payment_method: None,
            candidates: vec![],
            pending_ref: None,
        };

        let resolution = continuation(pending, "gastos fijos");
        match &resolution.actions[0] {
            Action::CreateExpense { section, .. } => {
                assert_eq!(section.as_deref(), Some("GASTOS FIJOS"));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn reason_answer_replays_the_commitment() {
        let pending = PendingQuestion::CommitmentReason {
            counterparty: "Pedro".into(),
            amount: 5_000,
            kind: CommitmentKind::Loan,
        };

        let resolution = continuation(pending, "por el asado del sábado");
        match &resolution.actions[0] {
            Action::CreateCommitment { reason, kind, .. } => {
                assert_eq!(reason.as_deref(), Some("por el asado del sábado"));
                assert_eq!(*kind, CommitmentKind::Loan);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn mutating_batch_overrides_pending() {
        assert!(overrides_pending(&[Action::IgnorePending]));
        assert!(!overrides_pending(&[Action::Talk {
            response_text: Some("hola".into())
        }]));
        assert!(!overrides_pending(&[]));
    }
}
