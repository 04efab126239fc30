//! Per-user session state
//!
//! Holds the one question the assistant may have open for a user as a
//! typed value, so continuation is a structural check instead of a
//! text-pattern match on the previous assistant message. The state is
//! short-lived and in-process; losing it only costs the user one
//! re-ask.

use crate::models::CommitmentKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An unanswered clarifying question, with the slots already known.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingQuestion {
    /// We asked which section an expense belongs to.
    SectionForExpense {
        category: String,
        amount: i64,
        concept: String,
        payment_method: Option<String>,
        /// Candidate sections offered, when the question came from a
        /// duplicate-category collision. Empty when the section was
        /// simply missing.
        candidates: Vec<String>,
        /// Pending-expense row to fold once the expense is created.
        pending_ref: Option<i64>,
    },
    /// We asked for a concrete reason before creating a commitment.
    CommitmentReason {
        counterparty: String,
        amount: i64,
        kind: CommitmentKind,
    },
}

/// One open question per user, at most.
pub struct SessionStore {
    pending: Arc<RwLock<HashMap<Uuid, PendingQuestion>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set(&self, user_id: Uuid, question: PendingQuestion) {
        let mut locked = self.pending.write().await;
        locked.insert(user_id, question);
    }

    /// Remove and return the open question. Answering consumes it,
    /// and so does an overriding fresh batch.
    pub async fn take(&self, user_id: Uuid) -> Option<PendingQuestion> {
        let mut locked = self.pending.write().await;
        locked.remove(&user_id)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
