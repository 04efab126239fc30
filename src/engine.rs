//! Engine wiring
//!
//! One synchronous pass per inbound message: record the user's turn,
//! decide whether the message answers an open question or carries a
//! fresh intent batch, dispatch sequentially, fold the fragments into
//! the reply and record it. The only detached side work is the mirror
//! queue.

use crate::aggregator;
use crate::config::EngineConfig;
use crate::dispatcher::{self, DispatchResult};
use crate::executors::ExecCtx;
use crate::ledger::LedgerStore;
use crate::memory::{ConversationMemory, SessionStore, TurnRole};
use crate::mirror::Mirror;
use crate::models::{Action, EngineReply, RawIntent};
use crate::normalizer;
use crate::resolver;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Engine {
    ledger: Arc<dyn LedgerStore>,
    memory: Arc<ConversationMemory>,
    sessions: SessionStore,
    mirror: Mirror,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        memory: Arc<ConversationMemory>,
        mirror: Mirror,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            memory,
            sessions: SessionStore::new(),
            mirror,
            config,
        }
    }

    pub fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    pub fn memory(&self) -> &ConversationMemory {
        self.memory.as_ref()
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve one inbound message against an already-produced intent
    /// batch and apply the resulting mutations.
    pub async fn handle_message(
        &self,
        user_id: Uuid,
        text: &str,
        intents: Vec<RawIntent>,
        pending_ref: Option<i64>,
    ) -> Result<EngineReply> {
        self.memory
            .append_turn(user_id, TurnRole::User, text)
            .await?;

        let actions: Vec<Action> = intents
            .into_iter()
            .map(|raw| normalizer::normalize(raw, text))
            .map(|raw| normalizer::to_action(&raw))
            .collect();

        // An open question is consumed either way: a mutating batch
        // overrides it, anything else answers it.
        let (actions, pending_ref) = match self.sessions.take(user_id).await {
            Some(question) if !resolver::overrides_pending(&actions) => {
                debug!("Treating message as answer to open question");
                let resolution = resolver::continuation(question, text);
                (resolution.actions, resolution.pending_ref.or(pending_ref))
            }
            Some(_) => {
                debug!("Fresh intent batch overrides stale open question");
                (actions, pending_ref)
            }
            None => (actions, pending_ref),
        };

        let ctx = ExecCtx {
            ledger: self.ledger.as_ref(),
            mirror: &self.mirror,
            user_id,
            message: text,
            today: Utc::now().date_naive(),
            pending_ref,
        };

        let DispatchResult {
            fragments,
            mutations,
            pending,
        } = dispatcher::dispatch_batch(&ctx, actions).await?;

        if let Some(question) = pending {
            self.sessions.set(user_id, question).await;
        }

        let reply = aggregator::finalize(&self.memory, user_id, &fragments).await?;
        info!("Message handled: {} mutations", mutations);

        Ok(EngineReply { reply, mutations })
    }
}
