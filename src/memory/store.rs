//! Conversation turn storage
//!
//! Append-only log of user/assistant turns, scoped per user. The
//! engine reads back the last N turns (reverse-chronological query,
//! replayed chronologically) as short-term memory for the intent
//! producer. Postgres in production, in-memory for development.

use crate::error::EngineError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;
use uuid::Uuid;

/// Role of a turn's author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A single turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: Uuid,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

enum MemoryBackend {
    InMemory {
        turns: Arc<RwLock<HashMap<Uuid, Vec<ConversationTurn>>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

/// Conversation memory with a Postgres or in-memory backend.
pub struct ConversationMemory {
    backend: MemoryBackend,
}

impl ConversationMemory {
    pub fn in_memory() -> Self {
        info!("Conversation memory backend: in-memory");
        Self {
            backend: MemoryBackend::InMemory {
                turns: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        info!("Conversation memory backend: postgres");
        Self {
            backend: MemoryBackend::Postgres {
                pool,
                schema_ready: Arc::new(OnceCell::new()),
            },
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let MemoryBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_turns (
                      id BIGSERIAL PRIMARY KEY,
                      user_id UUID NOT NULL,
                      role TEXT NOT NULL,
                      text TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversation_turns_user_time
                    ON conversation_turns (user_id, id DESC);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                EngineError::Database(format!(
                    "Failed to initialize conversation memory schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn role_to_db(role: TurnRole) -> &'static str {
        match role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    fn role_from_db(role: &str) -> TurnRole {
        match role.to_lowercase().as_str() {
            "assistant" => TurnRole::Assistant,
            _ => TurnRole::User,
        }
    }

    /// Append one turn. The log is append-only; nothing ever rewrites
    /// or deletes past turns.
    pub async fn append_turn(&self, user_id: Uuid, role: TurnRole, text: &str) -> Result<()> {
        match &self.backend {
            MemoryBackend::InMemory { turns } => {
                let mut locked = turns.write().await;
                locked.entry(user_id).or_default().push(ConversationTurn {
                    user_id,
                    role,
                    text: text.to_string(),
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            MemoryBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;
                sqlx::query(
                    "INSERT INTO conversation_turns (user_id, role, text) VALUES ($1, $2, $3)",
                )
                .bind(user_id)
                .bind(Self::role_to_db(role))
                .bind(text)
                .execute(pool)
                .await?;
                Ok(())
            }
        }
    }

    /// The last `count` turns in chronological order.
    pub async fn recent_turns(&self, user_id: Uuid, count: usize) -> Result<Vec<ConversationTurn>> {
        match &self.backend {
            MemoryBackend::InMemory { turns } => {
                let locked = turns.read().await;
                let all = locked.get(&user_id).cloned().unwrap_or_default();
                let skip = all.len().saturating_sub(count);
                Ok(all.into_iter().skip(skip).collect())
            }
            MemoryBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;
                let rows = sqlx::query(
                    r#"
                    SELECT user_id, role, text, created_at
                    FROM conversation_turns
                    WHERE user_id = $1
                    ORDER BY id DESC
                    LIMIT $2
                    "#,
                )
                .bind(user_id)
                .bind(count as i64)
                .fetch_all(pool)
                .await?;

                let mut turns = Vec::with_capacity(rows.len());
                for row in rows.iter().rev() {
                    let role: String = row.try_get("role")?;
                    turns.push(ConversationTurn {
                        user_id: row.try_get("user_id")?,
                        role: Self::role_from_db(&role),
                        text: row.try_get("text")?,
                        timestamp: row.try_get("created_at")?,
                    });
                }
                Ok(turns)
            }
        }
    }

    /// The previous assistant turn, if any.
    pub async fn last_assistant_turn(&self, user_id: Uuid) -> Result<Option<ConversationTurn>> {
        let turns = self.recent_turns(user_id, 20).await?;
        Ok(turns
            .into_iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant))
    }
}
