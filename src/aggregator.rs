//! Response aggregator
//!
//! Folds the per-intent fragments into the single reply the user sees
//! and records it as the assistant's turn.

use crate::memory::{ConversationMemory, TurnRole};
use crate::Result;
use uuid::Uuid;

/// Reply when no intent produced anything.
pub const FALLBACK_REPLY: &str =
    "No entendí qué querías hacer. ¿Me lo dices de otra forma?";

/// One fragment per line; empty input falls back to the fixed reply.
pub fn compose(fragments: &[String]) -> String {
    if fragments.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        fragments.join("\n")
    }
}

/// Compose the reply and append it to the conversation log.
pub async fn finalize(
    memory: &ConversationMemory,
    user_id: Uuid,
    fragments: &[String],
) -> Result<String> {
    let reply = compose(fragments);
    memory
        .append_turn(user_id, TurnRole::Assistant, &reply)
        .await?;
    Ok(reply)
}
