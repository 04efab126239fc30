//! Conversation memory
//!
//! Append-only turn log replayed as short-term context, plus the
//! short-lived session state holding the engine's open question.

pub mod session;
pub mod store;

pub use session::{PendingQuestion, SessionStore};
pub use store::{ConversationMemory, ConversationTurn, TurnRole};
