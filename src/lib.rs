//! Intent Resolution & Ledger Mutation Engine
//!
//! Core of a chat-driven personal budget assistant:
//! - turns free-text messages ("Arriendo 120") into typed actions
//! - resolves ambiguity with short-lived clarifying questions
//! - enforces ledger invariants before mutating
//! - mirrors mutations to a spreadsheet replica, best-effort
//!
//! PIPELINE:
//! MESSAGE → PRODUCE → NORMALIZE → RESOLVE → DISPATCH → AGGREGATE → REPLY

pub mod aggregator;
pub mod api;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executors;
pub mod ledger;
pub mod memory;
pub mod mirror;
pub mod models;
pub mod normalizer;
pub mod producer;
pub mod resolver;

pub use error::Result;

// Re-export common types
pub use config::EngineConfig;
pub use engine::Engine;
pub use models::*;
