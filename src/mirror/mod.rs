//! External mirror pipeline
//!
//! The ledger is the source of truth; the spreadsheet mirror is a
//! best-effort replica. Mutations emit `MirrorEvent`s into a bounded
//! queue drained by a background worker that retries each delivery a
//! fixed number of times and then gives up, counting the failure.
//! Nothing on the request path ever waits on the mirror.

pub mod sheets;

pub use sheets::SheetsMirror;

use crate::config::EngineConfig;
use crate::models::CommitmentKind;
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Expense content as mirrored. The replica matches rows by content,
/// not by ledger id, so updates and deletes carry the previous content.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpenseRow {
    pub date: NaiveDate,
    pub concept: String,
    pub section: String,
    pub category: String,
    pub amount: i64,
    pub payment_method: String,
}

/// One ledger mutation, as seen by the mirror.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MirrorEvent {
    ExpenseCreated {
        user_id: Uuid,
        row: ExpenseRow,
    },
    ExpenseUpdated {
        user_id: Uuid,
        previous: ExpenseRow,
        row: ExpenseRow,
    },
    ExpenseDeleted {
        user_id: Uuid,
        row: ExpenseRow,
    },
    CategoryCreated {
        user_id: Uuid,
        section: String,
        name: String,
        budget: i64,
    },
    CategoryRenamed {
        user_id: Uuid,
        old_section: String,
        old_name: String,
        section: String,
        name: String,
    },
    CategoryDeleted {
        user_id: Uuid,
        section: String,
        name: String,
    },
    CategoryBudgetSet {
        user_id: Uuid,
        section: String,
        name: String,
        budget: i64,
    },
    CommitmentCreated {
        user_id: Uuid,
        title: String,
        kind: CommitmentKind,
        amount: i64,
    },
    CommitmentPaid {
        user_id: Uuid,
        title: String,
    },
    CommitmentDeleted {
        user_id: Uuid,
        title: String,
    },
    BudgetSet {
        user_id: Uuid,
        month: String,
        amount: i64,
    },
}

/// Delivery target for mirror events.
#[async_trait::async_trait]
pub trait MirrorSink: Send + Sync {
    async fn deliver(&self, event: &MirrorEvent) -> Result<()>;
}

/// Sink that acknowledges everything without delivering anywhere.
/// Used when no mirror is configured.
pub struct NullMirror;

#[async_trait::async_trait]
impl MirrorSink for NullMirror {
    async fn deliver(&self, event: &MirrorEvent) -> Result<()> {
        debug!("Mirror disabled, dropping event: {:?}", event);
        Ok(())
    }
}

/// Handle the engine publishes through. Cloneable; the worker owns the
/// receiving end and outlives any individual request.
#[derive(Clone)]
pub struct Mirror {
    tx: mpsc::Sender<MirrorEvent>,
    failures: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl Mirror {
    /// Spawn the delivery worker and return the publishing handle.
    pub fn spawn(sink: Arc<dyn MirrorSink>, config: &EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.mirror_queue_depth);
        let failures = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_worker(
            rx,
            sink,
            config.mirror_max_attempts,
            Arc::clone(&failures),
        ));

        Self {
            tx,
            failures,
            dropped,
        }
    }

    /// Enqueue an event without waiting. A full queue drops the event
    /// and counts it; the ledger write has already committed.
    pub fn publish(&self, event: MirrorEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Mirror queue full, dropping event: {}", e);
        }
    }

    /// Deliveries abandoned after exhausting retries.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Events dropped before delivery because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<MirrorEvent>,
    sink: Arc<dyn MirrorSink>,
    max_attempts: u32,
    failures: Arc<AtomicU64>,
) {
    while let Some(event) = rx.recv().await {
        let mut delivered = false;

        for attempt in 1..=max_attempts.max(1) {
            match sink.deliver(&event).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        "Mirror delivery attempt {}/{} failed: {}",
                        attempt, max_attempts, e
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
        }

        if !delivered {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!("Abandoning mirror event after {} attempts", max_attempts);
        }
    }

    debug!("Mirror worker shutting down");
}
