//! Batch processor: runs each item through the operation's processor and
//! classifies the outcome. One bad item never aborts the batch: processor
//! errors are folded into `Failed` and recorded, and the loop continues.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::source::{Position, Record};

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of one processed item.
///
/// The tagged variant is mandatory: a processor either returns one of these
/// or an `Err`, which the batch loop converts to `Failed` with the error's
/// message. Nothing else is representable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
    Failed(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for host-supplied per-item processing.
///
/// Looked up fresh from the operation registry on every batch call; never
/// stored in a session. Tests provide fakes.
pub trait ItemProcessor: Send + Sync {
    /// Processes one canonical item.
    fn process<'a>(
        &'a self,
        item: &'a Record,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, EngineError>> + Send + 'a>>;
}

/// Optional pre-validation hook (imports only).
///
/// Runs before the processor and can short-circuit an item straight to
/// `Failed` without invoking it.
pub trait PreValidator: Send + Sync {
    /// Returns `Err(reason)` to reject the item.
    fn validate(&self, item: &Record) -> Result<(), String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchResult
// ─────────────────────────────────────────────────────────────────────────────

/// One item-level failure, referencing the source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// 1-indexed row number counting the header row (data row N is row N+1).
    pub row: u64,
    pub message: String,
}

/// Transient result of one batch call. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Item-level errors within this batch (small; the bounded cap applies
    /// only when they are folded into the run statistics).
    pub errors: Vec<ItemError>,
    pub has_more: bool,
    /// Position to resume from on the next call.
    pub next: Position,
    /// Total reported by the source during this call, if any.
    pub total: Option<u64>,
}

impl BatchResult {
    /// Folds one outcome into the counters.
    pub fn record(&mut self, row: u64, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(message) => {
                self.failed += 1;
                self.errors.push(ItemError { row, message });
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// process_batch
// ─────────────────────────────────────────────────────────────────────────────

/// Runs every item through the pre-validator (if any) and the processor,
/// classifying outcomes into a [`BatchResult`].
///
/// Items arrive with their 1-indexed source row number counting the header
/// row; for an offset-paginated file, data row at `offset` is row
/// `offset + 2`.
pub async fn process_batch(
    items: &[(u64, Record)],
    processor: &dyn ItemProcessor,
    pre_validate: Option<&dyn PreValidator>,
) -> BatchResult {
    let mut result = BatchResult::default();

    for (row, item) in items.iter().map(|(r, i)| (*r, i)) {
        if let Some(validator) = pre_validate {
            if let Err(reason) = validator.validate(item) {
                result.record(row, Outcome::Failed(reason));
                continue;
            }
        }

        match processor.process(item).await {
            Ok(outcome) => result.record(row, outcome),
            Err(e) => {
                debug!(row, "item processor returned error: {e}");
                result.record(row, Outcome::Failed(e.to_string()));
            }
        }
    }

    result
}
