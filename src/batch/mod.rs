//! Per-item dispatch and outcome classification for one batch slice.

mod processor;

pub use processor::{
    process_batch, BatchResult, ItemError, ItemProcessor, Outcome, PreValidator,
};
