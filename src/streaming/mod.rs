//! Streaming output: the incremental, append-only CSV sink.

mod csv_sink;

pub use csv_sink::{write_batch, WriteReport, UTF8_BOM};
