//! Incremental CSV sink.
//!
//! The first batch truncate-creates the file, writes a UTF-8 BOM and the
//! header row; every later batch appends. The column order is fixed once,
//! either supplied by the caller (resolved at job start) or derived from
//! the first row's key order, and stays authoritative for every subsequent
//! batch even if later rows iterate their keys differently. The sink
//! performs no locking; the caller serializes batch calls per token.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;

use crate::error::EngineError;
use crate::source::Record;

/// UTF-8 BOM bytes.
pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Result of one sink write.
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Data rows appended by this call.
    pub rows_written: u64,
    /// The authoritative column order. Callers that let the sink derive it
    /// from the first row must pass this back on every later batch.
    pub columns: Vec<String>,
}

/// Appends one batch of rows to the CSV file at `path`.
///
/// `columns` fixes the output order; when empty, the order is derived from
/// the first row's keys (first batch only). `labels` maps field names to
/// header labels, falling back to the raw field name. Values are quoted
/// per RFC 4180; a row missing a column emits an empty cell, extra columns
/// are dropped.
pub async fn write_batch(
    path: &Path,
    rows: &[Record],
    is_first_batch: bool,
    columns: &[String],
    labels: &HashMap<String, String>,
) -> Result<WriteReport, EngineError> {
    let path: PathBuf = path.to_path_buf();
    let rows = rows.to_vec();
    let columns = columns.to_vec();
    let labels = labels.clone();

    tokio::task::spawn_blocking(move || {
        write_batch_blocking(&path, &rows, is_first_batch, columns, &labels)
    })
    .await
    .map_err(|e| EngineError::Internal(format!("CSV sink task failed: {e}")))?
}

fn write_batch_blocking(
    path: &Path,
    rows: &[Record],
    is_first_batch: bool,
    mut columns: Vec<String>,
    labels: &HashMap<String, String>,
) -> Result<WriteReport, EngineError> {
    if columns.is_empty() {
        if let Some(first) = rows.first() {
            columns = first.columns().map(String::from).collect();
        }
    }

    let file = open_sink(path, is_first_batch)?;
    let mut out = BufWriter::new(file);

    if is_first_batch {
        out.write_all(UTF8_BOM)
            .map_err(|e| EngineError::Io(format!("Failed to write BOM: {e}")))?;
    }

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);

    if is_first_batch && !columns.is_empty() {
        let header: Vec<&str> = columns
            .iter()
            .map(|c| labels.get(c).map(String::as_str).unwrap_or(c.as_str()))
            .collect();
        writer
            .write_record(&header)
            .map_err(|e| EngineError::Io(format!("Failed to write header: {e}")))?;
    }

    for row in rows {
        let values: Vec<&str> = columns
            .iter()
            .map(|c| row.get(c).unwrap_or(""))
            .collect();
        writer
            .write_record(&values)
            .map_err(|e| EngineError::Io(format!("Failed to write row: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| EngineError::Io(format!("Failed to flush CSV sink: {e}")))?;

    Ok(WriteReport {
        rows_written: rows.len() as u64,
        columns,
    })
}

fn open_sink(path: &Path, is_first_batch: bool) -> Result<File, EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EngineError::Io(format!("Failed to create export directory: {e}")))?;
    }

    let result = if is_first_batch {
        File::create(path)
    } else {
        OpenOptions::new().append(true).open(path)
    };

    result.map_err(|e| EngineError::Io(format!("Failed to open export file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(pairs: &[(&str, &str)]) -> Record {
        Record::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn read_parsed(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let bytes = std::fs::read(path).expect("Failed to read sink file");
        // The csv crate does not strip the BOM; do it here.
        let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
        let mut reader = csv::Reader::from_reader(data);
        let headers = reader
            .headers()
            .expect("Failed to read headers")
            .iter()
            .map(String::from)
            .collect();
        let records = reader
            .records()
            .map(|r| {
                r.expect("Failed to read record")
                    .iter()
                    .map(String::from)
                    .collect()
            })
            .collect();
        (headers, records)
    }

    #[tokio::test]
    async fn first_batch_writes_bom_and_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");

        let rows = vec![row(&[("id", "1"), ("name", "Alice")])];
        let labels = HashMap::from([("id".to_string(), "ID".to_string())]);

        write_batch(&path, &rows, true, &[], &labels).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], UTF8_BOM, "first bytes are EF BB BF");

        let (headers, records) = read_parsed(&path);
        assert_eq!(headers, vec!["ID", "name"], "label used, raw name fallback");
        assert_eq!(records, vec![vec!["1", "Alice"]]);
    }

    #[tokio::test]
    async fn append_batches_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let columns = vec!["id".to_string(), "name".to_string()];
        let labels = HashMap::new();

        let first: Vec<Record> = (0..3)
            .map(|i| row(&[("id", &i.to_string()), ("name", "x")]))
            .collect();
        let second: Vec<Record> = (3..5)
            .map(|i| row(&[("id", &i.to_string()), ("name", "y")]))
            .collect();

        write_batch(&path, &first, true, &columns, &labels)
            .await
            .unwrap();
        write_batch(&path, &second, false, &columns, &labels)
            .await
            .unwrap();

        let (headers, records) = read_parsed(&path);
        assert_eq!(headers, vec!["id", "name"]);
        assert_eq!(records.len(), 5, "header once, every data row present");
        assert_eq!(records[0][0], "0");
        assert_eq!(records[4][0], "4");
    }

    #[tokio::test]
    async fn column_order_fixed_across_batches() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let labels = HashMap::new();

        // Order derived from the first row of the first batch.
        let first = vec![row(&[("a", "1"), ("b", "2")])];
        let report = write_batch(&path, &first, true, &[], &labels)
            .await
            .unwrap();
        assert_eq!(report.columns, vec!["a", "b"]);

        // Later rows iterate keys in a different order; output stays a,b.
        let second = vec![row(&[("b", "4"), ("a", "3")])];
        write_batch(&path, &second, false, &report.columns, &labels)
            .await
            .unwrap();

        let (headers, records) = read_parsed(&path);
        assert_eq!(headers, vec!["a", "b"]);
        assert_eq!(records[1], vec!["3", "4"]);
    }

    #[tokio::test]
    async fn missing_column_is_empty_cell_extra_dropped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let columns = vec!["a".to_string(), "b".to_string()];

        let rows = vec![row(&[("a", "1"), ("stray", "z")])];
        write_batch(&path, &rows, true, &columns, &HashMap::new())
            .await
            .unwrap();

        let (headers, records) = read_parsed(&path);
        assert_eq!(headers, vec!["a", "b"]);
        assert_eq!(records[0], vec!["1", ""]);
    }

    #[tokio::test]
    async fn rfc4180_quoting_survives_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        let columns = vec!["name".to_string(), "bio".to_string()];

        let rows = vec![row(&[
            ("name", "Doe, John"),
            ("bio", "He said \"hi\"\nSecond line"),
        ])];
        write_batch(&path, &rows, true, &columns, &HashMap::new())
            .await
            .unwrap();

        let (_, records) = read_parsed(&path);
        assert_eq!(records[0][0], "Doe, John");
        assert_eq!(records[0][1], "He said \"hi\"\nSecond line");
    }

    #[tokio::test]
    async fn first_batch_truncates_stale_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        std::fs::write(&path, "stale content\n").unwrap();

        let rows = vec![row(&[("id", "1")])];
        write_batch(&path, &rows, true, &[], &HashMap::new())
            .await
            .unwrap();

        let (headers, records) = read_parsed(&path);
        assert_eq!(headers, vec!["id"]);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn creates_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("deep").join("out.csv");

        let rows = vec![row(&[("id", "1")])];
        write_batch(&path, &rows, true, &[], &HashMap::new())
            .await
            .unwrap();

        assert!(path.exists());
    }
}
