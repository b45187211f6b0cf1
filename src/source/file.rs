//! Offset-paginated reads over an on-disk CSV file.
//!
//! Seeking is implemented by skipping `offset` parsed rows from the start of
//! the file. That is O(n) per call, which stays linear across a whole job
//! because batch offsets advance monotonically: earlier rows are re-parsed
//! only for seeking, never re-processed.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use crate::error::EngineError;
use crate::source::{Position, Record, SourceBatch};

/// Offset-based row source over a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    /// Creates a source for the given CSV file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches up to `limit` data rows starting at the zero-based data-row
    /// `offset` (header excluded from counting). Peeks one row past the
    /// slice to decide `has_more`.
    ///
    /// A row whose column count differs from the header still becomes a
    /// [`Record`]; extra values get positional `column_N` names, missing
    /// ones are simply absent. A malformed row is one failed item for the
    /// processor, never a lost job.
    pub async fn fetch(&self, offset: u64, limit: usize) -> Result<SourceBatch, EngineError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || fetch_blocking(&path, offset, limit))
            .await
            .map_err(|e| EngineError::Internal(format!("CSV fetch task failed: {e}")))?
    }

    /// Counts data rows (header excluded). Used for the start-time total.
    pub async fn count_rows(&self) -> Result<u64, EngineError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut reader = open_reader(&path)?;
            let mut count: u64 = 0;
            for result in reader.records() {
                result.map_err(|e| EngineError::SourceFetch(format!("CSV read failed: {e}")))?;
                count += 1;
            }
            Ok::<_, EngineError>(count)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("CSV count task failed: {e}")))?
    }

    /// Reads the header row.
    pub async fn headers(&self) -> Result<Vec<String>, EngineError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut reader = open_reader(&path)?;
            let headers = reader
                .headers()
                .map_err(|e| EngineError::CsvInvalid(format!("Failed to read headers: {e}")))?;
            Ok::<_, EngineError>(headers.iter().map(String::from).collect())
        })
        .await
        .map_err(|e| EngineError::Internal(format!("CSV header task failed: {e}")))?
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<BufReader<File>>, EngineError> {
    let file = File::open(path)
        .map_err(|e| EngineError::SourceFetch(format!("Failed to open CSV file: {e}")))?;

    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file)))
}

fn fetch_blocking(path: &Path, offset: u64, limit: usize) -> Result<SourceBatch, EngineError> {
    let mut reader = open_reader(path)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| EngineError::CsvInvalid(format!("Failed to read headers: {e}")))?
        .iter()
        .map(String::from)
        .collect();

    if headers.is_empty() {
        return Err(EngineError::CsvInvalid("CSV file has no header row".into()));
    }

    let mut rows: Vec<Record> = Vec::with_capacity(limit);
    let mut has_more = false;
    let mut index: u64 = 0;

    for result in reader.records() {
        let record =
            result.map_err(|e| EngineError::SourceFetch(format!("CSV read failed: {e}")))?;

        if index < offset {
            index += 1;
            continue;
        }

        if rows.len() == limit {
            // Peeked one row past the slice.
            has_more = true;
            break;
        }

        rows.push(zip_row(&headers, &record));
        index += 1;
    }

    let count = rows.len() as u64;
    Ok(SourceBatch {
        rows,
        has_more,
        next: Position::Offset(offset + count),
        total: None,
    })
}

/// Pairs header names with row values, tolerating ragged rows.
fn zip_row(headers: &[String], record: &csv::StringRecord) -> Record {
    let mut row = Record::new();
    for (i, value) in record.iter().enumerate() {
        match headers.get(i) {
            Some(name) => row.push(name.clone(), value),
            None => row.push(format!("column_{}", i + 1), value),
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write temp CSV");
        file.flush().expect("Failed to flush temp CSV");
        file
    }

    #[tokio::test]
    async fn fetch_first_slice_with_peek() {
        let file = write_csv("id,name\n1,Alice\n2,Bob\n3,Charlie\n");
        let source = CsvFileSource::new(file.path());

        let batch = source.fetch(0, 2).await.unwrap();

        assert_eq!(batch.rows.len(), 2);
        assert!(batch.has_more);
        assert_eq!(batch.next, Position::Offset(2));
        assert_eq!(batch.rows[0].get("name"), Some("Alice"));
        assert_eq!(batch.rows[1].get("id"), Some("2"));
    }

    #[tokio::test]
    async fn fetch_tail_slice_has_no_more() {
        let file = write_csv("id,name\n1,Alice\n2,Bob\n3,Charlie\n");
        let source = CsvFileSource::new(file.path());

        let batch = source.fetch(2, 2).await.unwrap();

        assert_eq!(batch.rows.len(), 1);
        assert!(!batch.has_more);
        assert_eq!(batch.next, Position::Offset(3));
        assert_eq!(batch.rows[0].get("name"), Some("Charlie"));
    }

    #[tokio::test]
    async fn exact_boundary_reports_no_more() {
        let file = write_csv("id\n1\n2\n");
        let source = CsvFileSource::new(file.path());

        let batch = source.fetch(0, 2).await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(!batch.has_more);
    }

    #[tokio::test]
    async fn sequential_offsets_cover_every_row_once() {
        let mut content = String::from("id\n");
        for i in 0..10 {
            content.push_str(&format!("{i}\n"));
        }
        let file = write_csv(&content);
        let source = CsvFileSource::new(file.path());

        let mut seen: Vec<String> = Vec::new();
        let mut offset = 0u64;
        loop {
            let batch = source.fetch(offset, 3).await.unwrap();
            for row in &batch.rows {
                seen.push(row.get("id").unwrap().to_string());
            }
            offset = batch.next.offset();
            if !batch.has_more {
                break;
            }
        }

        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected, "no gaps, no duplicates");
    }

    #[tokio::test]
    async fn ragged_row_still_emitted() {
        let file = write_csv("a,b,c\n1,2,3\n4,5\n6,7,8,9\n");
        let source = CsvFileSource::new(file.path());

        let batch = source.fetch(0, 10).await.unwrap();
        assert_eq!(batch.rows.len(), 3);

        // Short row: missing key absent.
        assert_eq!(batch.rows[1].get("b"), Some("5"));
        assert_eq!(batch.rows[1].get("c"), None);

        // Long row: extra value gets a positional name.
        assert_eq!(batch.rows[2].get("column_4"), Some("9"));
    }

    #[tokio::test]
    async fn quoted_fields_survive() {
        let file = write_csv("name,bio\n\"Doe, John\",\"Line1\nLine2\"\n");
        let source = CsvFileSource::new(file.path());

        let batch = source.fetch(0, 10).await.unwrap();
        assert_eq!(batch.rows[0].get("name"), Some("Doe, John"));
        assert_eq!(batch.rows[0].get("bio"), Some("Line1\nLine2"));
    }

    #[tokio::test]
    async fn count_rows_excludes_header() {
        let file = write_csv("id\n1\n2\n3\n4\n5\n");
        let source = CsvFileSource::new(file.path());
        assert_eq!(source.count_rows().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn count_rows_header_only_is_zero() {
        let file = write_csv("id,name\n");
        let source = CsvFileSource::new(file.path());
        assert_eq!(source.count_rows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn headers_read() {
        let file = write_csv("id,name,email\n");
        let source = CsvFileSource::new(file.path());
        assert_eq!(
            source.headers().await.unwrap(),
            vec!["id", "name", "email"]
        );
    }

    #[tokio::test]
    async fn missing_file_is_source_fetch_error() {
        let source = CsvFileSource::new("/nonexistent/rows.csv");
        let err = source.fetch(0, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::SourceFetch(_)));
    }
}
