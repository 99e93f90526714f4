//! # Result Sink
//!
//! Append-only tabular persistence of extracted records. One row per
//! emitted record, valid or low-confidence, in the fixed column order of
//! [`CSV_COLUMNS`]. Appends from concurrent workers are serialized by a
//! lock-guarded open-append-close cycle, so rows never interleave.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::harvesting::records::{CSV_COLUMNS, ListingRecord};

/// Errors from the result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable, append-only destination for harvested records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Appends a batch of records. Implementations must serialize
    /// concurrent calls.
    async fn append(&self, records: &[ListingRecord]) -> Result<(), SinkError>;
}

/// CSV file sink. The file is created eagerly with its header row so a run
/// that harvests nothing still leaves a well-formed artifact.
pub struct CsvSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvSink {
    /// Creates the output file (and its parent directory) and writes the
    /// header row.
    ///
    /// # Errors
    /// Fails when the directory or file cannot be created.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::Io { path: path.clone(), source })?;
        }

        let mut header = CSV_COLUMNS.join(",");
        header.push('\n');
        tokio::fs::write(&path, header)
            .await
            .map_err(|source| SinkError::Io { path: path.clone(), source })?;

        info!("Initialized CSV sink at {}", path.display());
        Ok(Self { path, lock: Mutex::new(()) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn append(&self, records: &[ListingRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = String::new();
        for record in records {
            let row = record.to_row();
            let escaped: Vec<String> = row.iter().map(|cell| escape_cell(cell)).collect();
            batch.push_str(&escaped.join(","));
            batch.push('\n');
        }

        // One lock per batch: open, append, close.
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| SinkError::Io { path: self.path.clone(), source })?;
        file.write_all(batch.as_bytes())
            .await
            .map_err(|source| SinkError::Io { path: self.path.clone(), source })?;
        file.flush()
            .await
            .map_err(|source| SinkError::Io { path: self.path.clone(), source })?;

        Ok(())
    }
}

fn needs_quotes(cell: &str) -> bool {
    cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r')
}

fn escape_cell(cell: &str) -> String {
    if needs_quotes(cell) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::harvesting::records::MISSING_FIELD_TOKEN;

    fn record(url: &str) -> ListingRecord {
        ListingRecord {
            page_number: 1,
            url: Some(url.to_string()),
            price: Some("250000 €".to_string()),
            address: Some("12, Rue du Bac, Paris (75007)".to_string()),
            confidence: 10,
            ..ListingRecord::default()
        }
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::create(dir.path().join("out.csv")).await.unwrap();

        sink.append(&[record("https://x/1"), record("https://x/2")]).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Page_Number,Type,Price"));
        assert!(lines[1].contains(MISSING_FIELD_TOKEN), "absent fields use the missing token");
        assert!(
            lines[1].contains("\"12, Rue du Bac, Paris (75007)\""),
            "cells with commas are quoted"
        );
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvSink::create(dir.path().join("out.csv")).await.unwrap());

        let mut handles = Vec::new();
        for batch in 0..8 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let records: Vec<ListingRecord> =
                    (0..10).map(|i| record(&format!("https://x/{batch}/{i}"))).collect();
                sink.append(&records).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1 + 80);
        let columns = CSV_COLUMNS.len();
        for line in &lines[1..] {
            assert_eq!(line.matches("https://x/").count(), 1, "one URL per row: {line}");
            assert!(line.split(',').count() >= columns - 1);
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::create(dir.path().join("out.csv")).await.unwrap();
        sink.append(&[]).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 1, "header only");
    }
}
