//! Result store: append-only JSON Lines log, one entry per processed paper.
//!
//! Appending is the only write. Each entry is serialised to a single line
//! up front and written with one `write_all` on a file opened in append
//! mode. Appends through the same [`ResultStore`] are serialised by a mutex,
//! so entries land in the order their runs reached the store stage and never
//! interleave.
//!
//! A crash mid-write can still leave a truncated last line. Readers
//! ([`ResultStore::read_entries`]) skip lines that do not parse.

use crate::error::DigestError;
use crate::output::LogEntry;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Append-only JSON Lines log.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry followed by a newline.
    pub async fn append(&self, entry: &LogEntry) -> Result<(), DigestError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| DigestError::Internal(format!("Failed to serialise log entry: {e}")))?;
        line.push('\n');

        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        let id = entry.id.clone();

        tokio::task::spawn_blocking(move || append_line(&path, &lock, &line))
            .await
            .map_err(|e| DigestError::Internal(format!("Append task panicked: {e}")))??;

        debug!("Appended entry for {} to {}", id, self.path.display());
        Ok(())
    }

    /// Read every well-formed entry, in log order.
    ///
    /// A missing log reads as empty. Blank and unparseable lines are skipped.
    pub async fn read_entries(&self) -> Result<Vec<LogEntry>, DigestError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DigestError::StoreRead {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping line {} of {}: {}",
                    idx + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Ids of every paper already present in the log.
    pub async fn processed_ids(&self) -> Result<HashSet<String>, DigestError> {
        Ok(self
            .read_entries()
            .await?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }
}

fn append_line(path: &Path, lock: &Mutex<()>, line: &str) -> Result<(), DigestError> {
    let write_err = |source| DigestError::StoreWrite {
        path: path.to_path_buf(),
        source,
    };

    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(line.as_bytes()).map_err(write_err)?;
    file.flush().map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{AnalysisRecord, INVALID_JSON};
    use crate::paper::PaperRef;
    use serde_json::{json, Value};

    fn entry(id: &str) -> LogEntry {
        let paper = PaperRef::new(id, format!("Paper {id}"), "http://x/doc.pdf", "http://x/abs");
        let map = match json!({"domain": "crypto", "formulas": [], "use_cases": []}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        LogEntry::new(&paper, AnalysisRecord::Success(map))
    }

    #[tokio::test]
    async fn appends_one_line_per_entry_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("log.jsonl"));

        for i in 0..5 {
            store.append(&entry(&i.to_string())).await.unwrap();
        }

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 5);
        assert!(raw.ends_with('\n'));
        for line in raw.lines() {
            serde_json::from_str::<Value>(line).expect("each line parses on its own");
        }

        let ids: Vec<String> = store
            .read_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("nested/deeper/log.jsonl"));
        store.append(&entry("1")).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("absent.jsonl"));
        assert!(store.read_entries().await.unwrap().is_empty());
        assert!(store.processed_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_skips_truncated_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("log.jsonl"));
        store.append(&entry("a")).await.unwrap();

        // Simulate a crash mid-write.
        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(b"{\"id\":\"b\",\"tit\n\n").unwrap();
        drop(file);

        store.append(&entry("c")).await.unwrap();

        let ids = store.processed_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a") && ids.contains("c"));
    }

    #[tokio::test]
    async fn malformed_analysis_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("log.jsonl"));
        let paper = PaperRef::new("9", "Bad", "http://x/9.pdf", "");
        let rec = AnalysisRecord::Malformed {
            error: INVALID_JSON.into(),
            raw_response: "oops".into(),
        };
        store.append(&LogEntry::new(&paper, rec.clone())).await.unwrap();

        let entries = store.read_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].analysis, rec);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("log.jsonl"));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(&entry(&i.to_string())).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 32);
        assert_eq!(store.read_entries().await.unwrap().len(), 32);
    }
}
