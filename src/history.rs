//! Persistent history of completed conversions.
//!
//! A bounded, size-capped, newest-first log persisted as a single JSON
//! document. The store is deliberately forgiving: an unreadable or corrupt
//! document is treated as empty, and [`HistoryStore::add`] never fails
//! observably — persistence failures caused by storage quota are recovered
//! by evicting the oldest entries until the write fits (or only one entry
//! remains).
//!
//! Persistence goes through the [`StorageBackend`] trait so quota failures
//! can be injected in tests without filling a real disk. The default
//! [`JsonFileBackend`] writes atomically (temp file + rename) so a crash
//! mid-write never leaves a half-document behind.

use crate::config::ConverterConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// A persisted snapshot of one completed conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Opaque entry id (not a [`crate::protocol::JobId`]; history outlives
    /// the queue).
    pub id: String,
    pub file_name: String,
    /// Markdown content, possibly truncated to the per-entry cap.
    pub markdown: String,
    /// Character count of the original (pre-truncation) Markdown.
    pub char_count: usize,
    pub date: DateTime<Utc>,
}

/// Errors a storage backend may report from a write.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store is out of space; the caller may retry with a
    /// smaller payload.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Any other I/O failure. Not retried.
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Where the serialised history document lives.
///
/// `load` returning `None` means "no document / unreadable" — both are
/// treated as an empty history.
pub trait StorageBackend: Send {
    fn load(&self) -> Option<String>;
    fn store(&mut self, payload: &str) -> Result<(), StorageError>;
    fn clear(&mut self);
}

/// File-backed storage: one JSON document at a fixed path.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageBackend for JsonFileBackend {
    fn load(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    fn store(&mut self, payload: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        // Atomic write: write to temp, then rename.
        let tmp_path = self.path.with_extension("json.tmp");
        let write = std::fs::write(&tmp_path, payload)
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));

        write.map_err(|e| match e.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                StorageError::QuotaExceeded
            }
            _ => StorageError::Io(e.to_string()),
        })
    }

    fn clear(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// In-memory storage, used when no history path is configured and in tests.
///
/// An optional quota (in bytes) makes the eviction-retry path testable.
#[derive(Default)]
pub struct MemoryBackend {
    payload: Option<String>,
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects writes larger than `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            payload: None,
            quota: Some(quota),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self) -> Option<String> {
        self.payload.clone()
    }

    fn store(&mut self, payload: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if payload.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        self.payload = Some(payload.to_string());
        Ok(())
    }

    fn clear(&mut self) {
        self.payload = None;
    }
}

/// The bounded conversion history.
pub struct HistoryStore {
    backend: Box<dyn StorageBackend>,
    max_entries: usize,
    max_entry_bytes: usize,
}

impl HistoryStore {
    /// Open the store described by `config`: file-backed when a history path
    /// is set, in-memory otherwise.
    pub fn open(config: &ConverterConfig) -> Self {
        let backend: Box<dyn StorageBackend> = match &config.history_path {
            Some(path) => Box::new(JsonFileBackend::new(path.clone())),
            None => Box::new(MemoryBackend::new()),
        };
        Self::with_backend(backend, config.max_history_entries, config.max_entry_bytes)
    }

    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        max_entries: usize,
        max_entry_bytes: usize,
    ) -> Self {
        Self {
            backend,
            max_entries,
            max_entry_bytes,
        }
    }

    /// Create and prepend an entry, enforcing both caps, and persist.
    ///
    /// Never fails observably; quota errors are recovered by oldest-first
    /// eviction inside [`Self::persist`].
    pub fn add(&mut self, file_name: &str, markdown: &str) -> HistoryEntry {
        let char_count = markdown.chars().count();
        let content = if markdown.len() > self.max_entry_bytes {
            let kept = truncate_to_boundary(markdown, self.max_entry_bytes);
            format!("{kept}\n\n[Truncated - original was {char_count} chars]")
        } else {
            markdown.to_string()
        };

        let entry = HistoryEntry {
            id: Uuid::new_v4().simple().to_string(),
            file_name: file_name.to_string(),
            markdown: content,
            char_count,
            date: Utc::now(),
        };

        let mut entries = self.load();
        entries.insert(0, entry.clone());
        entries.truncate(self.max_entries);
        self.persist(&mut entries);

        entry
    }

    /// All entries, most recent first.
    pub fn get_all(&self) -> Vec<HistoryEntry> {
        self.load()
    }

    pub fn get_by_id(&self, id: &str) -> Option<HistoryEntry> {
        self.load().into_iter().find(|e| e.id == id)
    }

    /// Remove one entry. Idempotent: removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &str) {
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() != before {
            self.persist(&mut entries);
        }
    }

    pub fn clear_all(&mut self) {
        self.backend.clear();
    }

    fn load(&self) -> Vec<HistoryEntry> {
        // Unreadable or corrupt documents are treated as empty history.
        self.backend
            .load()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn persist(&mut self, entries: &mut Vec<HistoryEntry>) {
        loop {
            let payload = match serde_json::to_string(entries) {
                Ok(p) => p,
                Err(e) => {
                    warn!("history: failed to serialise entries: {e}");
                    return;
                }
            };

            match self.backend.store(&payload) {
                Ok(()) => return,
                Err(StorageError::QuotaExceeded) if entries.len() > 1 => {
                    // Drop the oldest entry and retry until the write fits.
                    entries.pop();
                    debug!("history: quota exceeded, evicted oldest entry ({} left)", entries.len());
                }
                Err(e) => {
                    warn!("history: persist failed: {e}");
                    return;
                }
            }
        }
    }
}

/// Relative date label for the history view.
///
/// Buckets: under a minute, minutes, hours, days, then a short month-day
/// date for anything a week or older.
pub fn format_relative_date(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(then);
    let minutes = diff.num_minutes();
    let hours = diff.num_hours();
    let days = diff.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        then.format("%b %-d").to_string()
    }
}

/// Cut `s` at the largest char boundary not exceeding `max` bytes.
fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_with_memory(max_entries: usize, max_entry_bytes: usize) -> HistoryStore {
        HistoryStore::with_backend(Box::new(MemoryBackend::new()), max_entries, max_entry_bytes)
    }

    #[test]
    fn add_then_get_roundtrip() {
        let mut store = store_with_memory(50, 50 * 1024);
        let entry = store.add("report.pdf", "# Report\n\nHello.");
        assert_eq!(entry.file_name, "report.pdf");
        assert_eq!(entry.char_count, "# Report\n\nHello.".chars().count());

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].markdown, "# Report\n\nHello.");
        assert_eq!(store.get_by_id(&entry.id).unwrap(), all[0]);
    }

    #[test]
    fn newest_entry_comes_first() {
        let mut store = store_with_memory(50, 50 * 1024);
        store.add("a.pdf", "first");
        store.add("b.pdf", "second");
        let all = store.get_all();
        assert_eq!(all[0].file_name, "b.pdf");
        assert_eq!(all[1].file_name, "a.pdf");
    }

    #[test]
    fn entry_cap_evicts_oldest() {
        let mut store = store_with_memory(50, 50 * 1024);
        for i in 0..55 {
            store.add(&format!("doc{i}.pdf"), "content");
        }
        let all = store.get_all();
        assert_eq!(all.len(), 50);
        // The oldest five (doc0..doc4) were evicted.
        assert_eq!(all[0].file_name, "doc54.pdf");
        assert_eq!(all[49].file_name, "doc5.pdf");
    }

    #[test]
    fn oversized_markdown_is_truncated_with_marker() {
        let mut store = store_with_memory(50, 1024);
        let original = "x".repeat(5000);
        let entry = store.add("big.docx", &original);

        assert_eq!(entry.char_count, 5000);
        assert!(entry.markdown.len() < original.len());
        assert!(entry.markdown.contains("[Truncated - original was 5000 chars]"));
        // The stored copy starts with the original prefix.
        assert!(entry.markdown.starts_with("xxxx"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut store = store_with_memory(50, 1024);
        // 4-byte scorpion emoji repeated lands mid-char at most byte caps.
        let original = "\u{1F982}".repeat(600);
        let entry = store.add("emoji.txt", &original);
        assert!(entry.markdown.contains("[Truncated"));
        // Would have panicked on a bad boundary; also must still be valid UTF-8 prefix.
        assert!(entry.markdown.starts_with('\u{1F982}'));
    }

    #[test]
    fn content_at_cap_is_stored_unmodified() {
        let mut store = store_with_memory(50, 1024);
        let original = "y".repeat(1024);
        let entry = store.add("edge.txt", &original);
        assert_eq!(entry.markdown, original);
        assert!(!entry.markdown.contains("[Truncated"));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = store_with_memory(50, 50 * 1024);
        let entry = store.add("a.pdf", "content");
        store.remove(&entry.id);
        assert!(store.get_all().is_empty());
        // Second removal of the same id is a no-op.
        store.remove(&entry.id);
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn clear_all_empties_the_store() {
        let mut store = store_with_memory(50, 50 * 1024);
        store.add("a.pdf", "one");
        store.add("b.pdf", "two");
        store.clear_all();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn corrupt_document_is_treated_as_empty() {
        struct CorruptBackend;
        impl StorageBackend for CorruptBackend {
            fn load(&self) -> Option<String> {
                Some("{not json".to_string())
            }
            fn store(&mut self, _payload: &str) -> Result<(), StorageError> {
                Ok(())
            }
            fn clear(&mut self) {}
        }

        let store = HistoryStore::with_backend(Box::new(CorruptBackend), 50, 50 * 1024);
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn quota_failure_evicts_oldest_until_write_fits() {
        // Quota fits roughly two entries; adding a third forces eviction.
        let mut store =
            HistoryStore::with_backend(Box::new(MemoryBackend::with_quota(700)), 50, 50 * 1024);
        store.add("a.pdf", &"a".repeat(200));
        store.add("b.pdf", &"b".repeat(200));
        store.add("c.pdf", &"c".repeat(200));

        let all = store.get_all();
        assert!(all.len() < 3, "quota should have evicted at least one entry");
        // The newest entry always survives.
        assert_eq!(all[0].file_name, "c.pdf");
    }

    #[test]
    fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut store = HistoryStore::with_backend(
            Box::new(JsonFileBackend::new(&path)),
            50,
            50 * 1024,
        );
        store.add("report.pdf", "# hi");
        drop(store);

        // Re-open from the same file: the entry persisted.
        let store = HistoryStore::with_backend(
            Box::new(JsonFileBackend::new(&path)),
            50,
            50 * 1024,
        );
        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_name, "report.pdf");
    }

    #[test]
    fn relative_dates_bucket_correctly() {
        let now = Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap();
        let at = |secs: i64| now - chrono::Duration::seconds(secs);

        assert_eq!(format_relative_date(at(30), now), "Just now");
        assert_eq!(format_relative_date(at(5 * 60), now), "5m ago");
        assert_eq!(format_relative_date(at(3 * 3600), now), "3h ago");
        assert_eq!(format_relative_date(at(2 * 86400), now), "2d ago");
        assert_eq!(
            format_relative_date(Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(), now),
            "Aug 1"
        );
    }
}
