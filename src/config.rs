//! Configuration types for the converter application.
//!
//! All behaviour is controlled through [`ConverterConfig`], built via its
//! [`ConverterConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across the controller and the engine host, and
//! to diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A many-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.

use crate::error::DocToMdError;
use std::path::PathBuf;

/// File extensions accepted at submission time (the allow-list).
///
/// Anything else is silently dropped by [`crate::queue::JobQueue::submit`];
/// a warning surfaces only when an entire submission yields zero accepted
/// files.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "xlsx", "pptx", "html", "htm", "csv", "epub", "txt", "json", "xml", "md",
    "rst", "rtf", "tsv",
];

/// Maximum number of history entries kept (oldest evicted first).
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 50;

/// Maximum stored bytes per history entry; larger Markdown is truncated with
/// a marker noting the original length.
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 50 * 1024;

/// Configuration for the converter application.
///
/// Built via [`ConverterConfig::builder()`] or using
/// [`ConverterConfig::default()`].
///
/// # Example
/// ```rust
/// use doctomd::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .max_history_entries(10)
///     .history_path("/tmp/history.json")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Extensions accepted at submission. Default: [`SUPPORTED_EXTENSIONS`].
    ///
    /// Lower-case, no leading dot. The submission filter lower-cases the
    /// candidate extension before matching, so entries here must be
    /// lower-case to ever match.
    pub allowed_extensions: Vec<String>,

    /// History entry cap. Default: 50.
    ///
    /// The history is a convenience log, not an archive; a small bound keeps
    /// the persisted JSON document readable in one pass and the eviction
    /// policy trivial (drop the tail).
    pub max_history_entries: usize,

    /// Per-entry size cap in bytes. Default: 50 KiB.
    ///
    /// A single converted book can run to megabytes; storing it verbatim
    /// would crowd out every other entry in a quota-limited store. Entries
    /// over the cap keep a truncated copy plus the original length.
    pub max_entry_bytes: usize,

    /// Where the history JSON document lives. `None` keeps history in
    /// memory only (useful for tests and one-shot CLI runs with
    /// `--no-history`).
    pub history_path: Option<PathBuf>,

    /// File name of the multi-file export archive. Default:
    /// `doctomd-export.zip`.
    pub export_archive_name: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: SUPPORTED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            max_history_entries: DEFAULT_MAX_HISTORY_ENTRIES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            history_path: None,
            export_archive_name: "doctomd-export.zip".to_string(),
        }
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether a (lower-cased) extension passes the allow-list.
    pub fn is_supported(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| e == &ext)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn max_history_entries(mut self, n: usize) -> Self {
        self.config.max_history_entries = n.max(1);
        self
    }

    pub fn max_entry_bytes(mut self, n: usize) -> Self {
        self.config.max_entry_bytes = n;
        self
    }

    pub fn history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.history_path = Some(path.into());
        self
    }

    pub fn in_memory_history(mut self) -> Self {
        self.config.history_path = None;
        self
    }

    pub fn export_archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.export_archive_name = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, DocToMdError> {
        let c = &self.config;
        if c.allowed_extensions.is_empty() {
            return Err(DocToMdError::InvalidConfig(
                "Extension allow-list must not be empty".into(),
            ));
        }
        if c.max_entry_bytes < 1024 {
            return Err(DocToMdError::InvalidConfig(format!(
                "Per-entry cap must be ≥ 1 KiB, got {}",
                c.max_entry_bytes
            )));
        }
        if c.export_archive_name.trim().is_empty() {
            return Err(DocToMdError::InvalidConfig(
                "Export archive name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allow_list_matches_known_formats() {
        let config = ConverterConfig::default();
        for ext in ["pdf", "docx", "xlsx", "pptx", "epub", "md"] {
            assert!(config.is_supported(ext), "{ext} should be supported");
        }
        assert!(!config.is_supported("exe"));
        assert!(!config.is_supported(""));
    }

    #[test]
    fn is_supported_is_case_insensitive() {
        let config = ConverterConfig::default();
        assert!(config.is_supported("PDF"));
        assert!(config.is_supported("Docx"));
    }

    #[test]
    fn builder_rejects_empty_allow_list() {
        let result = ConverterConfig::builder()
            .allowed_extensions(Vec::<String>::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_tiny_entry_cap() {
        let result = ConverterConfig::builder().max_entry_bytes(10).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_normalises_extension_case() {
        let config = ConverterConfig::builder()
            .allowed_extensions(["PDF", "Docx"])
            .build()
            .unwrap();
        assert!(config.is_supported("pdf"));
        assert!(config.is_supported("docx"));
    }

    #[test]
    fn entry_cap_floor_is_one() {
        let config = ConverterConfig::builder().max_history_entries(0).build().unwrap();
        assert_eq!(config.max_history_entries, 1);
    }
}
