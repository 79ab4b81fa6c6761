//! Export: single-file `.md` downloads and multi-file ZIP bundles.
//!
//! Naming rule everywhere: replace the source file's final extension with
//! `.md` (`report.pdf` → `report.md`). The archive bundles one entry per
//! completed job under that rule; callers gate the archive action on two or
//! more completed jobs — a single result is a plain file download.

use crate::error::DocToMdError;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Replace the final extension of `source` with `.md`.
///
/// Names without an extension get `.md` appended.
pub fn markdown_file_name(source: &str) -> String {
    match source.rsplit_once('.') {
        Some((base, _)) if !base.is_empty() => format!("{base}.md"),
        _ => format!("{source}.md"),
    }
}

/// Bundle `(source name, markdown)` pairs into a deflated ZIP archive.
///
/// Entry names follow [`markdown_file_name`]; backslashes are normalised so
/// archives extract identically everywhere.
pub fn zip_completed(entries: &[(&str, &str)]) -> Result<Vec<u8>, DocToMdError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, markdown) in entries {
        let entry_name = markdown_file_name(name).replace('\\', "/");
        writer
            .start_file(entry_name.as_str(), options)
            .map_err(|e| DocToMdError::ExportFailed(format!("zip entry '{entry_name}': {e}")))?;
        writer
            .write_all(markdown.as_bytes())
            .map_err(|e| DocToMdError::ExportFailed(format!("zip write '{entry_name}': {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| DocToMdError::ExportFailed(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Write `content` to `path` atomically (temp file + rename), creating
/// parent directories as needed.
pub async fn write_output(path: &Path, content: &[u8]) -> Result<(), DocToMdError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocToMdError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| DocToMdError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| DocToMdError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
