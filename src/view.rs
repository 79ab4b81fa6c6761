//! Pure view layer: queue and history state in, render description out.
//!
//! Nothing here touches a channel, a file, or a terminal. [`view_model`] is
//! a pure function from `(engine state, jobs, history)` to a [`ViewModel`]
//! of plain rows, so every rendering surface — the CLI, a GUI, a test
//! asserting on what the user would see — consumes the same description and
//! the queue logic never learns how it is displayed.

use crate::history::{format_relative_date, HistoryEntry};
use crate::protocol::{EngineState, JobId};
use crate::queue::{Job, JobStatus};
use chrono::{DateTime, Utc};

/// Everything a rendering surface needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub engine: EngineStatusLine,
    pub files: Vec<FileRow>,
    /// The file-queue panel is hidden while empty.
    pub show_queue: bool,
    /// "Download all" appears only with two or more completed jobs.
    pub download_all_visible: bool,
    /// Transient warning, e.g. a submission where nothing qualified.
    pub notice: Option<String>,
    pub history: Vec<HistoryRow>,
}

/// The engine indicator: a CSS-class-like state token plus display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatusLine {
    pub state: &'static str,
    pub text: String,
}

/// One row of the file queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub id: JobId,
    pub name: String,
    pub ext: String,
    pub size_label: String,
    pub status_label: String,
    /// Progress bar fill; present only while converting.
    pub progress: Option<u8>,
    /// One-line error summary; present only for failed jobs.
    pub error_line: Option<String>,
}

/// One row of the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub id: String,
    pub file_name: String,
    pub date_label: String,
    pub chars_label: String,
}

/// Build the render description for the current state.
///
/// `now` is passed in rather than read from the clock so relative date
/// labels are deterministic under test.
pub fn view_model(
    engine: &EngineState,
    jobs: &[Job],
    history: &[HistoryEntry],
    notice: Option<&str>,
    now: DateTime<Utc>,
) -> ViewModel {
    let files: Vec<FileRow> = jobs.iter().map(file_row).collect();
    let done_count = jobs.iter().filter(|j| j.status == JobStatus::Done).count();

    ViewModel {
        engine: engine_status_line(engine),
        show_queue: !files.is_empty(),
        download_all_visible: done_count >= 2,
        files,
        notice: notice.map(str::to_string),
        history: history
            .iter()
            .map(|e| HistoryRow {
                id: e.id.clone(),
                file_name: e.file_name.clone(),
                date_label: format_relative_date(e.date, now),
                chars_label: chars_label(e.char_count),
            })
            .collect(),
    }
}

fn engine_status_line(engine: &EngineState) -> EngineStatusLine {
    match engine {
        EngineState::Uninitialized => EngineStatusLine {
            state: "uninitialized",
            text: "Starting…".to_string(),
        },
        EngineState::Loading { label, .. } => EngineStatusLine {
            state: "loading",
            text: label.clone(),
        },
        EngineState::Ready => EngineStatusLine {
            state: "ready",
            text: "Ready".to_string(),
        },
        EngineState::Error { message } => EngineStatusLine {
            state: "error",
            text: format!("Error: {message}"),
        },
    }
}

fn file_row(job: &Job) -> FileRow {
    let status_label = match job.status {
        JobStatus::Pending => "Pending".to_string(),
        JobStatus::Converting => format!("{}%", job.progress),
        JobStatus::Done => "Done".to_string(),
        JobStatus::Error => "Error".to_string(),
    };

    FileRow {
        id: job.id,
        name: job.name.clone(),
        ext: job.ext.clone(),
        size_label: format_size(job.size),
        status_label,
        progress: (job.status == JobStatus::Converting).then_some(job.progress),
        error_line: job.error.as_deref().map(error_line),
    }
}

/// Last line of the diagnostic, capped at 120 chars; the full text stays on
/// the Job for on-demand display.
fn error_line(error: &str) -> String {
    let last = error.lines().last().unwrap_or(error);
    let mut line: String = last.chars().take(120).collect();
    if last.chars().count() > 120 {
        line.push('…');
    }
    line
}

/// Human-readable byte size: `512 B`, `3.4 KB`, `1.2 MB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn chars_label(count: usize) -> String {
    if count > 1000 {
        format!("{}k chars", (count as f64 / 1000.0).round() as usize)
    } else {
        format!("{count} chars")
    }
}
