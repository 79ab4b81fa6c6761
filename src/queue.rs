//! The job queue: per-file conversion lifecycle and FIFO dispatch.
//!
//! [`JobQueue`] is the pure state-machine half of the controller — no
//! channels, no I/O — so the single-flight and FIFO properties can be tested
//! without an engine. Each submitted file becomes a [`Job`] walking
//! `pending → converting → done` or `pending → converting → error`; the only
//! exit from a terminal state is removal via [`JobQueue::clear`].
//!
//! Jobs are owned exclusively by this structure. The engine host never
//! mutates one; it only sends messages that the controller applies here.

use crate::config::ConverterConfig;
use crate::protocol::JobId;
use std::collections::VecDeque;
use tracing::debug;

/// One file handed to [`JobQueue::submit`].
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SubmittedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Converting,
    Done,
    Error,
}

/// One submitted file's conversion attempt.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub size: u64,
    pub ext: String,
    pub status: JobStatus,
    /// Percent 0–100, monotonically non-decreasing while `Converting`.
    pub progress: u8,
    /// Present only when `status == Done`.
    pub markdown: Option<String>,
    /// Diagnostic text, present only when `status == Error`.
    pub error: Option<String>,
    /// Source bytes, held until dispatch (then moved into the request).
    bytes: Option<Vec<u8>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Error)
    }
}

/// Outcome of a submission, for the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub accepted: usize,
    pub rejected: usize,
}

impl Submission {
    /// True when the whole submission was filtered out — the one case that
    /// warrants a user-facing notice.
    pub fn nothing_accepted(&self) -> bool {
        self.accepted == 0 && self.rejected > 0
    }
}

/// A file ready to be sent to the engine host.
#[derive(Debug)]
pub struct Dispatch {
    pub id: JobId,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
}

/// Ordered collection of jobs plus the FIFO dispatch list.
#[derive(Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
    dispatch: VecDeque<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `files` against the allow-list and enqueue the survivors.
    ///
    /// Unsupported files are dropped silently; callers inspect the returned
    /// [`Submission`] to decide whether to surface a notice.
    pub fn submit(&mut self, files: Vec<SubmittedFile>, config: &ConverterConfig) -> Submission {
        let mut accepted = 0;
        let mut rejected = 0;

        for file in files {
            let ext = extension_of(&file.name);
            if !config.is_supported(&ext) {
                debug!("queue: dropping unsupported file '{}'", file.name);
                rejected += 1;
                continue;
            }

            let job = Job {
                id: JobId::new(),
                size: file.bytes.len() as u64,
                name: file.name,
                ext,
                status: JobStatus::Pending,
                progress: 0,
                markdown: None,
                error: None,
                bytes: Some(file.bytes),
            };
            self.dispatch.push_back(job.id);
            self.jobs.push(job);
            accepted += 1;
        }

        Submission { accepted, rejected }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Whether a conversion is currently in flight.
    pub fn has_converting(&self) -> bool {
        self.jobs.iter().any(|j| j.status == JobStatus::Converting)
    }

    /// Pop the next dispatchable job in FIFO order.
    ///
    /// Ids that no longer refer to a pending job (cleared queue, already
    /// settled) are skipped. Returns `None` while a conversion is in flight,
    /// preserving the single-flight invariant. On success the job moves to
    /// `Converting` and its bytes are moved out into the [`Dispatch`].
    pub fn next_dispatch(&mut self) -> Option<Dispatch> {
        if self.has_converting() {
            return None;
        }

        while let Some(id) = self.dispatch.pop_front() {
            let Some(job) = self.job_mut(id) else {
                debug!("queue: skipping stale dispatch id {id}");
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }

            job.status = JobStatus::Converting;
            job.progress = 5;
            let file_bytes = job.bytes.take().unwrap_or_default();
            return Some(Dispatch {
                id,
                file_name: job.name.clone(),
                file_bytes,
            });
        }

        None
    }

    /// Apply a progress notification. Returns `false` for untracked ids.
    ///
    /// Progress is clamped to be non-decreasing; the host is trusted for
    /// labels but not for ordering.
    pub fn apply_progress(&mut self, id: JobId, percent: u8) -> bool {
        match self.job_mut(id) {
            Some(job) if job.status == JobStatus::Converting => {
                job.progress = job.progress.max(percent.min(100));
                true
            }
            _ => false,
        }
    }

    /// Mark a job done with its Markdown. Returns `false` for untracked ids.
    pub fn complete(&mut self, id: JobId, markdown: String) -> bool {
        match self.job_mut(id) {
            Some(job) if !job.is_terminal() => {
                job.status = JobStatus::Done;
                job.progress = 100;
                job.markdown = Some(markdown);
                job.bytes = None;
                true
            }
            _ => false,
        }
    }

    /// Mark a job failed with its diagnostic. Returns `false` for untracked ids.
    pub fn fail(&mut self, id: JobId, error: String) -> bool {
        match self.job_mut(id) {
            Some(job) if !job.is_terminal() => {
                job.status = JobStatus::Error;
                job.error = Some(error);
                job.bytes = None;
                true
            }
            _ => false,
        }
    }

    /// Discard all jobs and the dispatch list unconditionally.
    ///
    /// Does not signal the engine host; a late event for a discarded id is
    /// simply untracked afterwards.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.dispatch.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All jobs have reached a terminal state (an empty queue is settled).
    pub fn all_settled(&self) -> bool {
        self.jobs.iter().all(Job::is_terminal)
    }

    pub fn done_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Done)
            .count()
    }

    /// `(source name, markdown)` pairs of completed jobs, in queue order.
    pub fn completed(&self) -> Vec<(&str, &str)> {
        self.jobs
            .iter()
            .filter_map(|j| {
                j.markdown
                    .as_deref()
                    .filter(|_| j.status == JobStatus::Done)
                    .map(|md| (j.name.as_str(), md))
            })
            .collect()
    }
}

/// Lower-cased extension after the final dot, or the whole name when there
/// is none (which then simply fails the allow-list).
fn extension_of(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase()
}
