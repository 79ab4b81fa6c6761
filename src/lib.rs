//! # doctomd
//!
//! Convert documents (PDF, DOCX, XLSX, PPTX, HTML, CSV, EPUB, …) to
//! Markdown through a background-hosted conversion engine, with a
//! single-flight job queue, bounded conversion history, sanitized HTML
//! preview, and `.md`/ZIP export.
//!
//! ## Why a hosted engine?
//!
//! The underlying converter is heavyweight and slow to initialize — on first
//! run it provisions a full Python environment and installs its dependency
//! closure, which takes minutes. Hosting exactly one instance in a
//! background task keeps that cost off the caller's context and makes the
//! concurrency story trivial: all access goes through an asynchronous
//! request/response protocol, one conversion runs at a time, and Job state
//! is mutated in exactly one place.
//!
//! ## Architecture
//!
//! ```text
//! files ──▶ Controller ──▶ EngineHost ──▶ ConversionEngine
//!            │  ▲  │          (task)        (markitdown)
//!            │  └──┴── EngineEvent channel
//!            ├─▶ HistoryStore   (bounded JSON log, 50 × 50 KiB)
//!            ├─▶ ViewModel      (pure render description)
//!            └─▶ export         (.md naming, ZIP bundles)
//! ```
//!
//! 1. [`queue`]      — per-file lifecycle (`pending → converting → done|error`)
//!    and the FIFO dispatch list
//! 2. [`engine`]     — the [`engine::ConversionEngine`] seam, the message-passing
//!    [`engine::host`], and the production MarkItDown engine
//! 3. [`controller`] — sole consumer of engine events; drains the queue one
//!    job at a time and persists results
//! 4. [`history`]    — bounded, size-capped, newest-first conversion log
//! 5. [`preview`]    — GFM → sanitized, syntax-highlighted HTML
//! 6. [`export`]     — `.md` naming rule and ZIP bundling
//! 7. [`view`]       — pure function from state to a render description
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doctomd::{
//!     Controller, ConverterConfig, EngineHandle, MarkitdownEngine, NullRenderer,
//!     SubmittedFile,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut host = EngineHandle::spawn(Arc::new(MarkitdownEngine::new()));
//!     let mut events = host.take_events();
//!     let mut controller = Controller::new(
//!         ConverterConfig::default(),
//!         host.requester(),
//!         Box::new(NullRenderer),
//!     );
//!
//!     host.init().unwrap();
//!     controller.submit(vec![SubmittedFile::new(
//!         "report.pdf",
//!         std::fs::read("report.pdf").unwrap(),
//!     )]);
//!
//!     while let Some(event) = events.recv().await {
//!         controller.handle_event(event);
//!         if controller.engine_state().is_ready() && controller.all_settled() {
//!             break;
//!         }
//!     }
//!
//!     for (name, markdown) in controller.queue().completed() {
//!         println!("=== {name} ===\n{markdown}");
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doctomd` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! doctomd = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod export;
pub mod history;
pub mod preview;
pub mod protocol;
pub mod queue;
pub mod view;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder, SUPPORTED_EXTENSIONS};
pub use controller::{Controller, NullRenderer, Renderer};
pub use engine::host::EngineHandle;
pub use engine::markitdown::MarkitdownEngine;
pub use engine::{ConversionEngine, InstallPhase};
pub use error::{DocToMdError, EngineError};
pub use export::{markdown_file_name, zip_completed};
pub use history::{HistoryEntry, HistoryStore};
pub use preview::render_html;
pub use protocol::{EngineEvent, EngineRequest, EngineState, JobId};
pub use queue::{Job, JobQueue, JobStatus, SubmittedFile, Submission};
pub use view::{view_model, ViewModel};
