//! The conversion engine seam and its background host.
//!
//! The engine itself is an external black box: bytes and a file name go in,
//! Markdown comes out, and anything else it does (parsing PDF xref tables,
//! unzipping DOCX, …) is not this crate's business. [`ConversionEngine`]
//! is the trait boundary; [`host`] wraps one engine instance in a
//! long-lived task reachable only through the message protocol; and
//! [`markitdown`] is the production implementation on top of a provisioned
//! MarkItDown install.
//!
//! Keeping the trait object-safe and injectable means the whole queue and
//! protocol machinery is testable with a deterministic fake engine — no
//! Python, no subprocesses, no minutes-long bootstrap.

pub mod host;
pub mod markitdown;

use crate::error::EngineError;
use async_trait::async_trait;
use std::path::Path;

/// One logical dependency-install phase of engine bootstrap.
///
/// The host turns the engine's plan into `init-progress` notifications, so
/// the labels here are user-facing.
#[derive(Debug, Clone)]
pub struct InstallPhase {
    /// User-facing label, e.g. `"Installing format plugins…"`.
    pub label: String,
    /// Packages this phase installs.
    pub packages: Vec<String>,
}

impl InstallPhase {
    pub fn new(label: impl Into<String>, packages: &[&str]) -> Self {
        Self {
            label: label.into(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A slow-to-initialize document-to-Markdown conversion engine.
///
/// Bootstrap is split into stages so the host can report progress between
/// them: `load_runtime`, then each phase of `install_plan` via `install`,
/// then `verify`. After a successful bootstrap, `convert` may be called any
/// number of times — but never concurrently; the host guarantees
/// single-flight.
///
/// Implementations must be `Send + Sync` (the host task owns an
/// `Arc<dyn ConversionEngine>`) and must return errors rather than panic:
/// the host converts every [`EngineError`] into a protocol message, and a
/// panic would take the host down with it.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Start the runtime underneath the engine (interpreter, venv, …).
    async fn load_runtime(&self) -> Result<(), EngineError>;

    /// The dependency-install phases to run after the runtime is up.
    ///
    /// Called once per bootstrap; may be empty for engines with nothing to
    /// install (fakes, pre-provisioned binaries).
    fn install_plan(&self) -> Vec<InstallPhase>;

    /// Run one phase of the install plan.
    async fn install(&self, phase: &InstallPhase) -> Result<(), EngineError>;

    /// Post-install sanity check; a failure here is as fatal as any other
    /// bootstrap failure.
    async fn verify(&self) -> Result<(), EngineError>;

    /// Convert the document at `input` to Markdown.
    ///
    /// `input` is a scratch file the host created; the engine must not
    /// assume anything about its name beyond the extension.
    async fn convert(&self, input: &Path) -> Result<String, EngineError>;
}
