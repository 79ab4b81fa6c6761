//! Error types for the doctomd library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocToMdError`] — **Fatal**: the application cannot proceed at all
//!   (engine bootstrap failed, invalid configuration, export I/O failure).
//!   Returned as `Err(DocToMdError)` from top-level operations.
//!
//! * [`EngineError`] — **Engine-side**: a failure inside the hosted
//!   conversion engine. The engine host never lets these cross the context
//!   boundary as errors; it converts each one into a protocol
//!   [`crate::protocol::EngineEvent::Error`] message carrying the full
//!   diagnostic text. A per-job conversion failure leaves the host `ready`
//!   and the queue running; a bootstrap failure is fatal.
//!
//! The separation keeps the propagation policy honest: one failed job never
//! stops the queue, and no exception crosses the host boundary unconverted.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doctomd library.
///
/// Per-job failures travel as protocol messages (see
/// [`crate::protocol::EngineEvent::Error`]) and end up as diagnostic text on
/// the affected [`crate::queue::Job`], not here.
#[derive(Debug, Error)]
pub enum DocToMdError {
    /// Engine bootstrap failed; no conversions are possible.
    #[error(
        "Engine initialisation failed: {detail}\n\
         The conversion engine could not be provisioned. Check that Python 3\n\
         is installed, or set MARKITDOWN_BIN to an existing executable."
    )]
    EngineInitFailed { detail: String },

    /// A request was sent after the engine host shut down.
    #[error("Engine host is gone: the background task has terminated")]
    EngineGone,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not create or write an exported file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the export archive failed.
    #[error("Archive export failed: {0}")]
    ExportFailed(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure inside the hosted conversion engine.
///
/// Produced by [`crate::engine::ConversionEngine`] implementations and
/// flattened into diagnostic strings at the host boundary.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The runtime underneath the engine could not be started.
    #[error("Runtime bootstrap failed: {0}")]
    RuntimeUnavailable(String),

    /// A dependency install phase failed.
    #[error("Install phase '{phase}' failed: {detail}")]
    InstallFailed { phase: String, detail: String },

    /// The post-install verification step failed.
    #[error("Engine verification failed: {0}")]
    VerificationFailed(String),

    /// The engine raised while converting a document.
    ///
    /// `detail` carries the engine's full diagnostic output (for the
    /// production engine, the complete stderr of the converter process).
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// Scratch-file I/O around the conversion failed.
    #[error("Scratch file error: {0}")]
    Scratch(String),
}
