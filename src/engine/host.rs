//! The engine host: one engine instance behind a message-passing boundary.
//!
//! ## Why a dedicated task?
//!
//! The engine is heavyweight and slow to initialize (for the production
//! engine, minutes of package installs on first run) and must never block
//! the controlling context. The host owns the single engine instance inside
//! a spawned task; the only way in is the request channel, the only way out
//! is the event channel. No shared memory, no locks — the channels are the
//! entire synchronisation story.
//!
//! ## Contract
//!
//! * State machine `uninitialized → loading → ready`, or `loading → error`
//!   on any bootstrap failure (fatal: no automatic retry).
//! * While loading, emits `init-progress` events with a monotonically
//!   increasing percentage: runtime bootstrap, each install phase of the
//!   engine's plan, then verification.
//! * Processes one `convert` at a time and performs no queuing of its own —
//!   ordering and serialisation belong to the controller.
//! * Every engine failure is caught here and crosses the boundary as a
//!   structured `error` event; a per-job failure leaves the host `ready`.

use crate::engine::ConversionEngine;
use crate::error::DocToMdError;
use crate::protocol::{EngineEvent, EngineRequest, JobId};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Handle to a spawned engine host.
///
/// The requester half is cheaply cloneable; the event receiver is taken once
/// by whoever drives the controller loop.
pub struct EngineHandle {
    requests: mpsc::UnboundedSender<EngineRequest>,
    events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl EngineHandle {
    /// Spawn a host task around `engine`.
    ///
    /// The host idles until it receives [`EngineRequest::Init`] and shuts
    /// down when every requester clone has been dropped.
    pub fn spawn(engine: Arc<dyn ConversionEngine>) -> Self {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_host(engine, req_rx, ev_tx));

        Self {
            requests: req_tx,
            events: Some(ev_rx),
        }
    }

    /// A cloneable sender for dispatching requests.
    pub fn requester(&self) -> mpsc::UnboundedSender<EngineRequest> {
        self.requests.clone()
    }

    /// Send one request to the host.
    pub fn send(&self, request: EngineRequest) -> Result<(), DocToMdError> {
        self.requests
            .send(request)
            .map_err(|_| DocToMdError::EngineGone)
    }

    /// Kick off engine bootstrap.
    pub fn init(&self) -> Result<(), DocToMdError> {
        self.send(EngineRequest::Init)
    }

    /// Take the event receiver. Panics if taken twice — there is exactly one
    /// consumer by design.
    pub fn take_events(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.events
            .take()
            .expect("engine host events already taken")
    }

    /// The event receiver as a `Stream`, for `StreamExt`-style consumers.
    pub fn take_event_stream(&mut self) -> UnboundedReceiverStream<EngineEvent> {
        UnboundedReceiverStream::new(self.take_events())
    }
}

/// The host task body.
async fn run_host(
    engine: Arc<dyn ConversionEngine>,
    mut requests: mpsc::UnboundedReceiver<EngineRequest>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    // Scratch directory for the lifetime of the host; dropped (and removed)
    // when the task ends.
    let scratch = match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            emit(
                &events,
                EngineEvent::Error {
                    id: None,
                    file_name: None,
                    error: format!("Engine init failed: cannot create scratch dir: {e}"),
                },
            );
            return;
        }
    };

    let mut ready = false;

    while let Some(request) = requests.recv().await {
        match request {
            EngineRequest::Init => {
                ready = init_engine(&engine, &events).await;
            }
            EngineRequest::Convert {
                id,
                file_name,
                file_bytes,
            } => {
                if !ready {
                    emit(
                        &events,
                        EngineEvent::Error {
                            id: Some(id),
                            file_name: Some(file_name),
                            error: "Engine is not initialised".to_string(),
                        },
                    );
                    continue;
                }
                convert_file(&engine, &events, scratch.path().to_path_buf(), id, file_name, file_bytes)
                    .await;
            }
        }
    }

    debug!("engine host: request channel closed, shutting down");
}

/// Drive the multi-stage bootstrap, reporting progress along the way.
///
/// Percent schedule: 5% runtime, install phases ramped across 25–80%,
/// 92% verification, 100% + `Ready`.
async fn init_engine(
    engine: &Arc<dyn ConversionEngine>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) -> bool {
    let progress = |percent: u8, label: &str| {
        emit(
            events,
            EngineEvent::InitProgress {
                percent,
                label: label.to_string(),
            },
        );
    };

    let fail = |detail: String| {
        warn!("engine host: bootstrap failed: {detail}");
        emit(
            events,
            EngineEvent::Error {
                id: None,
                file_name: None,
                error: format!("Engine init failed: {detail}"),
            },
        );
    };

    info!("engine host: bootstrap starting");
    progress(5, "Loading runtime…");
    if let Err(e) = engine.load_runtime().await {
        fail(e.to_string());
        return false;
    }

    let plan = engine.install_plan();
    let steps = plan.len().max(1) as u32;
    for (i, phase) in plan.iter().enumerate() {
        // Ramp install phases across 25–80%.
        let percent = 25 + ((80 - 25) * i as u32 / steps) as u8;
        progress(percent, &phase.label);
        debug!(
            "engine host: install phase '{}' ({} packages)",
            phase.label,
            phase.packages.len()
        );
        if let Err(e) = engine.install(phase).await {
            fail(e.to_string());
            return false;
        }
    }

    progress(92, "Verifying engine…");
    if let Err(e) = engine.verify().await {
        fail(e.to_string());
        return false;
    }

    progress(100, "Ready");
    emit(events, EngineEvent::Ready);
    info!("engine host: ready");
    true
}

/// Run one conversion: scratch write, engine call, best-effort cleanup.
async fn convert_file(
    engine: &Arc<dyn ConversionEngine>,
    events: &mpsc::UnboundedSender<EngineEvent>,
    scratch_dir: PathBuf,
    id: JobId,
    file_name: String,
    file_bytes: Vec<u8>,
) {
    let progress = |percent: u8, label: &str| {
        emit(
            events,
            EngineEvent::ConvertProgress {
                id,
                percent,
                label: label.to_string(),
            },
        );
    };

    progress(10, "Preparing…");

    // A generated-safe scratch name: the original file name may contain
    // anything. Only the (sanitised) extension survives, since the engine
    // may use it for format detection.
    let scratch_path = scratch_dir.join(format!("_doctomd_{id}{}", safe_extension(&file_name)));

    if let Err(e) = tokio::fs::write(&scratch_path, &file_bytes).await {
        emit(
            events,
            EngineEvent::Error {
                id: Some(id),
                file_name: Some(file_name),
                error: format!("Scratch file error: {e}"),
            },
        );
        return;
    }
    drop(file_bytes);

    progress(30, "Converting…");
    let outcome = engine.convert(&scratch_path).await;

    // Cleanup regardless of outcome.
    if let Err(e) = tokio::fs::remove_file(&scratch_path).await {
        debug!("engine host: scratch cleanup failed for {}: {e}", scratch_path.display());
    }

    match outcome {
        Ok(markdown) => {
            progress(100, "Done");
            emit(
                events,
                EngineEvent::Result {
                    id,
                    file_name,
                    markdown,
                },
            );
        }
        Err(e) => {
            emit(
                events,
                EngineEvent::Error {
                    id: Some(id),
                    file_name: Some(file_name),
                    error: e.to_string(),
                },
            );
        }
    }
}

/// Sanitised extension (with leading dot) of `name`, or empty when absent.
///
/// Keeps only ASCII alphanumerics and caps the length so the scratch name
/// stays filesystem-safe no matter what the browser-side name contained.
fn safe_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => {
            let cleaned: String = ext
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(16)
                .collect::<String>()
                .to_ascii_lowercase();
            if cleaned.is_empty() {
                String::new()
            } else {
                format!(".{cleaned}")
            }
        }
        _ => String::new(),
    }
}

fn emit(events: &mpsc::UnboundedSender<EngineEvent>, event: EngineEvent) {
    if events.send(event).is_err() {
        debug!("engine host: event receiver dropped");
    }
}
