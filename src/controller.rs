//! The job queue controller: sole owner of Job state, sole consumer of
//! engine events.
//!
//! The controller glues the pure [`JobQueue`] to the engine host's channels
//! and the history store. All mutation happens on the caller's context —
//! the embedding application (or the CLI's event loop) feeds events in one
//! at a time, so there is no locking anywhere in the core.
//!
//! ## Drain discipline
//!
//! Whenever the engine is ready and no job is converting, the next pending
//! id is popped in FIFO order and dispatched. Terminal events (`result`,
//! per-job `error`) trigger the next drain, so exactly one conversion is in
//! flight at any instant — the engine host's single-flight contract is
//! enforced here, not hoped for there.
//!
//! ## Stale events
//!
//! `clear_queue` discards bookkeeping without signalling the host; there is
//! no cancellation. When the in-flight conversion eventually reports, its
//! job id is no longer tracked and the event is dropped with a debug log.

use crate::config::ConverterConfig;
use crate::history::HistoryStore;
use crate::protocol::{EngineEvent, EngineRequest, EngineState};
use crate::queue::{JobQueue, SubmittedFile, Submission};
use crate::view::{view_model, ViewModel};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A rendering surface fed by the controller on every state transition.
///
/// Implementations receive the full [`ViewModel`] each time; diffing (if
/// any) is their business.
pub trait Renderer: Send {
    fn render(&mut self, view: &ViewModel);
}

/// Discards every frame. Useful for headless embedding and tests that only
/// assert on controller state.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _view: &ViewModel) {}
}

/// Owns the queue, the engine state, and the history store.
pub struct Controller {
    config: ConverterConfig,
    queue: JobQueue,
    history: HistoryStore,
    engine_state: EngineState,
    requests: mpsc::UnboundedSender<EngineRequest>,
    renderer: Box<dyn Renderer>,
    notice: Option<String>,
}

impl Controller {
    /// Build a controller around the request side of an engine host.
    ///
    /// The caller keeps the event receiver and pumps it into
    /// [`Controller::handle_event`].
    pub fn new(
        config: ConverterConfig,
        requests: mpsc::UnboundedSender<EngineRequest>,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        let history = HistoryStore::open(&config);
        Self {
            config,
            queue: JobQueue::new(),
            history,
            engine_state: EngineState::Uninitialized,
            requests,
            renderer,
            notice: None,
        }
    }

    pub fn engine_state(&self) -> &EngineState {
        &self.engine_state
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    /// All submitted jobs have settled (an empty queue counts as settled).
    pub fn all_settled(&self) -> bool {
        self.queue.all_settled()
    }

    /// Submit files: filter, enqueue, surface a notice when nothing
    /// qualified, re-render, and drain.
    pub fn submit(&mut self, files: Vec<SubmittedFile>) -> Submission {
        let outcome = self.queue.submit(files, &self.config);
        self.notice = outcome
            .nothing_accepted()
            .then(|| "No supported files found".to_string());
        if outcome.accepted > 0 {
            info!(
                "submitted {} file(s) ({} rejected)",
                outcome.accepted, outcome.rejected
            );
        }
        self.render();
        self.drain();
        outcome
    }

    /// Discard all jobs and pending dispatches. Does not interrupt an
    /// in-flight conversion; its eventual event will be stale and dropped.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.notice = None;
        self.render();
    }

    /// Apply one engine event.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::InitProgress { percent, label } => {
                self.engine_state = EngineState::Loading { percent, label };
                self.render();
            }

            EngineEvent::Ready => {
                self.engine_state = EngineState::Ready;
                self.render();
                self.drain();
            }

            EngineEvent::ConvertProgress { id, percent, .. } => {
                if self.queue.apply_progress(id, percent) {
                    self.render();
                } else {
                    debug!("dropping stale progress for {id}");
                }
            }

            EngineEvent::Result {
                id,
                file_name,
                markdown,
            } => {
                if self.queue.complete(id, markdown.clone()) {
                    self.history.add(&file_name, &markdown);
                    self.render();
                    self.drain();
                } else {
                    debug!("dropping stale result for {id}");
                }
            }

            EngineEvent::Error {
                id: Some(id),
                error,
                ..
            } => {
                if self.queue.fail(id, error) {
                    self.render();
                    self.drain();
                } else {
                    debug!("dropping stale error for {id}");
                }
            }

            EngineEvent::Error {
                id: None, error, ..
            } => {
                // Fatal engine-level failure: halt all future dispatch.
                warn!("engine failed: {error}");
                self.engine_state = EngineState::Error { message: error };
                self.render();
            }
        }
    }

    /// Current render description (also what the renderer last received).
    pub fn view(&self) -> ViewModel {
        view_model(
            &self.engine_state,
            self.queue.jobs(),
            &self.history.get_all(),
            self.notice.as_deref(),
            Utc::now(),
        )
    }

    fn render(&mut self) {
        let view = self.view();
        self.renderer.render(&view);
    }

    fn drain(&mut self) {
        if !self.engine_state.is_ready() {
            return;
        }
        let Some(dispatch) = self.queue.next_dispatch() else {
            return;
        };

        debug!("dispatching '{}' ({})", dispatch.file_name, dispatch.id);
        let request = EngineRequest::Convert {
            id: dispatch.id,
            file_name: dispatch.file_name,
            file_bytes: dispatch.file_bytes,
        };
        if self.requests.send(request).is_err() {
            // Host gone: fatal, equivalent to an engine-level error.
            warn!("engine host is gone; failing in-flight job");
            self.queue
                .fail(dispatch.id, "Engine host is gone".to_string());
            self.engine_state = EngineState::Error {
                message: "Engine host is gone".to_string(),
            };
        }
        self.render();
    }
}
