//! End-to-end tests for the queue/host/controller pipeline.
//!
//! These run against a deterministic fake engine — no Python, no
//! subprocesses, no provisioning — so they exercise the full message
//! protocol (bootstrap progress, per-job progress, results, errors, stale
//! events) at unit-test speed.

use async_trait::async_trait;
use doctomd::{
    Controller, ConverterConfig, ConversionEngine, EngineError, EngineEvent, EngineHandle,
    EngineState, InstallPhase, JobStatus, Renderer, SubmittedFile, ViewModel,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ── Fake engine ──────────────────────────────────────────────────────────────

/// Deterministic engine: echoes file content under a heading, raises when the
/// content contains `RAISE`, and records how many conversions ever ran
/// concurrently.
struct FakeEngine {
    fail_bootstrap: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    conversions: AtomicUsize,
}

impl FakeEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_bootstrap: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            conversions: AtomicUsize::new(0),
        })
    }

    fn failing_bootstrap() -> Arc<Self> {
        Arc::new(Self {
            fail_bootstrap: true,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            conversions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    async fn load_runtime(&self) -> Result<(), EngineError> {
        if self.fail_bootstrap {
            return Err(EngineError::RuntimeUnavailable(
                "runtime download failed".into(),
            ));
        }
        Ok(())
    }

    fn install_plan(&self) -> Vec<InstallPhase> {
        vec![
            InstallPhase::new("Installing core packages…", &["core"]),
            InstallPhase::new("Installing format plugins…", &["plugins"]),
            InstallPhase::new("Installing converter…", &["converter"]),
        ]
    }

    async fn install(&self, _phase: &InstallPhase) -> Result<(), EngineError> {
        Ok(())
    }

    async fn verify(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn convert(&self, input: &Path) -> Result<String, EngineError> {
        let entered = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(entered, Ordering::SeqCst);
        self.conversions.fetch_add(1, Ordering::SeqCst);

        // Yield so an (incorrectly) overlapping conversion would be observed.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let content = std::fs::read_to_string(input)
            .map_err(|e| EngineError::Scratch(e.to_string()))?;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if content.contains("RAISE") {
            return Err(EngineError::ConversionFailed {
                detail: format!(
                    "Traceback (most recent call last):\n  ...\nValueError: cannot parse {}",
                    input.display()
                ),
            });
        }
        Ok(format!("# Converted\n\n{content}\n"))
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Records every frame; used to check invariants over the whole run.
#[derive(Clone, Default)]
struct RecordingRenderer {
    frames: Arc<Mutex<Vec<ViewModel>>>,
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, view: &ViewModel) {
        self.frames.lock().unwrap().push(view.clone());
    }
}

struct Harness {
    controller: Controller,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    frames: Arc<Mutex<Vec<ViewModel>>>,
}

fn harness_with(engine: Arc<dyn ConversionEngine>, config: ConverterConfig) -> Harness {
    let mut host = EngineHandle::spawn(engine);
    let events = host.take_events();
    let renderer = RecordingRenderer::default();
    let frames = renderer.frames.clone();
    let controller = Controller::new(config, host.requester(), Box::new(renderer));
    host.init().expect("host accepts init");
    Harness {
        controller,
        events,
        frames,
    }
}

fn harness(engine: Arc<dyn ConversionEngine>) -> Harness {
    harness_with(engine, ConverterConfig::default())
}

impl Harness {
    /// Pump events until the engine failed or every job settled.
    async fn run_to_completion(&mut self) {
        while let Some(event) = self.events.recv().await {
            self.controller.handle_event(event);
            match self.controller.engine_state() {
                EngineState::Error { .. } => break,
                EngineState::Ready if self.controller.all_settled() => break,
                _ => {}
            }
        }
    }
}

fn file(name: &str, content: &str) -> SubmittedFile {
    SubmittedFile::new(name, content.as_bytes().to_vec())
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_pdf_produces_result_and_md_name() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![file("report.pdf", "quarterly numbers")]);
    h.run_to_completion().await;

    let jobs = h.controller.queue().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Done);
    let markdown = jobs[0].markdown.as_deref().unwrap();
    assert!(markdown.contains("quarterly numbers"));
    assert!(!markdown.trim().is_empty());

    assert_eq!(doctomd::markdown_file_name(&jobs[0].name), "report.md");
}

#[tokio::test]
async fn broken_file_errors_and_queue_continues() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![
        file("broken.docx", "RAISE on this one"),
        file("fine.txt", "all good"),
    ]);
    h.run_to_completion().await;

    let jobs = h.controller.queue().jobs();
    assert_eq!(jobs[0].status, JobStatus::Error);
    let diagnostic = jobs[0].error.as_deref().unwrap();
    assert!(diagnostic.contains("Traceback"), "got: {diagnostic}");
    assert!(diagnostic.contains("ValueError"));

    assert_eq!(jobs[1].status, JobStatus::Done);
}

#[tokio::test]
async fn two_files_convert_single_flight_and_gate_download_all() {
    let engine = FakeEngine::new();
    let mut h = harness(engine.clone());
    h.controller
        .submit(vec![file("a.pdf", "alpha"), file("b.xlsx", "beta")]);
    h.run_to_completion().await;

    assert_eq!(engine.conversions.load(Ordering::SeqCst), 2);
    assert_eq!(
        engine.max_in_flight.load(Ordering::SeqCst),
        1,
        "at most one conversion may ever be in flight"
    );

    let jobs = h.controller.queue().jobs();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Done));

    // "Download all" appeared only once both jobs were done: frames with one
    // done job must not offer it, the final frame must.
    let frames = h.frames.lock().unwrap();
    for frame in frames.iter() {
        let done = frame
            .files
            .iter()
            .filter(|f| f.status_label == "Done")
            .count();
        assert_eq!(frame.download_all_visible, done >= 2);
    }
    assert!(frames.last().unwrap().download_all_visible);
}

#[tokio::test]
async fn at_most_one_job_converting_in_every_frame() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![
        file("a.pdf", "1"),
        file("b.pdf", "2"),
        file("c.pdf", "3"),
    ]);
    h.run_to_completion().await;

    for frame in h.frames.lock().unwrap().iter() {
        let converting = frame.files.iter().filter(|f| f.progress.is_some()).count();
        assert!(converting <= 1, "frame shows {converting} converting jobs");
    }
}

#[tokio::test]
async fn jobs_complete_in_submission_order() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![
        file("first.pdf", "1"),
        file("second.csv", "2"),
        file("third.md", "3"),
    ]);

    // Track the order in which jobs become terminal.
    let mut settle_order = Vec::new();
    while let Some(event) = h.events.recv().await {
        if let EngineEvent::Result { ref file_name, .. } = event {
            settle_order.push(file_name.clone());
        }
        h.controller.handle_event(event);
        if h.controller.engine_state().is_ready() && h.controller.all_settled() {
            break;
        }
    }

    assert_eq!(settle_order, vec!["first.pdf", "second.csv", "third.md"]);
}

#[tokio::test]
async fn exe_files_are_dropped_with_notice() {
    let mut h = harness(FakeEngine::new());
    let outcome = h.controller.submit(vec![file("setup.exe", "MZ")]);
    assert!(outcome.nothing_accepted());
    assert!(h.controller.queue().is_empty());
    assert_eq!(
        h.controller.view().notice.as_deref(),
        Some("No supported files found")
    );

    // Mixed submission: the .exe is silently dropped, the rest convert.
    let outcome = h
        .controller
        .submit(vec![file("tool.exe", "MZ"), file("notes.txt", "text")]);
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 1);
    assert!(h.controller.view().notice.is_none());

    h.run_to_completion().await;
    assert_eq!(h.controller.queue().done_count(), 1);
}

#[tokio::test]
async fn clear_mid_flight_never_resurrects_stale_jobs() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![file("stale.pdf", "old content")]);

    // Pump until the stale job is actually in flight.
    loop {
        let event = h.events.recv().await.unwrap();
        let started = matches!(event, EngineEvent::ConvertProgress { .. });
        h.controller.handle_event(event);
        if started {
            break;
        }
    }

    h.controller.clear_queue();
    h.controller.submit(vec![file("fresh.csv", "new content")]);
    h.run_to_completion().await;

    // Only the fresh job exists; the stale result was dropped on arrival.
    let jobs = h.controller.queue().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "fresh.csv");
    assert_eq!(jobs[0].status, JobStatus::Done);

    // No frame after the clear ever showed the stale job again.
    let frames = h.frames.lock().unwrap();
    let cleared_at = frames
        .iter()
        .position(|f| f.files.is_empty())
        .expect("clear produced an empty frame");
    for frame in &frames[cleared_at..] {
        assert!(frame.files.iter().all(|f| f.name != "stale.pdf"));
    }

    // History only records conversions whose job was still tracked.
    let history = h.controller.history().get_all();
    assert!(history.iter().all(|e| e.file_name != "stale.pdf"));
}

#[tokio::test]
async fn bootstrap_failure_halts_all_dispatch() {
    let engine = FakeEngine::failing_bootstrap();
    let mut h = harness(engine.clone());
    h.controller.submit(vec![file("a.pdf", "content")]);
    h.run_to_completion().await;

    match h.controller.engine_state() {
        EngineState::Error { message } => {
            assert!(message.contains("Engine init failed"));
            assert!(message.contains("runtime download failed"));
        }
        other => panic!("expected error state, got {other:?}"),
    }
    assert_eq!(engine.conversions.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.controller.queue().jobs()[0].status,
        JobStatus::Pending,
        "jobs stay pending once the engine is dead"
    );
}

#[tokio::test]
async fn init_progress_reaches_view_with_monotonic_percent() {
    let mut h = harness(FakeEngine::new());
    h.controller.submit(vec![file("a.pdf", "x")]);
    h.run_to_completion().await;

    let frames = h.frames.lock().unwrap();
    let labels: Vec<String> = frames
        .iter()
        .filter(|f| f.engine.state == "loading")
        .map(|f| f.engine.text.clone())
        .collect();
    assert!(
        labels.iter().any(|l| l.contains("Installing")),
        "install phases should surface in the view: {labels:?}"
    );
    assert_eq!(frames.last().unwrap().engine.text, "Ready");
}

#[tokio::test]
async fn results_persist_to_history_with_truncation() {
    let config = ConverterConfig::builder()
        .max_entry_bytes(1024)
        .build()
        .unwrap();
    let mut h = harness_with(FakeEngine::new(), config);

    let big = "word ".repeat(1000);
    h.controller.submit(vec![file("big.txt", &big)]);
    h.run_to_completion().await;

    let entries = h.controller.history().get_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, "big.txt");
    assert!(entries[0].markdown.contains("[Truncated"));
    assert!(entries[0].char_count > 1024);

    // The job itself keeps the full result; only history is capped.
    let job_md = h.controller.queue().jobs()[0].markdown.as_deref().unwrap();
    assert!(job_md.len() > 4096);
}

#[tokio::test]
async fn zip_export_bundles_completed_jobs() {
    let mut h = harness(FakeEngine::new());
    h.controller
        .submit(vec![file("a.pdf", "alpha"), file("b.xlsx", "beta")]);
    h.run_to_completion().await;

    let completed = h.controller.queue().completed();
    assert_eq!(completed.len(), 2);
    let bytes = doctomd::zip_completed(&completed).unwrap();

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.md", "b.md"]);
}
