//! The message protocol between the Job Queue Controller and the Engine Host.
//!
//! All cross-context communication happens through these two enums — one
//! request channel into the host, one event channel out of it. Messages are
//! the only synchronisation primitive: the host never touches Job state and
//! the controller never touches the engine, so there is nothing to lock.
//!
//! ## Wire table
//!
//! | Direction | Variant | Meaning |
//! |---|---|---|
//! | →Host | [`EngineRequest::Init`] | begin engine bootstrap |
//! | Host→ | [`EngineEvent::InitProgress`] | bootstrap progress (percent, label) |
//! | Host→ | [`EngineEvent::Ready`] | engine usable |
//! | Host→ | [`EngineEvent::Error`] with `id: None` | fatal bootstrap failure |
//! | →Host | [`EngineRequest::Convert`] | submit one job |
//! | Host→ | [`EngineEvent::ConvertProgress`] | per-job progress |
//! | Host→ | [`EngineEvent::Result`] | per-job success |
//! | Host→ | [`EngineEvent::Error`] with `id: Some(..)` | per-job failure |
//!
//! The enums derive `Serialize`/`Deserialize` with an adjacent `type` tag so
//! the protocol can also cross a process boundary unchanged (e.g. a future
//! out-of-process host); in-process transport is plain `mpsc`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier, unique for the process lifetime.
///
/// Generated at submission time; never reused, so a cleared queue can never
/// resurrect an old id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Simple (hyphen-free) form: the id doubles as a scratch-file name
        // component and must stay filesystem-safe.
        write!(f, "{}", self.0.simple())
    }
}

/// Requests sent from the controller into the engine host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineRequest {
    /// Begin engine bootstrap. Sent exactly once per host.
    Init,
    /// Convert one file. The caller guarantees single-flight: no second
    /// `Convert` is sent until the previous one produced a terminal event.
    Convert {
        id: JobId,
        file_name: String,
        file_bytes: Vec<u8>,
    },
}

/// Events emitted by the engine host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// Bootstrap progress. Percentages are monotonically increasing across
    /// the init sequence.
    InitProgress { percent: u8, label: String },
    /// Bootstrap finished; the host accepts `Convert` requests.
    Ready,
    /// Per-job progress. At least "Preparing" and "Converting" are emitted
    /// before the terminal 100% notification.
    ConvertProgress { id: JobId, percent: u8, label: String },
    /// Per-job success.
    Result {
        id: JobId,
        file_name: String,
        markdown: String,
    },
    /// Failure. `id: Some(..)` is a per-job failure (the host stays ready);
    /// `id: None` is a fatal engine-level failure (no further dispatch).
    Error {
        id: Option<JobId>,
        file_name: Option<String>,
        error: String,
    },
}

/// Process-wide engine lifecycle, driven by host events.
///
/// Single instance, owned by the controller; gates dispatch. There is no
/// transition out of `Error` — a failed bootstrap requires a new host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No `Init` sent yet.
    #[default]
    Uninitialized,
    /// Bootstrap in progress; carries the latest progress notification.
    Loading { percent: u8, label: String },
    /// Accepting conversions.
    Ready,
    /// Fatal bootstrap or engine-level failure.
    Error { message: String },
}

impl EngineState {
    /// Whether jobs may be dispatched.
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_and_filesystem_safe() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        let s = a.to_string();
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()), "got: {s}");
    }

    #[test]
    fn events_roundtrip_through_json() {
        let ev = EngineEvent::ConvertProgress {
            id: JobId::new(),
            percent: 30,
            label: "Converting…".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"convert-progress\""), "got: {json}");
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        match back {
            EngineEvent::ConvertProgress { percent, .. } => assert_eq!(percent, 30),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn fatal_error_has_no_id() {
        let ev = EngineEvent::Error {
            id: None,
            file_name: None,
            error: "Engine init failed: boom".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        match back {
            EngineEvent::Error { id, .. } => assert!(id.is_none()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn engine_state_gates_dispatch() {
        assert!(!EngineState::Uninitialized.is_ready());
        assert!(!EngineState::Loading { percent: 50, label: "x".into() }.is_ready());
        assert!(EngineState::Ready.is_ready());
        assert!(!EngineState::Error { message: "x".into() }.is_ready());
    }
}
