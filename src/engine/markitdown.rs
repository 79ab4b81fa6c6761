//! The production engine: MarkItDown in a provisioned virtualenv.
//!
//! ## Why spawn_blocking?
//!
//! Provisioning runs `python -m venv` and staged `pip install` subprocesses
//! through the blocking `markitdown-auto` crate. `tokio::task::spawn_blocking`
//! keeps those multi-second (first run: multi-minute) waits off the async
//! worker threads. Conversion itself uses `tokio::process` and awaits the
//! child normally.
//!
//! First bootstrap downloads and installs the full dependency closure into
//! `~/.cache/doctomd/markitdown-{VERSION}/`; every later bootstrap finds the
//! cached venv and reports an empty install plan, so the host's progress
//! sequence collapses to runtime-check → verify → ready in under a second.

use crate::engine::{ConversionEngine, InstallPhase};
use crate::error::EngineError;
use async_trait::async_trait;
use markitdown_auto::{MARKITDOWN_VERSION, CORE_PACKAGES, FORMAT_PACKAGES};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// [`ConversionEngine`] backed by the `markitdown` executable.
#[derive(Default)]
pub struct MarkitdownEngine {
    /// Venv root, set by `load_runtime` when provisioning is needed.
    venv: OnceLock<PathBuf>,
    /// Converter executable, set once bootstrap reaches it.
    bin: OnceLock<PathBuf>,
}

impl MarkitdownEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolved_bin(&self) -> Result<PathBuf, EngineError> {
        self.bin.get().cloned().ok_or_else(|| {
            EngineError::RuntimeUnavailable("engine bootstrap has not completed".into())
        })
    }
}

#[async_trait]
impl ConversionEngine for MarkitdownEngine {
    async fn load_runtime(&self) -> Result<(), EngineError> {
        // Cached or MARKITDOWN_BIN-overridden installs skip provisioning.
        if let Some(bin) = markitdown_auto::cached_markitdown_bin() {
            info!("markitdown engine already provisioned at {}", bin.display());
            let _ = self.bin.set(bin);
            return Ok(());
        }

        let venv = tokio::task::spawn_blocking(|| {
            let python = markitdown_auto::locate_python()?;
            debug!("provisioning venv with {}", python.display());
            markitdown_auto::create_venv(&python)
        })
        .await
        .map_err(|e| EngineError::RuntimeUnavailable(format!("runtime task panicked: {e}")))?
        .map_err(|e| EngineError::RuntimeUnavailable(e.to_string()))?;

        let _ = self.venv.set(venv);
        Ok(())
    }

    fn install_plan(&self) -> Vec<InstallPhase> {
        if self.bin.get().is_some() {
            // Provisioned install: nothing left to download.
            return Vec::new();
        }

        let pinned = format!("markitdown=={MARKITDOWN_VERSION}");
        vec![
            InstallPhase::new("Installing core packages…", CORE_PACKAGES),
            InstallPhase::new("Installing format plugins…", FORMAT_PACKAGES),
            InstallPhase::new("Installing markitdown…", &[pinned.as_str()]),
        ]
    }

    async fn install(&self, phase: &InstallPhase) -> Result<(), EngineError> {
        let venv = self
            .venv
            .get()
            .cloned()
            .ok_or_else(|| EngineError::RuntimeUnavailable("venv not created".into()))?;
        let label = phase.label.clone();
        let packages = phase.packages.clone();
        // markitdown itself installs without dependency resolution: the
        // earlier phases already pinned its closure.
        let no_deps = packages.iter().any(|p| p.starts_with("markitdown"));

        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = packages.iter().map(String::as_str).collect();
            markitdown_auto::install_packages(&venv, &refs, no_deps)
        })
        .await
        .map_err(|e| EngineError::InstallFailed {
            phase: label.clone(),
            detail: format!("install task panicked: {e}"),
        })?
        .map_err(|e| EngineError::InstallFailed {
            phase: label,
            detail: e.to_string(),
        })
    }

    async fn verify(&self) -> Result<(), EngineError> {
        if let Some(bin) = self.bin.get() {
            // Pre-provisioned path: the executable existing is the check.
            if bin.exists() {
                return Ok(());
            }
            return Err(EngineError::VerificationFailed(format!(
                "converter executable vanished: {}",
                bin.display()
            )));
        }

        let venv = self
            .venv
            .get()
            .cloned()
            .ok_or_else(|| EngineError::RuntimeUnavailable("venv not created".into()))?;

        tokio::task::spawn_blocking({
            let venv = venv.clone();
            move || markitdown_auto::verify_import(&venv)
        })
        .await
        .map_err(|e| EngineError::VerificationFailed(format!("verify task panicked: {e}")))?
        .map_err(|e| EngineError::VerificationFailed(e.to_string()))?;

        let _ = self.bin.set(markitdown_auto::markitdown_bin(&venv));
        Ok(())
    }

    async fn convert(&self, input: &Path) -> Result<String, EngineError> {
        let bin = self.resolved_bin()?;
        debug!("converting {} via {}", input.display(), bin.display());

        let output = tokio::process::Command::new(&bin)
            .arg(input)
            .output()
            .await
            .map_err(|e| EngineError::ConversionFailed {
                detail: format!("failed to run {}: {e}", bin.display()),
            })?;

        if !output.status.success() {
            // The converter prints its traceback to stderr; keep all of it —
            // the last line alone rarely identifies the failing sub-parser.
            return Err(EngineError::ConversionFailed {
                detail: format!(
                    "{} exited with {}:\n{}",
                    bin.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_plans_three_install_phases() {
        let engine = MarkitdownEngine::new();
        let plan = engine.install_plan();
        assert_eq!(plan.len(), 3);
        assert!(plan[2].packages[0].contains(MARKITDOWN_VERSION));
    }

    #[test]
    fn provisioned_engine_plans_nothing() {
        let engine = MarkitdownEngine::new();
        engine.bin.set(PathBuf::from("/usr/bin/markitdown")).unwrap();
        assert!(engine.install_plan().is_empty());
    }

    #[tokio::test]
    async fn convert_without_bootstrap_is_an_error() {
        let engine = MarkitdownEngine::new();
        let err = engine.convert(Path::new("/tmp/x.pdf")).await.unwrap_err();
        assert!(err.to_string().contains("bootstrap"));
    }
}
