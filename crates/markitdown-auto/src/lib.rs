//! # markitdown-auto
//!
//! Auto-provision the [MarkItDown](https://github.com/microsoft/markitdown)
//! conversion engine into a cached Python virtualenv at runtime, so that users
//! of `doctomd` no longer need to manually install Python packages or put a
//! `markitdown` executable on their `PATH`.
//!
//! ## How it works
//!
//! On first call to [`ensure_engine`]:
//!
//! 1. Checks `~/.cache/doctomd/markitdown-{VERSION}/` for a provisioned venv.
//! 2. If absent, locates a host `python3` and creates a fresh virtualenv.
//! 3. Installs the engine's dependencies in three staged `pip` runs
//!    ([`CORE_PACKAGES`], [`FORMAT_PACKAGES`], then `markitdown` itself with
//!    `--no-deps` — the dependencies were already handled).
//! 4. Verifies the install by importing and instantiating the converter.
//!
//! Subsequent calls skip provisioning entirely — the venv is already cached.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use markitdown_auto::ensure_engine;
//!
//! let exe = ensure_engine(Some(&|phase, detail| {
//!     eprintln!("[{phase}] {detail}");
//! })).expect("provisioning failed");
//! // run `exe <file>` to convert
//! ```
//!
//! ## Environment variable overrides
//!
//! - `MARKITDOWN_BIN` — path to an existing `markitdown` executable; skips
//!   provisioning entirely.
//! - `DOCTOMD_ENGINE_DIR` — override the default cache directory.
//! - `DOCTOMD_PYTHON` — host Python interpreter used to create the venv.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// The markitdown release installed into the venv.
pub const MARKITDOWN_VERSION: &str = "0.1.4";

/// Pure-Python dependencies of markitdown, installed before the engine itself.
pub const CORE_PACKAGES: &[&str] = &[
    "beautifulsoup4",
    "charset-normalizer",
    "defusedxml",
    "markdownify",
    "requests",
];

/// Optional format-specific converters (DOCX, PDF, PPTX, XLSX, legacy Office).
pub const FORMAT_PACKAGES: &[&str] = &[
    "mammoth",
    "pdfminer.six",
    "python-pptx",
    "openpyxl",
    "olefile",
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by markitdown-auto operations.
#[derive(Error, Debug)]
pub enum MarkitdownAutoError {
    /// No usable Python interpreter was found on the host.
    #[error(
        "No Python interpreter found.\n\
         markitdown-auto needs python3 (>= 3.10) to provision the engine.\n\
         Install Python or set DOCTOMD_PYTHON=/path/to/python3."
    )]
    PythonNotFound,

    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// `python -m venv` failed.
    #[error("Failed to create virtualenv in '{dir}': {detail}")]
    VenvFailed { dir: PathBuf, detail: String },

    /// A staged `pip install` run failed.
    #[error("Package install failed ({packages}): {detail}")]
    InstallFailed { packages: String, detail: String },

    /// The post-install import check failed.
    #[error(
        "Engine verification failed: {0}\n\
         The venv may be corrupt — delete the cache directory and retry."
    )]
    VerifyFailed(String),

    /// Spawning a subprocess failed at the OS level.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the per-version cache directory for the engine virtualenv.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/doctomd/markitdown-{VERSION}/`
/// - **Linux**: `~/.cache/doctomd/markitdown-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\doctomd\markitdown-{VERSION}\`
///
/// Override by setting `DOCTOMD_ENGINE_DIR`.
pub fn engine_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("DOCTOMD_ENGINE_DIR") {
        return PathBuf::from(override_dir).join(format!("markitdown-{MARKITDOWN_VERSION}"));
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("doctomd")
        .join(format!("markitdown-{MARKITDOWN_VERSION}"))
}

/// The venv root inside the cache directory.
pub fn venv_dir() -> PathBuf {
    engine_cache_dir().join("venv")
}

/// Path of the `markitdown` executable inside a venv.
pub fn markitdown_bin(venv: &Path) -> PathBuf {
    venv.join(bin_subdir()).join(exe_name("markitdown"))
}

/// Path of the Python interpreter inside a venv.
pub fn venv_python(venv: &Path) -> PathBuf {
    venv.join(bin_subdir()).join(exe_name("python"))
}

fn bin_subdir() -> &'static str {
    if cfg!(windows) {
        "Scripts"
    } else {
        "bin"
    }
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_BIN: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if the engine is already provisioned on disk (no package
/// installs needed on the next call to [`ensure_engine`]).
///
/// Also returns `true` when `MARKITDOWN_BIN` points to an existing file.
pub fn is_engine_cached() -> bool {
    if let Ok(p) = std::env::var("MARKITDOWN_BIN") {
        return PathBuf::from(p).exists();
    }
    markitdown_bin(&venv_dir()).exists()
}

/// Returns the on-disk path to the `markitdown` executable, or `None` if the
/// engine has not been provisioned yet.
pub fn cached_markitdown_bin() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MARKITDOWN_BIN") {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    let p = markitdown_bin(&venv_dir());
    if p.exists() {
        return Some(p);
    }
    None
}

/// Locate a host Python interpreter for venv creation.
///
/// Resolution order: `DOCTOMD_PYTHON`, then `python3`, then `python` on PATH.
pub fn locate_python() -> Result<PathBuf, MarkitdownAutoError> {
    if let Ok(p) = std::env::var("DOCTOMD_PYTHON") {
        let pb = PathBuf::from(&p);
        if probe_python(&pb) {
            return Ok(pb);
        }
        eprintln!("markitdown-auto: DOCTOMD_PYTHON '{p}' is not runnable; probing PATH …");
    }

    for candidate in ["python3", "python"] {
        let pb = PathBuf::from(candidate);
        if probe_python(&pb) {
            return Ok(pb);
        }
    }

    Err(MarkitdownAutoError::PythonNotFound)
}

/// Create the cached virtualenv (idempotent: an existing venv is reused).
pub fn create_venv(python: &Path) -> Result<PathBuf, MarkitdownAutoError> {
    let venv = venv_dir();
    if venv_python(&venv).exists() {
        return Ok(venv);
    }

    std::fs::create_dir_all(engine_cache_dir()).map_err(MarkitdownAutoError::CacheDir)?;

    let output = Command::new(python)
        .arg("-m")
        .arg("venv")
        .arg(&venv)
        .output()
        .map_err(|e| MarkitdownAutoError::Spawn {
            program: python.display().to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(MarkitdownAutoError::VenvFailed {
            dir: venv,
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(venv)
}

/// Run one staged `pip install` inside the venv.
///
/// `no_deps` maps to `--no-deps`, used for the final markitdown install whose
/// dependency closure was already handled by the earlier stages.
pub fn install_packages(
    venv: &Path,
    packages: &[&str],
    no_deps: bool,
) -> Result<(), MarkitdownAutoError> {
    let python = venv_python(venv);
    let mut cmd = Command::new(&python);
    cmd.arg("-m").arg("pip").arg("install").arg("--quiet");
    if no_deps {
        cmd.arg("--no-deps");
    }
    cmd.args(packages);

    let output = cmd.output().map_err(|e| MarkitdownAutoError::Spawn {
        program: python.display().to_string(),
        source: e,
    })?;

    if !output.status.success() {
        return Err(MarkitdownAutoError::InstallFailed {
            packages: packages.join(", "),
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}

/// Verify the provisioned engine by importing and instantiating the converter.
pub fn verify_import(venv: &Path) -> Result<(), MarkitdownAutoError> {
    let python = venv_python(venv);
    let output = Command::new(&python)
        .arg("-c")
        .arg("from markitdown import MarkItDown; MarkItDown()")
        .output()
        .map_err(|e| MarkitdownAutoError::Spawn {
            program: python.display().to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(MarkitdownAutoError::VerifyFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(())
}

/// Ensures the engine is provisioned and returns the `markitdown` executable
/// path.
///
/// - If `MARKITDOWN_BIN` is set (and the file exists), that path is used and
///   provisioning is skipped.
/// - Otherwise, checks the cache for an existing venv with a working
///   `markitdown` executable.
/// - If absent, runs the full provisioning sequence: venv creation plus the
///   three staged installs, then verification.
///
/// `on_progress` receives `(phase_label, detail)` before each step. Pass
/// `None` to suppress progress callbacks.
///
/// # Thread safety
///
/// Safe to call from multiple threads simultaneously; provisioning happens
/// only once per process lifetime.
pub fn ensure_engine(
    on_progress: Option<&dyn Fn(&str, &str)>,
) -> Result<PathBuf, MarkitdownAutoError> {
    // Fast path: already resolved in this process.
    if let Some(bin) = RESOLVED_BIN.get() {
        return Ok(bin.clone());
    }

    let report = |phase: &str, detail: &str| {
        if let Some(cb) = on_progress {
            cb(phase, detail);
        }
    };

    if let Some(bin) = cached_markitdown_bin() {
        let _ = RESOLVED_BIN.set(bin.clone());
        return Ok(bin);
    }

    report("runtime", "locating Python interpreter");
    let python = locate_python()?;

    report("runtime", "creating virtualenv");
    let venv = create_venv(&python)?;

    report("install", "core packages");
    install_packages(&venv, CORE_PACKAGES, false)?;

    report("install", "format plugins");
    install_packages(&venv, FORMAT_PACKAGES, false)?;

    report("install", "markitdown");
    let pinned = format!("markitdown=={MARKITDOWN_VERSION}");
    install_packages(&venv, &[pinned.as_str()], true)?;

    report("verify", "importing converter");
    verify_import(&venv)?;

    let bin = markitdown_bin(&venv);
    let _ = RESOLVED_BIN.set(bin.clone());

    Ok(bin)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Returns `true` if `python --version` runs successfully.
fn probe_python(python: &Path) -> bool {
    Command::new(python)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
