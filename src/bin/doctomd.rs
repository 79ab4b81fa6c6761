//! CLI binary for doctomd.
//!
//! A thin shim over the library crate that feeds files into the
//! controller/engine pipeline and writes `.md` (or a ZIP bundle) out.

use anyhow::{Context, Result};
use clap::Parser;
use doctomd::{
    export, render_html, Controller, ConverterConfig, EngineHandle, EngineState, JobStatus,
    MarkitdownEngine, Renderer, SubmittedFile, ViewModel,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI renderer ─────────────────────────────────────────────────────────────

/// Terminal renderer: one spinner tracking engine/init state, plus a printed
/// ✓/✗ line the first time each job reaches a terminal state.
struct CliRenderer {
    bar: ProgressBar,
    printed: HashSet<doctomd::JobId>,
    last_notice: Option<String>,
}

impl CliRenderer {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Engine");
        bar.set_message("Starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Self {
            bar,
            printed: HashSet::new(),
            last_notice: None,
        }
    }
}

impl Drop for CliRenderer {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

impl Renderer for CliRenderer {
    fn render(&mut self, view: &ViewModel) {
        // Engine line: loading labels until ready, then per-file progress.
        match view.engine.state {
            "loading" => {
                self.bar.set_prefix("Engine");
                self.bar.set_message(view.engine.text.clone());
            }
            "ready" => {
                let converting = view
                    .files
                    .iter()
                    .find(|f| f.progress.is_some())
                    .map(|f| format!("{}  {}", f.name, f.status_label));
                self.bar.set_prefix("Converting");
                self.bar
                    .set_message(converting.unwrap_or_else(|| "idle".to_string()));
            }
            _ => {}
        }

        match &view.notice {
            Some(notice) if self.last_notice.as_deref() != Some(notice) => {
                self.bar.println(format!("{} {}", cyan("⚠"), notice));
                self.last_notice = Some(notice.clone());
            }
            Some(_) => {}
            None => self.last_notice = None,
        }

        // Print each job once, when it settles.
        for row in &view.files {
            let terminal = row.status_label == "Done" || row.status_label == "Error";
            if !terminal || !self.printed.insert(row.id) {
                continue;
            }
            match row.error_line.as_deref() {
                None => self.bar.println(format!(
                    "  {} {:<40} {}",
                    green("✓"),
                    row.name,
                    dim(&row.size_label),
                )),
                Some(line) => self.bar.println(format!(
                    "  {} {:<40} {}",
                    red("✗"),
                    row.name,
                    red(line),
                )),
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one file (report.md lands in the current directory)
  doctomd report.pdf

  # Convert a batch into a directory
  doctomd *.docx *.xlsx -o converted/

  # Bundle everything into one archive
  doctomd slides.pptx notes.docx --zip -o out/

  # Also write rendered HTML previews
  doctomd paper.pdf --html

  # Conversion history
  doctomd --list-history
  doctomd --show-history <ID>
  doctomd --clear-history

SUPPORTED FORMATS:
  pdf docx xlsx pptx html htm csv epub txt json xml md rst rtf tsv

ENVIRONMENT VARIABLES:
  MARKITDOWN_BIN       Path to an existing markitdown executable — skips provisioning
  DOCTOMD_ENGINE_DIR   Override the engine cache directory
  DOCTOMD_PYTHON       Python interpreter used to provision the engine
  DOCTOMD_HISTORY      Path of the history JSON document

SETUP:
  On first run the engine is provisioned into ~/.cache/doctomd/ (a Python
  virtualenv with the converter's dependency closure — this can take a few
  minutes). Subsequent startups skip provisioning entirely.
"#;

/// Convert documents to Markdown using a locally provisioned engine.
#[derive(Parser, Debug)]
#[command(
    name = "doctomd",
    version,
    about = "Convert documents (PDF, DOCX, XLSX, PPTX, HTML, EPUB, …) to Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to convert. Unsupported extensions are skipped.
    inputs: Vec<PathBuf>,

    /// Directory for the converted output.
    #[arg(short, long, env = "DOCTOMD_OUTPUT", default_value = ".")]
    output_dir: PathBuf,

    /// Bundle all converted files into a single ZIP archive.
    #[arg(long)]
    zip: bool,

    /// Also write a rendered HTML preview next to each Markdown file.
    #[arg(long)]
    html: bool,

    /// Path of the history JSON document.
    #[arg(long, env = "DOCTOMD_HISTORY")]
    history_file: Option<PathBuf>,

    /// Do not record this run in the conversion history.
    #[arg(long)]
    no_history: bool,

    /// List recent conversions and exit.
    #[arg(long)]
    list_history: bool,

    /// Print one history entry's Markdown and exit.
    #[arg(long, value_name = "ID")]
    show_history: Option<String>,

    /// Delete one history entry and exit.
    #[arg(long, value_name = "ID")]
    delete_history: Option<String>,

    /// Delete all history entries and exit.
    #[arg(long)]
    clear_history: bool,

    /// Override the engine cache directory.
    #[arg(long, env = "DOCTOMD_ENGINE_DIR")]
    engine_dir: Option<PathBuf>,

    /// Python interpreter used to provision the engine.
    #[arg(long, env = "DOCTOMD_PYTHON")]
    python: Option<PathBuf>,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCTOMD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCTOMD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCTOMD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the spinner is active; the
    // spinner provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Engine overrides travel via the env vars markitdown-auto reads.
    if let Some(ref dir) = cli.engine_dir {
        std::env::set_var("DOCTOMD_ENGINE_DIR", dir);
    }
    if let Some(ref python) = cli.python {
        std::env::set_var("DOCTOMD_PYTHON", python);
    }

    // ── Config ───────────────────────────────────────────────────────────
    let mut builder = ConverterConfig::builder();
    if !cli.no_history {
        builder = builder.history_path(cli.history_file.clone().unwrap_or_else(default_history_path));
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── History-only modes ───────────────────────────────────────────────
    if cli.list_history || cli.show_history.is_some() || cli.delete_history.is_some() || cli.clear_history
    {
        return run_history_command(&cli, &config);
    }

    if cli.inputs.is_empty() {
        anyhow::bail!("No input files given (see --help)");
    }

    // ── Read inputs ──────────────────────────────────────────────────────
    let mut files = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(SubmittedFile::new(name, bytes));
    }

    // ── Spawn engine and run the queue ───────────────────────────────────
    let mut host = EngineHandle::spawn(Arc::new(MarkitdownEngine::new()));
    let mut events = host.take_event_stream();

    let renderer: Box<dyn Renderer> = if show_progress {
        Box::new(CliRenderer::new())
    } else {
        Box::new(doctomd::NullRenderer)
    };

    let mut controller = Controller::new(config.clone(), host.requester(), renderer);

    host.init().context("Engine host unavailable")?;
    let submission = controller.submit(files);
    if submission.accepted == 0 {
        anyhow::bail!("No supported files found among the inputs");
    }

    while let Some(event) = events.next().await {
        controller.handle_event(event);
        match controller.engine_state() {
            EngineState::Error { message } => {
                return Err(doctomd::DocToMdError::EngineInitFailed {
                    detail: message.clone(),
                }
                .into());
            }
            EngineState::Ready if controller.all_settled() => break,
            _ => {}
        }
    }
    if !controller.all_settled() {
        anyhow::bail!("Engine host terminated unexpectedly");
    }

    // ── Write outputs ────────────────────────────────────────────────────
    let completed: Vec<(String, String)> = controller
        .queue()
        .completed()
        .into_iter()
        .map(|(n, m)| (n.to_string(), m.to_string()))
        .collect();
    let failed = controller
        .queue()
        .jobs()
        .iter()
        .filter(|j| j.status == JobStatus::Error)
        .count();

    if completed.is_empty() {
        anyhow::bail!("All {failed} conversion(s) failed");
    }

    if cli.zip && completed.len() >= 2 {
        let entries: Vec<(&str, &str)> = completed
            .iter()
            .map(|(n, m)| (n.as_str(), m.as_str()))
            .collect();
        let bytes = export::zip_completed(&entries)?;
        let archive_path = cli.output_dir.join(&config.export_archive_name);
        export::write_output(&archive_path, &bytes).await?;
        if !cli.quiet {
            eprintln!(
                "{} {} files  →  {}",
                green("✔"),
                bold(&completed.len().to_string()),
                bold(&archive_path.display().to_string()),
            );
        }
    } else {
        if cli.zip && !cli.quiet {
            eprintln!("{}", dim("(only one converted file — writing it directly)"));
        }
        for (name, markdown) in &completed {
            let out_path = cli.output_dir.join(export::markdown_file_name(name));
            export::write_output(&out_path, markdown.as_bytes()).await?;
            if cli.html {
                let html_path = out_path.with_extension("html");
                export::write_output(&html_path, render_html(markdown).as_bytes()).await?;
            }
        }
        if !cli.quiet {
            eprintln!(
                "{} {}/{} files converted  →  {}",
                if failed == 0 { green("✔") } else { cyan("⚠") },
                bold(&completed.len().to_string()),
                completed.len() + failed,
                bold(&cli.output_dir.display().to_string()),
            );
        }
    }

    if failed > 0 && !cli.quiet {
        eprintln!("  {} conversion(s) failed — run with -v for diagnostics", red(&failed.to_string()));
    }

    Ok(())
}

/// Default location of the history document, next to the engine cache.
fn default_history_path() -> PathBuf {
    markitdown_auto::engine_cache_dir()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
        .join("history.json")
}

/// Handle `--list-history`, `--show-history`, `--delete-history`,
/// `--clear-history`.
fn run_history_command(cli: &Cli, config: &ConverterConfig) -> Result<()> {
    use doctomd::HistoryStore;

    let mut store = HistoryStore::open(config);

    if cli.clear_history {
        store.clear_all();
        if !cli.quiet {
            eprintln!("History cleared");
        }
        return Ok(());
    }

    if let Some(ref id) = cli.delete_history {
        store.remove(id);
        if !cli.quiet {
            eprintln!("Deleted {id}");
        }
        return Ok(());
    }

    if let Some(ref id) = cli.show_history {
        let entry = store
            .get_by_id(id)
            .with_context(|| format!("No history entry with id {id}"))?;
        println!("{}", entry.markdown);
        return Ok(());
    }

    // --list-history
    let entries = store.get_all();
    if entries.is_empty() {
        eprintln!("No conversions recorded yet");
        return Ok(());
    }
    let now = chrono::Utc::now();
    for entry in entries {
        println!(
            "{}  {:<32} {:>10}  {}",
            entry.id,
            entry.file_name,
            format!("{} chars", entry.char_count),
            dim(&doctomd::history::format_relative_date(entry.date, now)),
        );
    }
    Ok(())
}
