//! CLI binary for edgequake-pdf2mcq.
//!
//! A thin shim over the library crate: maps flags to `ExtractionConfig`,
//! runs the extractor or one of the output tools, and turns the outcome into
//! an exit status.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2mcq::maintenance::plan_cleanup;
use edgequake_pdf2mcq::report::{
    check_output_file, export_csv, load_output_file, output_files, LoadedFile, QuestionStats,
};
use edgequake_pdf2mcq::{
    BatchSummary, ExtractionConfig, ExtractionProgressCallback, ExtractionValidator, Extractor,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Conventional status for a run stopped with Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished document. Documents
/// finish out of order, so start times are keyed by file name.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            skipped: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, filename: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(filename))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} PDFs  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_documents as u64);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} PDF(s)…"))
        ));
    }

    fn on_document_start(&self, filename: &str, _index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(filename.to_string(), Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_document_complete(&self, filename: &str, questions: usize, skipped: usize) {
        self.skipped.fetch_add(skipped, Ordering::SeqCst);
        let skipped_note = if skipped > 0 {
            yellow(&format!("  ({skipped} skipped)"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}{}  {}",
            green("✓"),
            filename,
            dim(&format!("{questions:>4} question(s)")),
            skipped_note,
            self.elapsed(filename),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, filename: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            filename,
            red(&msg),
            self.elapsed(filename),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_documents: usize, _success_count: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if skipped > 0 {
            eprintln!(
                "{} {} question(s) failed validation and were skipped (see processing_notes)",
                yellow("⚠"),
                skipped
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every PDF waiting in data/input/new/
  pdf2mcq run

  # Retry two documents that failed earlier
  pdf2mcq reprocess paper_2019.pdf paper_2020.pdf

  # Re-check every saved result against the question schema
  pdf2mcq validate

  # Category / difficulty / language breakdown
  pdf2mcq stats

  # Flatten all results into one spreadsheet
  pdf2mcq export-csv --output questions.csv

  # See what a cleanup would delete, keeping the 5 newest results
  pdf2mcq clean --dry-run --keep 5

ENVIRONMENT VARIABLES:
  LLAMA_CLOUD_API_KEY     Document-parsing service key (required for run/reprocess)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  INPUT_DIR / OUTPUT_DIR  Data directories (default data/input, data/output)
  BATCH_SIZE              Documents processed concurrently
  LOG_LEVEL               trace, debug, info, warn or error

  A .env file in the working directory is loaded automatically.

EXIT STATUS:
  0    at least one document produced output (validate: every file valid)
  1    nothing produced, a file failed validation, or an unrecoverable error
  130  interrupted with Ctrl-C
"#;

/// Extract multiple-choice questions from exam-paper PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2mcq",
    version,
    about = "Extract validated multiple-choice questions from exam-paper PDFs",
    long_about = "Parse exam-paper PDFs into Markdown, ask an LLM to list every question as JSON, \
and keep each question that passes schema validation. Rejected questions are recorded in the \
output's processing notes instead of failing the document.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Input root; PDFs are picked up from <INPUT_DIR>/new.
    #[arg(long, global = true, env = "INPUT_DIR", default_value = "data/input")]
    input_dir: PathBuf,

    /// Where JSON results and diagrams are written.
    #[arg(long, global = true, env = "OUTPUT_DIR", default_value = "data/output")]
    output_dir: PathBuf,

    /// Documents processed concurrently.
    #[arg(short, long, global = true, env = "BATCH_SIZE", default_value_t = 5)]
    concurrency: usize,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens per document.
    #[arg(long, global = true, env = "PDF2MCQ_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "PDF2MCQ_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Document-parsing service API key.
    #[arg(long, global = true, env = "LLAMA_CLOUD_API_KEY", hide_env_values = true)]
    parse_api_key: Option<String>,

    /// Document-parsing service base URL.
    #[arg(long, global = true, env = "LLAMA_CLOUD_BASE_URL")]
    parse_base_url: Option<String>,

    /// Per-document parse timeout in seconds.
    #[arg(long, global = true, env = "PDF2MCQ_PARSE_TIMEOUT", default_value_t = 300)]
    parse_timeout: u64,

    /// Skip image download and diagram linking.
    #[arg(long, global = true, env = "PDF2MCQ_NO_DIAGRAMS")]
    no_diagrams: bool,

    /// Accept questions whose correct_answer is not one of the option keys.
    #[arg(long, global = true, env = "PDF2MCQ_ALLOW_UNKNOWN_ANSWER")]
    allow_unknown_answer: bool,

    /// Log level when neither --verbose nor --quiet is given.
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2MCQ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2MCQ_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2MCQ_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every PDF in the pending input directory.
    Run,

    /// Re-run extraction for specific PDFs.
    Reprocess {
        /// PDF names (looked up in <INPUT_DIR>/new) or paths.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        files: Vec<String>,

        /// Reprocess every PDF in <INPUT_DIR>/new.
        #[arg(long)]
        all: bool,
    },

    /// Re-validate saved results against the question schema.
    Validate {
        /// Check a single result file instead of the whole output directory.
        #[arg(long)]
        file: Option<String>,
    },

    /// Print question statistics for saved results.
    Stats {
        #[arg(long)]
        file: Option<String>,
    },

    /// Export saved results as one CSV file.
    ExportCsv {
        #[arg(long)]
        file: Option<String>,

        /// CSV path; a bare name is placed in the output directory.
        #[arg(long, default_value = "questions_export.csv")]
        output: PathBuf,
    },

    /// Delete old results and downloaded diagrams.
    Clean {
        /// Show what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,

        /// Number of most recent results to keep.
        #[arg(long, default_value_t = 0)]
        keep: usize,

        /// Only clear the diagrams directory.
        #[arg(long)]
        diagrams_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would interleave with the bar; it reports progress.
    let show_progress = !g.quiet
        && !g.no_progress
        && io::stderr().is_terminal()
        && matches!(cli.command, Command::Run | Command::Reprocess { .. });
    let filter = if g.verbose {
        "debug".to_string()
    } else if g.quiet || show_progress {
        "error".to_string()
    } else {
        g.log_level.clone().unwrap_or_else(|| "info".to_string())
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(g, progress_cb).await?;

    let code = match cli.command {
        Command::Run => {
            let extractor = Extractor::from_config(config).context("Cannot start extraction")?;
            let pdfs = extractor.pending_pdfs();
            if pdfs.is_empty() {
                eprintln!(
                    "No PDF files found in {}",
                    extractor.config().pending_dir().display()
                );
                1
            } else {
                run_interruptible(&extractor, &pdfs, g.quiet).await
            }
        }
        Command::Reprocess { files, all } => {
            let extractor = Extractor::from_config(config).context("Cannot start extraction")?;
            let pdfs = if all {
                extractor.pending_pdfs()
            } else {
                extractor.resolve_inputs(&files)
            };
            if pdfs.is_empty() {
                eprintln!("No PDF files found to reprocess.");
                0
            } else {
                run_interruptible(&extractor, &pdfs, g.quiet).await
            }
        }
        Command::Validate { file } => validate(&config, file.as_deref())?,
        Command::Stats { file } => stats(&config, file.as_deref())?,
        Command::ExportCsv { file, output } => export(&config, file.as_deref(), &output)?,
        Command::Clean {
            dry_run,
            keep,
            diagrams_only,
        } => clean(&config.output_dir, dry_run, keep, diagrams_only)?,
    };

    std::process::exit(code)
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .input_dir(&g.input_dir)
        .output_dir(&g.output_dir)
        .concurrency(g.concurrency)
        .max_tokens(g.max_tokens)
        .parse_timeout_secs(g.parse_timeout)
        .link_diagrams(!g.no_diagrams)
        .download_images(!g.no_diagrams)
        .require_answer_key(!g.allow_unknown_answer);

    if let Some(ref path) = g.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = g.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref key) = g.parse_api_key {
        builder = builder.parse_api_key(key);
    }
    if let Some(ref url) = g.parse_base_url {
        builder = builder.parse_base_url(url);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Run a batch, or stop with status 130 on Ctrl-C. Results already written
/// stay on disk; the interrupted documents simply have no output.
async fn run_interruptible(extractor: &Extractor, pdfs: &[PathBuf], quiet: bool) -> i32 {
    tokio::select! {
        summary = extractor.run_batch(pdfs) => {
            if !quiet {
                print_summary(&summary);
            }
            summary.exit_code()
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{} interrupted", yellow("⚠"));
            EXIT_INTERRUPTED
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    let (total, ok) = (summary.total(), summary.succeeded());
    let mark = if ok == total {
        green("✔")
    } else if ok == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {}/{} PDF(s)  {} question(s)  {}ms",
        mark,
        bold(&ok.to_string()),
        total,
        summary.total_questions(),
        summary.duration_ms,
    );
    for (class, n) in summary.failures_by_class() {
        eprintln!("   {} {} failure(s)", red(&n.to_string()), class);
    }
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(saved) => eprintln!("   {} {}", dim("→"), saved.path.display()),
            Err(e) => eprintln!("   {} {}: {}", red("✗"), outcome.filename(), e),
        }
    }
}

/// Result files a tool works on: one named file, or every file in the
/// output directory.
fn tool_inputs(output_dir: &Path, file: Option<&str>) -> Result<Vec<PathBuf>> {
    match file {
        Some(name) => {
            let p = PathBuf::from(name);
            let path = if p.exists() { p } else { output_dir.join(name) };
            anyhow::ensure!(path.is_file(), "File not found: {}", path.display());
            Ok(vec![path])
        }
        None => Ok(output_files(output_dir)),
    }
}

fn validate(config: &ExtractionConfig, file: Option<&str>) -> Result<i32> {
    let files = tool_inputs(&config.output_dir, file)?;
    if files.is_empty() {
        println!("No JSON files found to validate.");
        return Ok(0);
    }

    let validator = ExtractionValidator::from_config(config);
    println!("Validating {} file(s)...\n", files.len());
    let mut invalid = 0;
    for path in &files {
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        match check_output_file(path, &validator) {
            Ok(check) if check.is_valid() => {
                println!("  {} {} ({} question(s))", green("✓"), name, check.questions);
            }
            Ok(check) => {
                invalid += 1;
                let errors: usize = check.rejections.iter().map(|r| r.violations.len()).sum();
                println!("  {} {} ({} validation error(s))", red("✗"), name, errors);
                for rejection in &check.rejections {
                    for v in &rejection.violations {
                        println!("      questions.{}.{}", rejection.index, v);
                    }
                }
                if let Some(declared) = check.count_mismatch {
                    println!(
                        "      metadata.total_questions: declares {} but file holds {}",
                        declared,
                        check.questions + check.rejections.len()
                    );
                }
            }
            Err(e) => {
                invalid += 1;
                println!("  {} {}", red("✗"), e);
            }
        }
    }

    println!(
        "\nResults: {} valid, {} invalid out of {} file(s)",
        files.len() - invalid,
        invalid,
        files.len()
    );
    Ok(if invalid > 0 { 1 } else { 0 })
}

/// Load files leniently, reporting unreadable ones and moving on.
fn load_all(config: &ExtractionConfig, files: &[PathBuf]) -> Vec<LoadedFile> {
    let validator = ExtractionValidator::from_config(config);
    files
        .iter()
        .filter_map(|path| match load_output_file(path, &validator) {
            Ok(loaded) => {
                if !loaded.rejections.is_empty() {
                    eprintln!(
                        "  {} {}: {} invalid question(s) ignored",
                        yellow("⚠"),
                        loaded.file_name(),
                        loaded.rejections.len()
                    );
                }
                Some(loaded)
            }
            Err(e) => {
                eprintln!("  {} {}", red("✗"), e);
                None
            }
        })
        .collect()
}

fn print_stats(label: &str, stats: &QuestionStats) {
    if stats.total == 0 {
        println!("No questions found.");
        return;
    }
    let rule = "=".repeat(50);
    println!("\n{rule}\n  Statistics: {label}\n{rule}\n");
    println!("{stats}");
}

fn stats(config: &ExtractionConfig, file: Option<&str>) -> Result<i32> {
    let files = tool_inputs(&config.output_dir, file)?;
    if files.is_empty() {
        println!("No JSON files found in output directory.");
        return Ok(0);
    }

    let loaded = load_all(config, &files);
    if loaded.len() > 1 {
        for f in &loaded {
            print_stats(&f.file_name(), &QuestionStats::from_questions(&f.questions));
        }
        let all = loaded.iter().flat_map(|f| f.questions.iter());
        print_stats("Combined", &QuestionStats::from_questions(all));
    } else if let Some(f) = loaded.first() {
        print_stats(&f.file_name(), &QuestionStats::from_questions(&f.questions));
    }
    Ok(0)
}

fn export(config: &ExtractionConfig, file: Option<&str>, output: &Path) -> Result<i32> {
    let files = tool_inputs(&config.output_dir, file)?;
    if files.is_empty() {
        println!("No JSON files found to export.");
        return Ok(0);
    }

    let loaded = load_all(config, &files);
    if loaded.iter().all(|f| f.questions.is_empty()) {
        println!("No questions found to export.");
        return Ok(0);
    }

    let path = if output.components().count() > 1 || output.is_absolute() {
        output.to_path_buf()
    } else {
        config.output_dir.join(output)
    };
    let out = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let rows = export_csv(&loaded, BufWriter::new(out))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Exported {} question(s) → {}", rows, path.display());
    Ok(0)
}

fn clean(output_dir: &Path, dry_run: bool, keep: usize, diagrams_only: bool) -> Result<i32> {
    let plan = plan_cleanup(output_dir, keep, diagrams_only).context("Failed to scan output directory")?;
    let action = if dry_run { "Would delete" } else { "Deleting" };

    if plan.diagrams_dir.is_some() {
        println!(
            "{} {} diagram file(s) ({:.1} KB)",
            action,
            plan.diagram_files,
            plan.diagram_bytes as f64 / 1024.0
        );
    }
    if !diagrams_only {
        if plan.json_files.is_empty() && plan.kept == 0 {
            println!("No output files found.");
        } else {
            if keep > 0 {
                println!("Keeping {} most recent file(s)", plan.kept);
            }
            if plan.json_files.is_empty() {
                println!("Nothing to delete.");
            }
            for f in &plan.json_files {
                let name = f.file_name().map_or_else(
                    || f.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
                println!("  {}: {}", action, name);
            }
        }
    }

    if !dry_run && !plan.is_empty() {
        plan.apply().context("Cleanup failed")?;
    }
    if !diagrams_only && !plan.json_files.is_empty() {
        println!(
            "\n{} file(s) {}deleted.",
            plan.json_files.len(),
            if dry_run { "would be " } else { "" }
        );
    } else if diagrams_only {
        println!("Done (diagrams only).");
    }
    Ok(0)
}
