//! CLI binary for edgequake-thesis2tex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the extracted thesis as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_thesis2tex::{
    extract, inspect, ExtractionConfig, ExtractionProgressCallback, ProgressCallback,
    StructureSource, TableConverter, ThesisData,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the outline is analysed, then
/// a bar with one log line per chunk. Chunks may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-chunk wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Analysing document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, chunk_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_structure_ready(&self, sections: usize, source: StructureSource) {
        let via = match source {
            StructureSource::Llm => "LLM",
            StructureSource::RegexFallback => "regex fallback",
        };
        self.bar.println(format!(
            "{} {} sections found {}",
            cyan("◆"),
            bold(&sections.to_string()),
            dim(&format!("({via})"))
        ));
    }

    fn on_extraction_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_start(&self, chunk_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(chunk_num, Instant::now());
        }
        self.bar.set_message(format!("chunk {chunk_num}"));
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize, sections: usize) {
        let elapsed = self.elapsed_secs(chunk_num);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            chunk_num,
            total,
            dim(&format!("{sections:>3} sections")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk_num: usize, total: usize, error: &str) {
        let elapsed = self.elapsed_secs(chunk_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk_num,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_chunks: usize, success_count: usize) {
        let failed = total_chunks.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} chunks extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chunks extracted  ({} failed)",
                if failed == total_chunks {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_chunks,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to stdout
  thesis2tex thesis.txt

  # Write JSON to a file
  thesis2tex thesis.txt -o thesis.json

  # Read from a pipe
  docx2txt thesis.docx | thesis2tex - -o thesis.json

  # Use a specific model
  thesis2tex --model gpt-4.1 --provider openai thesis.txt

  # Show the regex outline and chunk plan (no API key needed)
  thesis2tex --inspect-only thesis.txt

  # Keep Unicode math as-is and drop table markers that could not be converted
  thesis2tex --no-formulas --strip-markers thesis.txt

INPUT MARKERS:
  [FIGURE:<id>] / [FIGURE:<id>:<status>]        figure placeholders
  [TABLE cols=N][HEADER]..[/HEADER][ROW]..[/TABLE]
  [TABLE_START] .. [TABLE_END]                  flat cell lists
  | a | b |  + |---|---|                        Markdown pipe tables
  [FORMULA: .. :END_FORMULA]                    inline formulas
  [FORMULA_BLOCK: .. :END_FORMULA_BLOCK]        display formulas

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override the log filter
"#;

/// Extract structured, LaTeX-safe thesis data from plain text using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "thesis2tex",
    version,
    about = "Extract structured, LaTeX-safe thesis data from plain text using LLMs",
    long_about = "Read the plain text of an academic thesis (UTF-8, with optional figure, table \
and formula markers) and print its metadata, sections, abstracts, keywords, references and \
acknowledgements as JSON. Tables, figures and Unicode math are rewritten as LaTeX.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// UTF-8 text file, or `-` for stdin.
    input: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "THESIS2TEX_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Number of concurrent LLM calls.
    #[arg(short, long, env = "THESIS2TEX_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Retries per chunk on LLM failure.
    #[arg(long, env = "THESIS2TEX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "THESIS2TEX_MAX_TOKENS", default_value_t = 16_000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "THESIS2TEX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Maximum chunk size in characters.
    #[arg(long, env = "THESIS2TEX_CHUNK_SIZE", default_value_t = 40_000)]
    chunk_size: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "THESIS2TEX_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Leave Unicode math untouched.
    #[arg(long)]
    no_formulas: bool,

    /// Keep the reference list as extracted instead of reformatting it
    /// to GB/T 7714.
    #[arg(long)]
    raw_references: bool,

    /// Remove table markers that could not be converted.
    #[arg(long)]
    strip_markers: bool,

    /// Print the regex outline and chunk plan only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "THESIS2TEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "THESIS2TEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "THESIS2TEX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
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
        .with_writer(io::stderr)
        .init();

    let text = read_input(&cli.input).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        print_plan(&text);
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract(&text, &config).await.context("Extraction failed")?;
    let mut thesis = output.thesis;
    if cli.strip_markers {
        strip_markers(&mut thesis);
    }

    let json = serde_json::to_string_pretty(&thesis).context("Failed to serialise output")?;
    match cli.output {
        Some(ref path) => {
            tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => println!("{json}"),
    }

    // ── Summary ──────────────────────────────────────────────────────────
    for warning in thesis.warnings.iter().flatten() {
        eprintln!("{} {}", yellow("warning:"), warning);
    }
    if !cli.quiet {
        let stats = &output.stats;
        let target = cli
            .output
            .as_ref()
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default();
        eprintln!(
            "{}  {} sections  {}/{} chunks  {}ms{}",
            if stats.failed_chunks == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.sections,
            stats.succeeded_chunks,
            stats.total_chunks,
            stats.total_duration_ms,
            target,
        );
    }

    Ok(())
}

/// Read the whole input as UTF-8, from a file or from stdin for `-`.
async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {input}"))
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_chunk_size(cli.chunk_size)
        .api_timeout_secs(cli.api_timeout)
        .convert_formulas(!cli.no_formulas)
        .format_references(!cli.raw_references);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn strip_markers(thesis: &mut ThesisData) {
    for section in &mut thesis.sections {
        section.content = TableConverter::strip_unconverted_markers(&section.content);
    }
}

/// Print the regex outline and the chunk plan built from it.
fn print_plan(text: &str) {
    let (structure, chunks) = inspect(text);

    println!("Characters:   {}", text.chars().count());
    println!("Sections:     {}", structure.sections.len());
    for s in &structure.sections {
        println!(
            "  {}{} {}",
            "  ".repeat(usize::from(s.level.saturating_sub(1))),
            dim(&format!("[{}..{}]", s.start_pos, s.end_pos)),
            s.title
        );
    }
    let ranges = [
        ("Abstract:", structure.abstract_range),
        ("References:", structure.references_range),
        ("Acknowledge:", structure.acknowledgements_range),
    ];
    for (name, range) in ranges {
        match range {
            Some(r) => println!("{name:<13} {}..{}", r.start, r.end),
            None => println!("{name:<13} {}", dim("not found")),
        }
    }

    println!("Chunks:       {}", chunks.len());
    for chunk in &chunks {
        let mut extras = Vec::new();
        if chunk.includes_abstract() {
            extras.push("abstract");
        }
        if chunk.includes_acknowledgements() {
            extras.push("acknowledgements");
        }
        if chunk.includes_references() {
            extras.push("references");
        }
        println!(
            "  #{:<3} {:>6} chars  {:>3} sections  {}",
            chunk.chunk_index + 1,
            chunk.size(),
            chunk.sections.len(),
            dim(&extras.join(", "))
        );
    }
}
