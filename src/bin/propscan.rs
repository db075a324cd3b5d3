//! CLI binary for edgequake-propscan.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the service-layer JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_propscan::extract::{prepare_image, write_json_atomic};
use edgequake_propscan::pipeline::input::load_image;
use edgequake_propscan::pipeline::normalize::NormalizeOptions;
use edgequake_propscan::{
    extract_stream, CriticalField, ExtractionConfig, ExtractionProgressCallback,
    ExtractionResponse, Extractor, ImageSource, Pass, ProgressCallback, PromptSet, TokenUsage,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner naming the current pass, plus one log line
/// per finished pass.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading images…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, image_count: usize) {
        self.bar.set_prefix("Normalizing");
        self.bar.set_message(format!("{image_count} image(s)"));
    }

    fn on_pass_start(&self, pass: Pass) {
        self.bar.set_prefix(pass.to_string());
        self.bar.set_message("waiting for model…");
    }

    fn on_pass_complete(&self, pass: Pass, usage: TokenUsage) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            pass,
            dim(&format!(
                "{} in / {} out tokens",
                usage.input_tokens, usage.output_tokens
            )),
        ));
    }

    fn on_pass_error(&self, pass: Pass, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        let mark = match pass {
            Pass::First => red("✗"),
            Pass::Recovery => yellow("⚠"),
        };
        self.bar.println(format!("  {mark} {pass}  {}", red(&msg)));
    }

    fn on_missing_fields(&self, fields: &[CriticalField]) {
        let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
        self.bar.println(format!(
            "  {} missing {}",
            yellow("…"),
            dim(&names.join(", "))
        ));
    }

    fn on_extraction_complete(&self, _success: bool) {
        self.bar.set_prefix("Done");
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # All photos belong to one listing (stdout JSON)
  propscan front.jpg details.png

  # Write the response atomically to a file
  propscan front.jpg details.png -o listing.json

  # One listing per photo, 8 at a time, JSON array output
  propscan --each -c 8 crawl/*.jpg > listings.json

  # Download photos from URLs
  propscan https://cdn.example.vn/p/123/1.jpg https://cdn.example.vn/p/123/2.jpg

  # Look at what the model will see (no API key needed)
  propscan --normalize-only ./normalized front.jpg details.png

  # Cheaper single-pass run
  propscan --prompt-set compact --no-recovery front.jpg

OUTPUT:
  { "success": true,  "data": {...}, "usage": {...}, "retry_info": {...} }
  { "success": false, "error": "..." }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Extract structured property data from real-estate listing photos.
#[derive(Parser, Debug)]
#[command(
    name = "propscan",
    version,
    about = "Extract structured property data from real-estate listing photos using Vision LLMs",
    long_about = "Read Vietnamese real-estate listing photos and screenshots with a Vision \
Language Model and return a structured property record. Critical fields the first pass \
misses are re-requested in a second, targeted pass.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image paths, HTTP/HTTPS URLs or data: URIs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Treat every input as its own listing; prints a JSON array.
    #[arg(long)]
    each: bool,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "PROPSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Only normalize the inputs and write the JPEGs into DIR.
    #[arg(long, value_name = "DIR")]
    normalize_only: Option<PathBuf>,

    /// LLM model ID (default: gpt-4o).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// First-pass prompt set.
    #[arg(long, env = "PROPSCAN_PROMPT_SET", value_enum, default_value = "detailed")]
    prompt_set: PromptSetArg,

    /// Path to a text file replacing the first-pass system prompt.
    #[arg(long, env = "PROPSCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Skip image enhancement and send photos as-is.
    #[arg(long, env = "PROPSCAN_NO_PREPROCESS")]
    no_preprocess: bool,

    /// Never issue the recovery pass.
    #[arg(long, env = "PROPSCAN_NO_RECOVERY")]
    no_recovery: bool,

    /// Max output tokens for the first pass.
    #[arg(long, env = "PROPSCAN_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// Max output tokens for the recovery pass.
    #[arg(long, env = "PROPSCAN_RECOVERY_MAX_TOKENS", default_value_t = 1000)]
    recovery_max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PROPSCAN_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per model call.
    #[arg(long, env = "PROPSCAN_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Listings extracted concurrently with --each.
    #[arg(short, long, env = "PROPSCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Upscale images whose shorter side is below this many pixels.
    #[arg(long, env = "PROPSCAN_MIN_SHORT_SIDE", default_value_t = 1200)]
    min_short_side: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PROPSCAN_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PROPSCAN_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Disable the spinner.
    #[arg(long, env = "PROPSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PROPSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PROPSCAN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PromptSetArg {
    Detailed,
    Compact,
}

impl From<PromptSetArg> for PromptSet {
    fn from(v: PromptSetArg) -> Self {
        match v {
            PromptSetArg::Detailed => PromptSet::Detailed,
            PromptSetArg::Compact => PromptSet::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.verbose;
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

    let progress: Option<Arc<CliProgressCallback>> = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress.clone().map(|p| p as ProgressCallback),
    )
    .await?;

    // ── Normalize-only mode ──────────────────────────────────────────────
    if let Some(ref dir) = cli.normalize_only {
        let written = normalize_only(&cli.inputs, dir, &config).await?;
        if let Some(p) = progress {
            p.bar.finish_and_clear();
        }
        if !cli.quiet {
            eprintln!(
                "{} {} image(s) written to {}",
                green("✔"),
                written,
                bold(&dir.display().to_string())
            );
        }
        return Ok(());
    }

    let extractor = Extractor::from_config(config).context("Failed to configure LLM provider")?;
    let sources: Vec<ImageSource> = cli.inputs.iter().map(|s| ImageSource::parse(s)).collect();

    // ── Run extraction ───────────────────────────────────────────────────
    let (json, failed) = if cli.each {
        let listings: Vec<Vec<ImageSource>> = sources.into_iter().map(|s| vec![s]).collect();
        let total = listings.len();
        let mut results: Vec<Option<ExtractionResponse>> = vec![None; total];

        let mut stream = extract_stream(listings, extractor);
        while let Some((idx, result)) = stream.next().await {
            results[idx] = Some(ExtractionResponse::from_result(&result));
        }

        let responses: Vec<ExtractionResponse> = results.into_iter().flatten().collect();
        let failed = responses.iter().filter(|r| !r.success).count();
        let json = serde_json::to_value(&responses).context("Failed to serialise output")?;
        (json, failed)
    } else {
        let result = extractor.extract_sources(&sources).await;
        let response = ExtractionResponse::from_result(&result);
        let failed = usize::from(!response.success);
        let json = serde_json::to_value(&response).context("Failed to serialise output")?;
        (json, failed)
    };

    if let Some(p) = progress {
        p.bar.finish_and_clear();
    }

    match cli.output {
        Some(ref path) => {
            write_json_atomic(path, &json)
                .await
                .context("Failed to write output")?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise output")?
        ),
    }

    if failed > 0 {
        if !cli.quiet {
            eprintln!("{} {} extraction(s) failed", red("✘"), failed);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .prompt_set(cli.prompt_set.into())
        .preprocess(!cli.no_preprocess)
        .recovery(!cli.no_recovery)
        .first_pass_max_tokens(cli.max_tokens)
        .recovery_max_tokens(cli.recovery_max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .concurrency(cli.concurrency)
        .min_short_side(cli.min_short_side)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write the normalized version of every input into `dir`.
async fn normalize_only(inputs: &[String], dir: &Path, config: &ExtractionConfig) -> Result<usize> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let opts = NormalizeOptions::from(config);
    for (i, input) in inputs.iter().enumerate() {
        let source = ImageSource::parse(input);
        let raw = load_image(&source, i, config.download_timeout_secs)
            .await
            .with_context(|| format!("Failed to load {input}"))?;

        let (preprocess, max_bytes) = (config.preprocess, config.max_payload_bytes);
        let asset = tokio::task::spawn_blocking(move || prepare_image(&raw, preprocess, &opts, max_bytes))
            .await
            .context("Normalization task failed")?;

        let ext = match asset.format() {
            edgequake_propscan::AssetFormat::Jpeg => "jpg",
            edgequake_propscan::AssetFormat::Png => "png",
            edgequake_propscan::AssetFormat::Webp => "webp",
        };
        let path = dir.join(format!("{:02}-{}.{ext}", i + 1, file_stem(input)));
        tokio::fs::write(&path, asset.bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(inputs.len())
}

/// A filesystem-safe stem for an input path or URL.
fn file_stem(input: &str) -> String {
    if input.starts_with("data:") {
        return "inline".to_string();
    }
    let last = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let last = last.split(['?', '#']).next().unwrap_or(last);
    let stem = Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "image".to_string()
    } else {
        safe
    }
}
