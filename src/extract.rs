//! Extraction orchestration: the two-pass protocol.
//!
//! ```text
//! START → PASS1 → VALIDATE ─┬─▶ DONE              (nothing missing / recovery off)
//!                           └─▶ PASS2 → MERGE → DONE
//! ```
//!
//! Pass 1 asks for every field. Its failure is fatal: there is no record to
//! return. Validation then lists the critical fields that are still blank,
//! and only those are requested in pass 2. Pass 2 is best effort: whatever
//! goes wrong, the pass-1 record is returned with a warning attached.
//!
//! [`Extractor`] holds the Recognition Client and config and can be reused
//! across listings. The free functions build one from an
//! [`ExtractionConfig`] for one-off calls.

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::{ExtractError, RecoveryError};
use crate::output::{ExtractionOutcome, ExtractionResponse, RetryInfo, TokenUsage};
use crate::pipeline::encode::ImageAsset;
use crate::pipeline::input::{self, ImageSource};
use crate::pipeline::merge::merge_recovered;
use crate::pipeline::normalize::{self, NormalizeOptions};
use crate::pipeline::parse::{parse_object, parse_record};
use crate::pipeline::recognition::{LlmRecognitionClient, RecognitionClient, RecognitionRequest};
use crate::pipeline::validate::missing_fields;
use crate::progress::Pass;
use crate::prompts::{recovery_user_prompt, RECOVERY_SYSTEM_PROMPT};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs extractions against one Recognition Client.
#[derive(Clone)]
pub struct Extractor {
    client: Arc<dyn RecognitionClient>,
    config: ExtractionConfig,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("client", &"<dyn RecognitionClient>")
            .field("config", &self.config)
            .finish()
    }
}

impl Extractor {
    /// Use an explicit client. Provider fields in `config` are ignored.
    pub fn new(client: Arc<dyn RecognitionClient>, config: ExtractionConfig) -> Self {
        Self { client, config }
    }

    /// Resolve an LLM provider from `config` or the environment and wrap it
    /// in an [`LlmRecognitionClient`].
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(&config)?;
        let client = LlmRecognitionClient::new(provider, &config);
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Load path/URL/data-URI inputs, then [`extract`](Self::extract).
    pub async fn extract_sources(
        &self,
        sources: &[ImageSource],
    ) -> Result<ExtractionOutcome, ExtractError> {
        let images = input::load_images(sources, self.config.download_timeout_secs).await?;
        self.extract(images).await
    }

    /// Extract one listing from its photos.
    ///
    /// # Errors
    /// Only fatal failures: no images, or pass 1 failed or was unparsable.
    /// A failed recovery pass is reported through
    /// [`ExtractionOutcome::warning`] instead.
    pub async fn extract(&self, images: Vec<Vec<u8>>) -> Result<ExtractionOutcome, ExtractError> {
        if images.is_empty() {
            return Err(ExtractError::NoImages);
        }

        let start = Instant::now();
        info!("Starting extraction: {} image(s)", images.len());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(images.len());
        }

        let result = self.run(images).await.map(|mut outcome| {
            outcome.duration_ms = start.elapsed().as_millis() as u64;
            outcome
        });

        match &result {
            Ok(o) => info!(
                "Extraction complete: {} pass(es), {} input / {} output tokens, {}ms",
                o.passes, o.usage.input_tokens, o.usage.output_tokens, o.duration_ms
            ),
            Err(e) => warn!("Extraction failed: {}", e),
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(result.is_ok());
        }
        result
    }

    async fn run(&self, images: Vec<Vec<u8>>) -> Result<ExtractionOutcome, ExtractError> {
        let config = &self.config;

        // ── Normalize ────────────────────────────────────────────────────
        let assets = self.prepare(images).await;

        // ── Pass 1 ───────────────────────────────────────────────────────
        let (system, user) = config.first_pass_prompts();
        let first = RecognitionRequest {
            images: assets,
            system_prompt: system.to_string(),
            user_prompt: user.to_string(),
            max_output_tokens: config.first_pass_max_tokens,
        };

        self.notify_start(Pass::First);
        let response = match self.client.recognize(&first).await {
            Ok(r) => r,
            Err(e) => {
                self.notify_error(Pass::First, &e.to_string());
                return Err(ExtractError::RecognitionUnavailable(e));
            }
        };
        let mut usage = response.usage;
        let mut record = match parse_record(&response.text) {
            Ok(r) => r,
            Err(e) => {
                self.notify_error(Pass::First, &e.to_string());
                return Err(ExtractError::MalformedResponse(e));
            }
        };
        self.notify_complete(Pass::First, response.usage);

        // ── Validate ─────────────────────────────────────────────────────
        let missing = missing_fields(&record);
        if missing.is_empty() {
            debug!("All critical fields present after pass 1");
            return Ok(outcome(record, usage, None, None, 1));
        }

        info!(
            "Missing {} critical field(s): {}",
            missing.len(),
            join_fields(&missing)
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_missing_fields(&missing);
        }

        if !config.recovery {
            debug!("Recovery pass disabled; returning pass-1 record");
            return Ok(outcome(record, usage, None, None, 1));
        }

        // ── Pass 2 + merge ───────────────────────────────────────────────
        let recovery = RecognitionRequest {
            images: first.images,
            system_prompt: RECOVERY_SYSTEM_PROMPT.to_string(),
            user_prompt: recovery_user_prompt(&missing),
            max_output_tokens: config.recovery_max_tokens,
        };

        let (retry_info, warning) = match self.recover(&recovery, &mut usage).await {
            Ok(reply) => {
                let recovered = merge_recovered(&mut record, &reply, &missing);
                let retry = RetryInfo::new(missing, recovered);
                info!("Recovery pass: {} fields recovered", retry.recovery_rate);
                (retry, None)
            }
            Err(e) => {
                warn!("{}", e);
                self.notify_error(Pass::Recovery, &e.to_string());
                (RetryInfo::new(missing, Vec::new()), Some(e.to_string()))
            }
        };

        Ok(outcome(record, usage, Some(retry_info), warning, 2))
    }

    /// Issue pass 2. Tokens are counted even if the reply is unparsable.
    async fn recover(
        &self,
        request: &RecognitionRequest,
        usage: &mut TokenUsage,
    ) -> Result<Map<String, Value>, RecoveryError> {
        self.notify_start(Pass::Recovery);
        let response = self
            .client
            .recognize(request)
            .await
            .map_err(RecoveryError::Unavailable)?;
        *usage = *usage + response.usage;

        let reply = parse_object(&response.text).map_err(RecoveryError::Malformed)?;
        self.notify_complete(Pass::Recovery, response.usage);
        Ok(reply)
    }

    /// Normalize every image on the blocking pool, preserving order.
    async fn prepare(&self, images: Vec<Vec<u8>>) -> Vec<ImageAsset> {
        let preprocess = self.config.preprocess;
        let opts = NormalizeOptions::from(&self.config);
        let max_bytes = self.config.max_payload_bytes;

        let tasks = images.into_iter().enumerate().map(|(i, raw)| {
            let raw = Arc::new(raw);
            let task_raw = Arc::clone(&raw);
            async move {
                let handle = tokio::task::spawn_blocking(move || {
                    prepare_image(&task_raw, preprocess, &opts, max_bytes)
                });
                match handle.await {
                    Ok(asset) => asset,
                    Err(e) => {
                        warn!("Normalizing image #{} panicked, sending original: {}", i, e);
                        ImageAsset::from_bytes(raw.to_vec())
                    }
                }
            }
        });
        join_all(tasks).await
    }

    fn notify_start(&self, pass: Pass) {
        info!("{}: sending recognition request", pass);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pass_start(pass);
        }
    }

    fn notify_complete(&self, pass: Pass, usage: TokenUsage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pass_complete(pass, usage);
        }
    }

    fn notify_error(&self, pass: Pass, error: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pass_error(pass, error);
        }
    }
}

/// Turn raw bytes into the asset sent to the model.
///
/// Anything above `max_payload_bytes` is recompressed first; the normalizer
/// then runs when `preprocess` is set.
pub fn prepare_image(
    raw: &[u8],
    preprocess: bool,
    opts: &NormalizeOptions,
    max_payload_bytes: usize,
) -> ImageAsset {
    let bounded = normalize::compress_oversized(raw, max_payload_bytes);
    let bytes = match (preprocess, bounded) {
        (true, bounded) => normalize::normalize(&bounded, opts),
        (false, Cow::Owned(smaller)) => smaller,
        (false, Cow::Borrowed(original)) => original.to_vec(),
    };
    ImageAsset::from_bytes(bytes)
}

fn outcome(
    record: crate::record::PropertyRecord,
    usage: TokenUsage,
    retry_info: Option<RetryInfo>,
    warning: Option<String>,
    passes: u8,
) -> ExtractionOutcome {
    ExtractionOutcome {
        record,
        usage,
        retry_info,
        warning,
        passes,
        duration_ms: 0,
    }
}

fn join_fields(fields: &[crate::record::CriticalField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── One-shot entry points ────────────────────────────────────────────────

/// Extract one listing from raw image bytes.
pub async fn extract(
    images: Vec<Vec<u8>>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    Extractor::from_config(config.clone())?.extract(images).await
}

/// Extract one listing from paths, URLs or data URIs.
///
/// # Example
/// ```rust,no_run
/// use edgequake_propscan::{extract_files, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().model("gpt-4o").build()?;
/// let outcome = extract_files(&["front.jpg", "details.png"], &config).await?;
/// println!("{:?}", outcome.record.property_info.usable_area_m2);
/// # Ok(())
/// # }
/// ```
pub async fn extract_files<S: AsRef<str>>(
    inputs: &[S],
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    let sources: Vec<ImageSource> = inputs.iter().map(|s| ImageSource::parse(s.as_ref())).collect();
    // Inputs are checked before the provider is resolved.
    let images = input::load_images(&sources, config.download_timeout_secs).await?;
    extract(images, config).await
}

/// Extract one listing from base64 payloads as uploaded by a web client.
pub async fn extract_base64(
    payloads: &[String],
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    let images = input::decode_base64_images(payloads)?;
    extract(images, config).await
}

/// Synchronous wrapper around [`extract_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync<S: AsRef<str>>(
    inputs: &[S],
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_files(inputs, config))
}

/// Extract and write the service-layer JSON response to `output_path`.
///
/// A failed extraction is still written (as `{"success": false, ...}`) and
/// then returned as `Err`.
pub async fn extract_to_file<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractError> {
    let result = extract_files(inputs, config).await;
    write_json_atomic(output_path.as_ref(), &ExtractionResponse::from_result(&result)).await?;
    result
}

/// Write pretty JSON via temp file + rename so readers never see a partial
/// file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ExtractError> {
    let write_err = |e: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| ExtractError::Internal(format!("JSON serialisation failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// The default model is `gpt-4o`: smaller models miss the small print on
/// listing screenshots.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
