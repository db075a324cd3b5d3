//! Configuration types for listing extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across concurrent extractions and to log the
//! exact settings a run used.
//!
//! # Design choice: builder over constructor
//! The config has close to twenty fields. The builder lets callers set only
//! what they care about and rely on documented defaults for the rest.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default model when the provider is resolved through `OPENAI_API_KEY`.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for an extraction.
///
/// # Example
/// ```rust
/// use edgequake_propscan::{ExtractionConfig, PromptSet};
///
/// let config = ExtractionConfig::builder()
///     .model("gpt-4o")
///     .prompt_set(PromptSet::Compact)
///     .api_timeout_secs(90)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Transcription wants the most literal reading of the photo.
    pub temperature: f32,

    /// Output token budget for the first, exhaustive pass. Default: 3000.
    ///
    /// The detailed prompt asks for a transcript of all visible text before
    /// the JSON, which alone can reach a thousand tokens on dense listings.
    pub first_pass_max_tokens: usize,

    /// Output token budget for the recovery pass. Default: 1000.
    pub recovery_max_tokens: usize,

    /// Blind retries per recognition call on provider failure. Default: 2.
    ///
    /// These are transport retries inside a single pass; they are separate
    /// from the two-pass protocol and never re-run a pass that returned text.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Wall-clock timeout for one recognition call in seconds. Default: 120.
    ///
    /// The model call is otherwise unbounded; a token budget limits cost but
    /// not latency.
    pub api_timeout_secs: u64,

    /// Timeout for downloading URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Run the image normalizer before recognition. Default: true.
    pub preprocess: bool,

    /// Images whose shorter side is below this are upscaled to it. Default: 1200.
    pub min_short_side: u32,

    /// Upscaling never makes the longer side exceed this. Default: 4096.
    pub max_upscaled_side: u32,

    /// Raw images larger than this are recompressed first. Default: 20 MiB.
    pub max_payload_bytes: usize,

    /// Allow the targeted recovery pass. Default: true.
    pub recovery: bool,

    /// First-pass prompt wording. Default: [`PromptSet::Detailed`].
    pub prompt_set: PromptSet,

    /// Custom first-pass system prompt. If None, uses `prompt_set`'s.
    pub system_prompt: Option<String>,

    /// Listings processed at once by [`crate::stream::extract_stream`]. Default: 4.
    pub concurrency: usize,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            first_pass_max_tokens: 3000,
            recovery_max_tokens: 1000,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 60,
            preprocess: true,
            min_short_side: 1200,
            max_upscaled_side: 4096,
            max_payload_bytes: 20 * 1024 * 1024,
            recovery: true,
            prompt_set: PromptSet::default(),
            system_prompt: None,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("first_pass_max_tokens", &self.first_pass_max_tokens)
            .field("recovery_max_tokens", &self.recovery_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("preprocess", &self.preprocess)
            .field("min_short_side", &self.min_short_side)
            .field("recovery", &self.recovery)
            .field("prompt_set", &self.prompt_set)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The pass-1 `(system, user)` prompts after applying any override.
    pub fn first_pass_prompts(&self) -> (&str, &str) {
        let (system, user) = self.prompt_set.first_pass();
        (self.system_prompt.as_deref().unwrap_or(system), user)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn first_pass_max_tokens(mut self, n: usize) -> Self {
        self.config.first_pass_max_tokens = n;
        self
    }

    pub fn recovery_max_tokens(mut self, n: usize) -> Self {
        self.config.recovery_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.config.preprocess = v;
        self
    }

    pub fn min_short_side(mut self, px: u32) -> Self {
        self.config.min_short_side = px;
        self
    }

    pub fn max_upscaled_side(mut self, px: u32) -> Self {
        self.config.max_upscaled_side = px;
        self
    }

    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_payload_bytes = bytes;
        self
    }

    pub fn recovery(mut self, v: bool) -> Self {
        self.config.recovery = v;
        self
    }

    pub fn prompt_set(mut self, set: PromptSet) -> Self {
        self.config.prompt_set = set;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.first_pass_max_tokens == 0 || c.recovery_max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "Token budgets must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.min_short_side > c.max_upscaled_side {
            return Err(ExtractError::InvalidConfig(format!(
                "min_short_side ({}) exceeds max_upscaled_side ({})",
                c.min_short_side, c.max_upscaled_side
            )));
        }
        if c.max_payload_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_payload_bytes must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Versioned first-pass prompt wording.
///
/// | Set | Use case |
/// |-----|----------|
/// | `Detailed` | Two-step scan-then-extract with per-field hints (default) |
/// | `Compact` | Short "all fields, null if absent" prompt; fewer input tokens |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSet {
    #[default]
    Detailed,
    Compact,
}
