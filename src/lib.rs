//! # edgequake-propscan
//!
//! Structured extraction of Vietnamese real-estate listings from photos using
//! Vision Language Models (VLMs).
//!
//! ## Why two passes?
//!
//! A single broad prompt asking for thirty attributes reliably misses a few
//! of the ones that matter most: the area printed in a corner, the room
//! count next to an icon. Rather than re-running the whole extraction, this
//! crate validates the first answer against a fixed set of critical fields
//! and, only if some are blank, issues a second, narrow prompt for exactly
//! those fields. The second pass costs a fraction of the first and its answer
//! can only fill gaps, never overwrite what pass 1 found.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photos (path / URL / base64)
//!  │
//!  ├─ 1. Input       load bytes, check JPEG/PNG/WebP
//!  ├─ 2. Normalize   upscale, contrast, sharpen, denoise (spawn_blocking)
//!  ├─ 3. Pass 1      broad extraction prompt → PropertyRecord
//!  ├─ 4. Validate    which critical fields are null / "" / 0
//!  ├─ 5. Pass 2      targeted recovery prompt (only if something is missing)
//!  └─ 6. Merge       fill gaps, report retry_info
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_propscan::{extract_files, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let outcome = extract_files(&["listing-1.jpg", "listing-2.jpg"], &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome.record)?);
//!     eprintln!("tokens: {} in / {} out",
//!         outcome.usage.input_tokens,
//!         outcome.usage.output_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Recognition Clients
//!
//! [`Extractor::new`] accepts any [`RecognitionClient`], e.g. a caching
//! wrapper or a scripted client in tests. [`Extractor::from_config`] builds
//! the default `edgequake-llm` backed client.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `propscan` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-propscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PromptSet};
pub use error::{ExtractError, ParseError, RecognitionError, RecoveryError};
pub use extract::{
    extract, extract_base64, extract_files, extract_sync, extract_to_file, Extractor,
};
pub use output::{ExtractionOutcome, ExtractionResponse, RetryInfo, TokenUsage};
pub use pipeline::encode::{AssetFormat, ImageAsset};
pub use pipeline::input::ImageSource;
pub use pipeline::recognition::{
    LlmRecognitionClient, RecognitionClient, RecognitionRequest, RecognitionResponse,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, Pass, ProgressCallback};
pub use record::{ConditionAssessment, CriticalField, PropertyInfo, PropertyRecord};
pub use stream::{extract_stream, extract_stream_with_config, ListingStream};
