//! Error types for the edgequake-propscan library.
//!
//! Extraction has two passes with deliberately different failure policies,
//! and the types here encode that split:
//!
//! * [`ExtractError`] — **Fatal**: the extraction cannot produce a record at
//!   all (no images, provider not configured, pass 1 failed or returned
//!   unparsable text). Returned as `Err(ExtractError)` from the top-level
//!   `extract*` functions.
//!
//! * [`RecoveryError`] — **Non-fatal**: the targeted pass-2 recovery call
//!   failed. It never propagates as an `Err`; the orchestrator downgrades it
//!   to a warning on an otherwise successful
//!   [`crate::output::ExtractionOutcome`]. There is intentionally no
//!   `From<RecoveryError> for ExtractError`, so `?` cannot turn a recovery
//!   failure into a fatal one by accident.
//!
//! [`RecognitionError`] and [`ParseError`] are the building blocks both of the
//! above are made from.

use std::path::PathBuf;
use thiserror::Error;

/// Number of characters of offending model output kept for diagnostics.
pub const SNIPPET_CHARS: usize = 300;

/// All fatal errors returned by the edgequake-propscan library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// `extract` was called with an empty image list.
    #[error("No images supplied; at least one listing photo is required")]
    NoImages,

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    ImageNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes are not in an image format the pipeline can decode.
    #[error("Input '{input}' is not a supported image (expected JPEG, PNG or WebP)")]
    UnsupportedImage { input: String },

    /// A base64 image payload could not be decoded.
    #[error("Image #{index} is not valid base64: {detail}")]
    InvalidBase64 { index: usize, detail: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Recognition errors (pass 1 only) ──────────────────────────────────
    /// The first recognition pass failed at the transport/model level.
    #[error("Recognition unavailable: {0}")]
    RecognitionUnavailable(#[source] RecognitionError),

    /// The first recognition pass returned text that is not a property record.
    #[error("Malformed recognition response: {0}")]
    MalformedResponse(#[source] ParseError),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call to the Recognition Client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    /// The provider returned an error on every attempt.
    #[error("provider call failed after {attempts} attempt(s): {detail}")]
    Provider { attempts: u32, detail: String },

    /// The call did not finish within the configured wall-clock budget.
    #[error("provider call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Model output that could not be read as JSON, even after fence stripping
/// and brace-span extraction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid JSON in model output: {snippet:?}")]
pub struct ParseError {
    /// The first [`SNIPPET_CHARS`] characters of the offending text.
    pub snippet: String,
}

impl ParseError {
    /// Build a parse error from the full offending text, truncating it.
    pub fn from_text(text: &str) -> Self {
        Self {
            snippet: text.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

/// Pass-2 failure. Always downgraded to a warning.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryError {
    /// The recovery call itself failed.
    #[error("Partial recovery failed: {0}")]
    Unavailable(RecognitionError),

    /// The recovery call answered, but not with a JSON object.
    #[error("Partial recovery failed: {0}")]
    Malformed(ParseError),
}
