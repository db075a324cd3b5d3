//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe
//! each pass as it happens: the CLI drives a spinner from it, a service can
//! forward events to a websocket or a job table.
//!
//! # Example
//!
//! ```rust
//! use edgequake_propscan::{ExtractionConfig, ExtractionProgressCallback, Pass};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PassCounter {
//!     calls: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for PassCounter {
//!     fn on_pass_start(&self, pass: Pass) {
//!         self.calls.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{pass} started");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(PassCounter { calls: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::TokenUsage;
use crate::record::CriticalField;
use std::fmt;
use std::sync::Arc;

/// One recognition round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Broad extraction of every field.
    First,
    /// Targeted recovery of missing critical fields.
    Recovery,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::First => f.write_str("Pass 1"),
            Pass::Recovery => f.write_str("Pass 2"),
        }
    }
}

/// Called by the orchestrator as an extraction progresses.
///
/// Implementations must be `Send + Sync`: the stream API runs several
/// extractions concurrently with the same config. All methods default to
/// no-ops so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, after inputs are validated and before normalization.
    fn on_extraction_start(&self, image_count: usize) {
        let _ = image_count;
    }

    /// Called just before a recognition request is sent.
    fn on_pass_start(&self, pass: Pass) {
        let _ = pass;
    }

    /// Called when a pass returned parsable text.
    fn on_pass_complete(&self, pass: Pass, usage: TokenUsage) {
        let _ = (pass, usage);
    }

    /// Called when a pass failed. For [`Pass::Recovery`] the extraction
    /// still succeeds.
    fn on_pass_error(&self, pass: Pass, error: &str) {
        let _ = (pass, error);
    }

    /// Called after validation found critical fields missing.
    fn on_missing_fields(&self, fields: &[CriticalField]) {
        let _ = fields;
    }

    /// Called once when the extraction finishes, successfully or not.
    fn on_extraction_complete(&self, success: bool) {
        let _ = success;
    }
}

/// Shared handle stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}
