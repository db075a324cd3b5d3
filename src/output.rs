//! Output types: the extraction outcome and its service-layer JSON shape.

use crate::error::ExtractError;
use crate::record::{CriticalField, PropertyRecord};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Token accounting for one or more recognition calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

/// What the recovery pass attempted and achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// Critical fields missing after pass 1, in validation order.
    pub attempted_fields: Vec<CriticalField>,
    /// The subset of `attempted_fields` pass 2 filled in.
    pub recovered_fields: Vec<CriticalField>,
    /// `"recovered/attempted"`, e.g. `"1/1"`.
    pub recovery_rate: String,
}

impl RetryInfo {
    pub fn new(attempted: Vec<CriticalField>, recovered: Vec<CriticalField>) -> Self {
        let recovery_rate = format!("{}/{}", recovered.len(), attempted.len());
        Self {
            attempted_fields: attempted,
            recovered_fields: recovered,
            recovery_rate,
        }
    }

    /// Recovered fraction in `0.0..=1.0`; `1.0` when nothing was attempted.
    pub fn ratio(&self) -> f64 {
        if self.attempted_fields.is_empty() {
            1.0
        } else {
            self.recovered_fields.len() as f64 / self.attempted_fields.len() as f64
        }
    }
}

/// Successful result of [`crate::extract::Extractor::extract`].
///
/// A failed extraction is `Err(ExtractError)`; this type only exists for
/// success, which may still be partial (see `retry_info` and `warning`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Final record (pass 1, merged with whatever pass 2 recovered).
    pub record: PropertyRecord,
    /// Sum over every recognition call that returned a response.
    pub usage: TokenUsage,
    /// Present when a recovery pass was attempted.
    pub retry_info: Option<RetryInfo>,
    /// Set when the recovery pass failed and pass 1's record was kept as-is.
    pub warning: Option<String>,
    /// Number of recognition passes issued (1 or 2).
    pub passes: u8,
    /// Wall-clock time of the whole extraction.
    pub duration_ms: u64,
}

impl ExtractionOutcome {
    /// Critical fields still blank in the final record.
    pub fn unresolved_fields(&self) -> Vec<CriticalField> {
        crate::pipeline::validate::missing_fields(&self.record)
    }
}

/// The JSON shape returned to the calling service.
///
/// ```json
/// { "success": true, "data": {...}, "usage": {...}, "retry_info": {...} }
/// { "success": false, "error": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PropertyRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResponse {
    pub fn from_result(result: &Result<ExtractionOutcome, ExtractError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                data: Some(outcome.record.clone()),
                usage: Some(outcome.usage),
                retry_info: outcome.retry_info.clone(),
                warning: outcome.warning.clone(),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                usage: None,
                retry_info: None,
                warning: None,
                error: Some(e.to_string()),
            },
        }
    }
}
