//! The Recognition Client seam and its VLM adapter.
//!
//! The orchestrator only ever talks to [`RecognitionClient`]: a request holds
//! the images, the two prompts and an output-token budget, and the answer is
//! the model's raw text plus token usage. [`LlmRecognitionClient`] is the
//! production implementation on top of an `edgequake_llm` provider; tests
//! substitute scripted clients.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Each attempt runs under `api_timeout_secs`; a failed or
//! timed-out attempt is retried after `retry_backoff_ms * 2^(attempt-1)`.
//! With 500 ms base and 2 retries the wait sequence is 500 ms → 1 s.

use crate::config::ExtractionConfig;
use crate::error::RecognitionError;
use crate::output::TokenUsage;
use crate::pipeline::encode::{to_image_data, ImageAsset};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One call to the vision model.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub images: Vec<ImageAsset>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: usize,
}

/// Raw model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Anything that can look at images and answer a prompt with text.
#[async_trait]
pub trait RecognitionClient: Send + Sync {
    async fn recognize(
        &self,
        request: &RecognitionRequest,
    ) -> Result<RecognitionResponse, RecognitionError>;
}

#[async_trait]
impl<T: RecognitionClient + ?Sized> RecognitionClient for Arc<T> {
    async fn recognize(
        &self,
        request: &RecognitionRequest,
    ) -> Result<RecognitionResponse, RecognitionError> {
        (**self).recognize(request).await
    }
}

/// Attempt budget shared by every call a client makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl From<&ExtractionConfig> for RetryPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// [`RecognitionClient`] backed by an `edgequake_llm` chat provider.
#[derive(Clone)]
pub struct LlmRecognitionClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    policy: RetryPolicy,
}

impl fmt::Debug for LlmRecognitionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmRecognitionClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("policy", &self.policy)
            .finish()
    }
}

impl LlmRecognitionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            policy: RetryPolicy::from(config),
        }
    }
}

#[async_trait]
impl RecognitionClient for LlmRecognitionClient {
    async fn recognize(
        &self,
        request: &RecognitionRequest,
    ) -> Result<RecognitionResponse, RecognitionError> {
        let start = Instant::now();

        let images = request.images.iter().map(to_image_data).collect();
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user_with_images(request.user_prompt.as_str(), images),
        ];
        let options = build_options(self.temperature, request.max_output_tokens);

        let provider = &self.provider;
        let messages = &messages;
        let options = &options;
        let response = call_with_retries(self.policy, || async move {
            provider
                .chat(messages, Some(options))
                .await
                .map_err(|e| e.to_string())
        })
        .await?;

        let usage = TokenUsage {
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        };
        debug!(
            "{} image(s): {} input tokens, {} output tokens, {:?}",
            request.images.len(),
            usage.input_tokens,
            usage.output_tokens,
            start.elapsed()
        );

        Ok(RecognitionResponse {
            text: response.content,
            usage,
        })
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Run `call` up to `max_retries + 1` times with exponential backoff.
///
/// Each attempt is bounded by `timeout_secs`. The error reflects the last
/// attempt: `Timeout` if it timed out, `Provider` otherwise.
pub(crate) async fn call_with_retries<T, F, Fut>(
    policy: RetryPolicy,
    mut call: F,
) -> Result<T, RecognitionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_err = RecognitionError::Provider {
        attempts: 0,
        detail: "Unknown error".to_string(),
    };

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Recognition retry {}/{} after {}ms",
                attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(Duration::from_secs(policy.timeout_secs), call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(detail)) => {
                warn!("Recognition attempt {} failed: {}", attempt + 1, detail);
                last_err = RecognitionError::Provider {
                    attempts: attempt + 1,
                    detail,
                };
            }
            Err(_) => {
                warn!(
                    "Recognition attempt {} timed out after {}s",
                    attempt + 1,
                    policy.timeout_secs
                );
                last_err = RecognitionError::Timeout {
                    secs: policy.timeout_secs,
                };
            }
        }
    }

    Err(last_err)
}
