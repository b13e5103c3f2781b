pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use futures::{Future, Stream};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

use self::anthropic::AnthropicProvider;
use self::openai::OpenAiProvider;
use super::error::{backoff_delay, ProviderError};
use super::{ProviderConfig, ProviderKind};

/// Wire-format message: what actually goes over HTTP to either provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Lazy, finite, non-restartable sequence of reply fragments. The transport
/// session stays open while the stream is polled and is released when the
/// stream is dropped.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate a complete reply to the message sequence.
    async fn generate(&self, messages: &[ApiMessage]) -> Result<String, ProviderError>;

    /// Generate a reply as a stream of text fragments.
    async fn generate_stream(&self, messages: &[ApiMessage]) -> Result<TokenStream, ProviderError>;

    /// Approximate token count for billing purposes.
    fn count_tokens(&self, text: &str) -> u64;

    /// Estimated USD cost of a call with the given token counts.
    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64;

    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;
}

pub fn new_provider(config: &ProviderConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let provider: Arc<dyn ChatProvider> = match config.kind {
        ProviderKind::OpenAI => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
    };
    Ok(provider)
}

/// Run one logical request, retrying transient failures with exponential
/// backoff. The per-attempt operation is rebuilt on every call; the decision
/// whether to retry lives entirely in [`backoff_delay`].
pub(crate) async fn retry_request<T, F, Fut>(
    provider: &'static str,
    max_retries: u32,
    mut attempt_call: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 0;
    loop {
        debug!("{} API call attempt {}/{}", provider, attempt + 1, max_retries);
        match attempt_call(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff_delay(&err, attempt, max_retries) {
                Some(delay) => {
                    warn!(
                        "{} call failed: {}. Retrying in {} seconds...",
                        provider,
                        err,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
        }
    }
}

/// Classify a response status before the body is consumed: 429 becomes
/// `RateLimited`, other non-success statuses become `Status`.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        let message = resp.text().await.unwrap_or_default();
        return Err(ProviderError::RateLimited { message });
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

/// Map a reqwest send-phase failure: anything that prevented a response from
/// arriving counts as a transport fault.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}
