use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{check_status, retry_request, transport_error, ApiMessage, ChatProvider, TokenStream};
use crate::llm::error::ProviderError;
use crate::llm::pricing;
use crate::llm::{ProviderConfig, ProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: HttpClient,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic keeps the system prompt out of the messages array: pull it into
/// the top-level `system` field. Pure transform, last system message wins.
fn split_system(messages: &[ApiMessage]) -> (Option<String>, Vec<ApiMessage>) {
    let mut system = None;
    let mut rest = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == "system" {
            system = Some(msg.content.clone());
        } else {
            rest.push(msg.clone());
        }
    }
    (system, rest)
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Config("Anthropic API key is required".to_string()))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "claude-3-5-haiku-20241022".to_string());
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| ProviderError::Config(format!("Invalid API key format: {}", e)))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            http,
            model,
            base_url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[ApiMessage], stream: bool) -> MessagesRequest {
        let (system, converted) = split_system(messages);
        MessagesRequest {
            model: self.model.clone(),
            messages: converted,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system,
            stream: stream.then_some(true),
        }
    }

    async fn request_once(
        &self,
        url: &str,
        req: &MessagesRequest,
    ) -> Result<String, ProviderError> {
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            info!(
                "Anthropic tokens - Input: {}, Output: {}",
                usage.input_tokens, usage.output_tokens
            );
        }

        let content = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn open_stream(
        &self,
        url: &str,
        req: &MessagesRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn generate(&self, messages: &[ApiMessage]) -> Result<String, ProviderError> {
        let url = self.messages_url();
        let req = self.request_body(messages, false);
        retry_request("anthropic", self.max_retries, |_| {
            self.request_once(&url, &req)
        })
        .await
    }

    async fn generate_stream(&self, messages: &[ApiMessage]) -> Result<TokenStream, ProviderError> {
        let url = self.messages_url();
        let req = self.request_body(messages, true);
        let resp = retry_request("anthropic", self.max_retries, |_| {
            self.open_stream(&url, &req)
        })
        .await?;

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        if let Ok(text) = String::from_utf8(chunk.to_vec()) {
                            for line in text.lines() {
                                let Some(data) = line.strip_prefix("data: ") else {
                                    continue;
                                };
                                match serde_json::from_str::<StreamEvent>(data) {
                                    Ok(event) => match event.event_type.as_str() {
                                        "content_block_delta" => {
                                            let fragment = event
                                                .delta
                                                .and_then(|d| d.text)
                                                .unwrap_or_default();
                                            if !fragment.is_empty()
                                                && tx.send(Ok(fragment)).await.is_err()
                                            {
                                                return;
                                            }
                                        }
                                        "message_stop" => return,
                                        _ => {}
                                    },
                                    Err(e) => {
                                        warn!("Failed to parse Anthropic chunk: {} ({})", data, e);
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(transport_error(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// No public tokenizer for this model family: roughly 4 bytes per token.
    fn count_tokens(&self, text: &str) -> u64 {
        (text.len() / 4) as u64
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        pricing::estimate_cost(
            ProviderKind::Anthropic,
            &self.model,
            input_tokens,
            output_tokens,
        )
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
