use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{check_status, retry_request, transport_error, ApiMessage, ChatProvider, TokenStream};
use crate::llm::error::ProviderError;
use crate::llm::pricing;
use crate::llm::{ProviderConfig, ProviderKind};

pub struct OpenAiProvider {
    http: HttpClient,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    encoding: CoreBPE,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Config("OpenAI API key is required".to_string()))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| ProviderError::Config(format!("Invalid API key format: {}", e)))?,
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let encoding = match tiktoken_rs::get_bpe_from_model(&model) {
            Ok(bpe) => bpe,
            Err(_) => {
                warn!("Model {} not found, using cl100k_base encoding", model);
                tiktoken_rs::cl100k_base()
                    .map_err(|e| ProviderError::Config(format!("tokenizer init failed: {}", e)))?
            }
        };

        Ok(Self {
            http,
            model,
            base_url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            encoding,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ApiMessage], stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn request_once(
        &self,
        url: &str,
        req: &ChatCompletionRequest,
    ) -> Result<String, ProviderError> {
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            info!(
                "OpenAI tokens - Input: {}, Output: {}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = parsed
            .choices
            .first()
            .ok_or_else(|| ProviderError::InvalidResponse("No response from OpenAI API".to_string()))?
            .message
            .content
            .clone()
            .unwrap_or_default();

        Ok(content)
    }

    async fn open_stream(
        &self,
        url: &str,
        req: &ChatCompletionRequest,
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
impl ChatProvider for OpenAiProvider {
    async fn generate(&self, messages: &[ApiMessage]) -> Result<String, ProviderError> {
        let url = self.completions_url();
        let req = self.request_body(messages, false);
        retry_request("openai", self.max_retries, |_| self.request_once(&url, &req)).await
    }

    async fn generate_stream(&self, messages: &[ApiMessage]) -> Result<TokenStream, ProviderError> {
        let url = self.completions_url();
        let req = self.request_body(messages, true);
        let resp =
            retry_request("openai", self.max_retries, |_| self.open_stream(&url, &req)).await?;

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        if let Ok(text) = String::from_utf8(chunk.to_vec()) {
                            for line in text.lines() {
                                if line.is_empty() || line == "data: [DONE]" {
                                    continue;
                                }
                                let Some(data) = line.strip_prefix("data: ") else {
                                    continue;
                                };
                                match serde_json::from_str::<StreamResponse>(data) {
                                    Ok(stream_resp) => {
                                        for choice in stream_resp.choices {
                                            if let Some(content) = choice.delta.content {
                                                if !content.is_empty()
                                                    && tx.send(Ok(content)).await.is_err()
                                                {
                                                    return;
                                                }
                                            }
                                            if choice.finish_reason.as_deref() == Some("stop") {
                                                return;
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse OpenAI chunk: {} ({})", data, e);
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

    fn count_tokens(&self, text: &str) -> u64 {
        self.encoding.encode_with_special_tokens(text).len() as u64
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        pricing::estimate_cost(ProviderKind::OpenAI, &self.model, input_tokens, output_tokens)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server_uri: &str, max_retries: u32) -> OpenAiProvider {
        let config = ProviderConfig {
            kind: ProviderKind::OpenAI,
            api_key: Some("sk-test".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            base_url: Some(server_uri.to_string()),
            max_retries,
            ..ProviderConfig::default()
        };
        OpenAiProvider::new(&config).expect("provider")
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })
    }

    #[tokio::test]
    async fn generate_returns_reply_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hi there!")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), 3);
        let reply = provider
            .generate(&[ApiMessage::new("user", "Hello!")])
            .await
            .expect("reply");

        assert_eq!(reply, "Hi there!");
    }

    #[tokio::test]
    async fn rate_limit_then_success_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), 3);
        let start = Instant::now();
        let reply = provider
            .generate(&[ApiMessage::new("user", "retry me")])
            .await
            .expect("reply after retry");

        assert_eq!(reply, "recovered");
        // One backoff of 2^0 seconds between the two attempts.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn client_fault_makes_exactly_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), 3);
        let err = provider
            .generate(&[ApiMessage::new("user", "hello")])
            .await
            .expect_err("404 must fail");

        assert!(matches!(
            err,
            ProviderError::Status { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn empty_choices_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), 3);
        let err = provider
            .generate(&[ApiMessage::new("user", "hello")])
            .await
            .expect_err("empty choices must fail");

        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn generate_stream_yields_fragments_in_order() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), 3);
        let mut stream = provider
            .generate_stream(&[ApiMessage::new("user", "hello")])
            .await
            .expect("stream");

        let mut collected = String::new();
        while let Some(fragment) = stream.next().await {
            collected.push_str(&fragment.expect("fragment"));
        }
        assert_eq!(collected, "Hello");
    }

    #[test]
    fn count_tokens_uses_real_tokenizer() {
        let config = ProviderConfig {
            kind: ProviderKind::OpenAI,
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        };
        let provider = OpenAiProvider::new(&config).expect("provider");

        let count = provider.count_tokens("Hello, world!");
        assert!(count > 0);
        // Longer text never counts fewer tokens.
        let longer = provider.count_tokens("Hello, world! Hello, world! Hello, world!");
        assert!(longer > count);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = ProviderConfig {
            kind: ProviderKind::OpenAI,
            api_key: None,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            OpenAiProvider::new(&config),
            Err(ProviderError::Config(_))
        ));
    }
}
