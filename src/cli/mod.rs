use clap::Parser;

use crate::llm::{ProviderConfig, ProviderKind};

/// Sampling temperature must stay within the providers' accepted range.
fn parse_temperature(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|e| format!("invalid temperature '{}': {}", s, e))?;
    if !(0.0..=2.0).contains(&value) {
        return Err(format!(
            "temperature must be between 0.0 and 2.0, got {}",
            value
        ));
    }
    Ok(value)
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|e| format!("invalid cost value '{}': {}", s, e))?;
    if value < 0.0 {
        return Err(format!("cost value must be non-negative, got {}", value));
    }
    Ok(value)
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Provider Args ---
    /// Default LLM provider (openai, anthropic)
    #[arg(long, env = "DEFAULT_PROVIDER", default_value = "openai")]
    pub provider: String,

    /// API key for the OpenAI provider
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub openai_api_key: String,

    /// API key for the Anthropic provider
    #[arg(long, env = "ANTHROPIC_API_KEY", default_value = "", hide_env_values = true)]
    pub anthropic_api_key: String,

    /// Model name for OpenAI chat completion
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// Model name for Anthropic chat completion
    #[arg(long, env = "ANTHROPIC_MODEL", default_value = "claude-3-5-haiku-20241022")]
    pub anthropic_model: String,

    /// Base URL override for the OpenAI API
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Base URL override for the Anthropic API
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    // --- Generation Args ---
    /// Sampling temperature (0.0 to 2.0)
    #[arg(long, env = "TEMPERATURE", default_value = "0.7", value_parser = parse_temperature)]
    pub temperature: f32,

    /// Maximum tokens in a response
    #[arg(long, env = "MAX_TOKENS", default_value = "2000", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_tokens: u32,

    /// API request timeout in seconds
    #[arg(long, env = "TIMEOUT", default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Maximum retry attempts for transient API failures
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    // --- Cost Management Args ---
    /// Cumulative cost (USD) that triggers a one-time warning
    #[arg(long, env = "COST_WARNING_THRESHOLD", default_value = "1.0", value_parser = parse_threshold)]
    pub cost_warning_threshold: f64,

    /// Cumulative cost ceiling (USD) beyond which calls are refused
    #[arg(long, env = "COST_HARD_LIMIT", value_parser = parse_threshold)]
    pub cost_hard_limit: Option<f64>,

    // --- Conversation Args ---
    /// System prompt pinned at the start of the conversation
    #[arg(long, env = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// Trim history to this many estimated tokens before each request (0 disables)
    #[arg(long, env = "CONTEXT_TOKEN_LIMIT", default_value = "0")]
    pub context_token_limit: u64,

    /// Directory conversation exports are written to
    #[arg(long, env = "EXPORT_DIR", default_value = ".")]
    pub export_dir: String,

    // --- Surface Args ---
    /// Stream assistant replies fragment by fragment
    #[arg(long, env = "STREAM", default_value = "false")]
    pub stream: bool,

    /// Run the HTTP API server instead of the interactive prompt
    #[arg(long, env = "SERVE", default_value = "false")]
    pub serve: bool,

    /// Host address and port for the HTTP server to listen on
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,
}

impl Args {
    /// Provider construction values for one backend. Empty API keys become
    /// `None` so an unconfigured provider is simply skipped.
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        let (api_key, model, base_url) = match kind {
            ProviderKind::OpenAI => (
                self.openai_api_key.clone(),
                self.openai_model.clone(),
                self.openai_base_url.clone(),
            ),
            ProviderKind::Anthropic => (
                self.anthropic_api_key.clone(),
                self.anthropic_model.clone(),
                self.anthropic_base_url.clone(),
            ),
        };
        ProviderConfig {
            kind,
            api_key: Some(api_key).filter(|k| !k.is_empty()),
            model: Some(model),
            base_url,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
        }
    }
}
