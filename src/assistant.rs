use chrono::Utc;
use futures::StreamExt;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error as ThisError;

use crate::cli::Args;
use crate::conversation::{Conversation, ExportFormat};
use crate::cost::CostTracker;
use crate::llm::chat::{new_provider, ChatProvider};
use crate::llm::ProviderKind;

/// Raised when the hard cost limit forbids another call. The user message is
/// not appended; the presentation layer reports the refusal.
#[derive(Debug, ThisError)]
#[error("hard cost limit of ${limit:.2} reached; no further API calls allowed")]
pub struct CostLimitReached {
    pub limit: f64,
}

/// Outcome of one completed exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub reply: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// One conversation, one cost ledger, one active provider. Owns everything
/// exclusively; no state is shared across instances.
pub struct Assistant {
    providers: HashMap<&'static str, Arc<dyn ChatProvider>>,
    active: Arc<dyn ChatProvider>,
    conversation: Conversation,
    costs: CostTracker,
    context_token_limit: u64,
    export_dir: PathBuf,
}

impl Assistant {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut providers: HashMap<&'static str, Arc<dyn ChatProvider>> = HashMap::new();

        for kind in [ProviderKind::OpenAI, ProviderKind::Anthropic] {
            let config = args.provider_config(kind);
            if config.api_key.is_none() {
                continue;
            }
            match new_provider(&config) {
                Ok(provider) => {
                    info!(
                        "{} provider initialized: Model={}",
                        kind,
                        provider.model()
                    );
                    providers.insert(provider.provider_name(), provider);
                }
                Err(e) => error!("Failed to initialize {} provider: {}", kind, e),
            }
        }

        if providers.is_empty() {
            return Err("No providers available. Please configure at least one API key.".into());
        }

        let active = match providers.get(args.provider.as_str()) {
            Some(provider) => Arc::clone(provider),
            None => {
                let fallback = ["openai", "anthropic"]
                    .into_iter()
                    .find_map(|name| providers.get(name))
                    .ok_or("No providers available. Please configure at least one API key.")?;
                warn!(
                    "Provider {} not available, using {}",
                    args.provider,
                    fallback.provider_name()
                );
                Arc::clone(fallback)
            }
        };
        info!("Using {} provider", active.provider_name());

        Ok(Self {
            providers,
            active,
            conversation: Conversation::new(args.system_prompt.clone()),
            costs: CostTracker::new(args.cost_warning_threshold, args.cost_hard_limit),
            context_token_limit: args.context_token_limit,
            export_dir: PathBuf::from(&args.export_dir),
        })
    }

    pub fn provider_name(&self) -> &'static str {
        self.active.provider_name()
    }

    pub fn model(&self) -> String {
        self.active.model().to_string()
    }

    pub fn available_providers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort();
        names
    }

    pub fn switch_provider(&mut self, name: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        match self.providers.get(name) {
            Some(provider) => {
                self.active = Arc::clone(provider);
                info!("Switched to {} provider", name);
                Ok(())
            }
            None => Err(format!(
                "Provider '{}' is not available (configured: {})",
                name,
                self.available_providers().join(", ")
            )
            .into()),
        }
    }

    /// The hard-limit gate. Callers check this before prompting for input;
    /// [`send`](Self::send) enforces it regardless.
    pub fn can_spend(&self) -> bool {
        self.costs.check_hard_limit()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    pub fn cost_summary(&self) -> String {
        self.costs.format_summary()
    }

    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }

    pub fn reset_costs(&mut self) {
        self.costs.reset();
    }

    /// One full exchange: gate, append the user message, send the whole
    /// history, append the reply, and account for the cost.
    pub async fn send(&mut self, text: &str) -> Result<Exchange, Box<dyn Error + Send + Sync>> {
        let (messages, input_tokens) = self.prepare_request(text)?;
        let reply = self.active.generate(&messages).await?;
        Ok(self.record_exchange(reply, input_tokens))
    }

    /// Streaming variant: `on_fragment` observes each fragment as it
    /// arrives; bookkeeping runs on the concatenated reply.
    pub async fn send_streaming<F>(
        &mut self,
        text: &str,
        mut on_fragment: F,
    ) -> Result<Exchange, Box<dyn Error + Send + Sync>>
    where
        F: FnMut(&str),
    {
        let (messages, input_tokens) = self.prepare_request(text)?;

        let mut stream = self.active.generate_stream(&messages).await?;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            reply.push_str(&fragment);
        }

        Ok(self.record_exchange(reply, input_tokens))
    }

    fn prepare_request(
        &mut self,
        text: &str,
    ) -> Result<(Vec<crate::llm::chat::ApiMessage>, u64), Box<dyn Error + Send + Sync>> {
        if !self.costs.check_hard_limit() {
            let limit = self.costs.hard_limit().unwrap_or_default();
            return Err(Box::new(CostLimitReached { limit }));
        }

        self.conversation.add_user(text);

        if self.context_token_limit > 0 {
            let provider = Arc::clone(&self.active);
            self.conversation.trim_to_token_limit(
                self.context_token_limit,
                |s| provider.count_tokens(s),
                true,
            );
        }

        let messages = self.conversation.api_messages();
        let input_tokens = messages
            .iter()
            .map(|m| self.active.count_tokens(&m.content))
            .sum();
        Ok((messages, input_tokens))
    }

    fn record_exchange(&mut self, reply: String, input_tokens: u64) -> Exchange {
        self.conversation.add_assistant(&reply);

        let output_tokens = self.active.count_tokens(&reply);
        let cost = self.active.estimate_cost(input_tokens, output_tokens);
        self.costs.add_cost(
            self.active.provider_name(),
            self.active.model(),
            input_tokens,
            output_tokens,
            cost,
        );
        info!(
            "API call completed - Cost: ${:.6}, Tokens: {}/{}",
            cost, input_tokens, output_tokens
        );

        Exchange {
            reply,
            provider: self.active.provider_name().to_string(),
            model: self.active.model().to_string(),
            input_tokens,
            output_tokens,
            cost,
        }
    }

    /// Write the conversation to a timestamped file in the export directory
    /// and return its path.
    pub fn export(&self, format: ExportFormat) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        self.export_to_dir(format, &self.export_dir)
    }

    pub fn export_to_dir(
        &self,
        format: ExportFormat,
        dir: &Path,
    ) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("conversation_{}.{}", timestamp, format.extension()));
        match format {
            ExportFormat::Json => self.conversation.export_to_json(&path)?,
            ExportFormat::Markdown => self.conversation.export_to_markdown(&path)?,
        }
        Ok(path)
    }
}
