use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::llm::chat::ApiMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid role '{0}' (expected 'user', 'assistant' or 'system')")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// A single message in the conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_api(&self) -> ApiMessage {
        ApiMessage::new(self.role.to_string(), self.content.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Append-only message log, optionally pinned to a construction-time system
/// message. Insertion order is the prompt sequence sent to the provider.
pub struct Conversation {
    messages: Vec<Message>,
    system_message: Option<String>,
}

impl Conversation {
    pub fn new(system_message: Option<String>) -> Self {
        let mut conversation = Self {
            messages: Vec::new(),
            system_message,
        };
        if let Some(system) = conversation.system_message.clone() {
            conversation.messages.push(Message::new(Role::System, system));
        }
        conversation
    }

    pub fn add(&mut self, role: Role, content: impl Into<String>) {
        let message = Message::new(role, content);
        debug!(
            "Added {} message: {}",
            message.role,
            message.content.chars().take(50).collect::<String>()
        );
        self.messages.push(message);
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add(Role::User, content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add(Role::Assistant, content);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn api_messages(&self) -> Vec<ApiMessage> {
        self.messages.iter().map(Message::to_api).collect()
    }

    pub fn last_n(&self, n: usize) -> Vec<ApiMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..].iter().map(Message::to_api).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Empty the log. A construction-time system message is reinstated as
    /// the sole remaining entry.
    pub fn clear(&mut self) {
        self.messages.clear();
        if let Some(system) = self.system_message.clone() {
            self.messages.push(Message::new(Role::System, system));
        }
        info!("Conversation history cleared");
    }

    pub fn token_count<F>(&self, count: F) -> u64
    where
        F: Fn(&str) -> u64,
    {
        self.messages.iter().map(|m| count(&m.content)).sum()
    }

    /// Greedy FIFO eviction: drop the oldest non-pinned message until the
    /// estimated total fits the budget or only one message remains. Returns
    /// the number of messages removed.
    pub fn trim_to_token_limit<F>(&mut self, max_tokens: u64, count: F, keep_system: bool) -> usize
    where
        F: Fn(&str) -> u64,
    {
        let mut removed = 0;
        while self.token_count(&count) > max_tokens && self.messages.len() > 1 {
            let Some(idx) = self
                .messages
                .iter()
                .position(|m| !(keep_system && m.role == Role::System))
            else {
                break;
            };
            self.messages.remove(idx);
            removed += 1;
        }
        if removed > 0 {
            info!("Trimmed {} messages to fit token limit", removed);
        }
        removed
    }

    /// Structured export document: ordered role/content/timestamp records.
    pub fn to_json_document(&self) -> serde_json::Value {
        json!({
            "exported_at": Utc::now(),
            "message_count": self.messages.len(),
            "messages": self.messages,
        })
    }

    /// Human-readable transcript.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Conversation Export".to_string(),
            format!("**Exported:** {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
            format!("**Messages:** {}", self.messages.len()),
            String::new(),
            "---".to_string(),
            String::new(),
        ];

        for msg in &self.messages {
            let heading = match msg.role {
                Role::User => "## User",
                Role::Assistant => "## Assistant",
                Role::System => "## System",
            };
            lines.push(heading.to_string());
            lines.push(format!("*{}*", msg.timestamp.format("%H:%M:%S")));
            lines.push(String::new());
            lines.push(msg.content.clone());
            lines.push(String::new());
            lines.push("---".to_string());
            lines.push(String::new());
        }

        lines.join("\n")
    }

    pub fn export_to_json(
        &self,
        path: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let document = serde_json::to_string_pretty(&self.to_json_document())?;
        fs::write(path, document)?;
        info!("Conversation exported to {}", path.display());
        Ok(())
    }

    pub fn export_to_markdown(
        &self,
        path: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        fs::write(path, self.to_markdown())?;
        info!("Conversation exported to {}", path.display());
        Ok(())
    }
}
