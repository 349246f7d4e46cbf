use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::MemoryRecord;

/// Tool specification describing how an agent presents a tool to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<serde_json::Value>>,
}

/// Tool request captures an invocation request
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub session_id: String,
    pub arguments: HashMap<String, serde_json::Value>,
}

/// Tool response represents the structured response from a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// File attachment passed alongside a user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl File {
    /// Attachments with a text-ish MIME type are inlined into the prompt;
    /// everything else is referenced by name and type only.
    pub fn is_text(&self) -> bool {
        let mime = self.mime_type.to_lowercase();
        mime.starts_with("text/")
            || mime == "application/json"
            || mime == "application/xml"
            || mime == "application/yaml"
            || mime.ends_with("+json")
            || mime.ends_with("+xml")
    }
}

/// Generation response from a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub metadata: Option<HashMap<String, String>>,
}

/// One increment of a streamed reply. The final chunk carries `done = true`
/// together with the aggregated text, or an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            aggregated: None,
            error: None,
        }
    }

    pub fn finished(aggregated: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            done: true,
            aggregated: Some(aggregated.into()),
            error: None,
        }
    }

    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            done: true,
            aggregated: None,
            error: Some(err.into()),
        }
    }
}

/// Configuration options for creating an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOptions {
    pub system_prompt: Option<String>,
    pub context_limit: Option<usize>,
    /// How many memories the prompt assembler asks the engine for.
    pub retrieval_k: Option<usize>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            context_limit: Some(8192),
            retrieval_k: Some(6),
        }
    }
}

/// Serialized agent state produced by `Agent::checkpoint`.
///
/// Long-term store content is deliberately absent; it is assumed durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub system_prompt: String,
    pub context_limit: usize,
    pub retrieval_k: usize,
    pub joined_spaces: Vec<String>,
    pub short_term: HashMap<String, Vec<MemoryRecord>>,
    pub timestamp: DateTime<Utc>,
}

/// SubAgent is a specialist the agent can delegate a task to in-process.
#[async_trait::async_trait]
pub trait SubAgent: Send + Sync {
    fn name(&self) -> String;
    fn description(&self) -> String;
    async fn run(&self, input: String) -> Result<String>;
}

/// Directory of registered sub-agents, ordered by registration.
pub trait SubAgentDirectory: Send + Sync {
    fn register(&self, subagent: Arc<dyn SubAgent>) -> Result<()>;
    fn lookup(&self, name: &str) -> Option<Arc<dyn SubAgent>>;
    fn all(&self) -> Vec<Arc<dyn SubAgent>>;
}
