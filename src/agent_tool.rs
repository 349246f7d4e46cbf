//! Agent-as-tool wrappers.
//!
//! Any agent can be offered to another agent either as a locally registered
//! [`Tool`] or as a provider on the Tool Calling Protocol. Both surfaces use
//! the `{instruction, session_id?}` input schema and answer with
//! `{response, session_id}`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::protocol::{ProviderHandler, ToolProvider};
use crate::tools::Tool;
use crate::types::{ToolRequest, ToolResponse, ToolSpec};

/// Provider name for a dotted tool name: the segment before the first dot.
fn provider_prefix(name: &str) -> String {
    name.split('.')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("agent")
        .to_string()
}

/// The invocation schema shared by both wrapper surfaces.
pub fn agent_tool_spec(name: impl Into<String>, description: impl Into<String>) -> ToolSpec {
    ToolSpec {
        name: name.into(),
        description: description.into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "The instruction or query for the agent."
                },
                "session_id": {
                    "type": "string",
                    "description": "Optional session id; defaults to the provider-derived session."
                }
            },
            "required": ["instruction"]
        }),
        examples: None,
    }
}

fn extract_instruction(args: &HashMap<String, Value>) -> Result<String> {
    args.get("instruction")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AgentError::InvalidInput("missing or invalid 'instruction'".into()))
}

fn extract_session(args: &HashMap<String, Value>, default: &str) -> String {
    args.get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// An agent exposed through the local [`Tool`] trait.
pub struct AgentTool {
    agent: Arc<Agent>,
    name: String,
    description: String,
    default_session: String,
}

impl AgentTool {
    pub fn new(agent: Arc<Agent>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let default_session = format!("{}.session", provider_prefix(&name));
        Self {
            agent,
            name,
            description: description.into(),
            default_session,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn spec(&self) -> ToolSpec {
        agent_tool_spec(&self.name, &self.description)
    }

    async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse> {
        let instruction = extract_instruction(&req.arguments)?;
        let session_id = extract_session(&req.arguments, &self.default_session);

        let response = self.agent.generate(&session_id, &instruction).await?;

        Ok(ToolResponse {
            content: json!({"response": response, "session_id": session_id}).to_string(),
            metadata: Some(HashMap::from([(
                "provider".to_string(),
                "agent".to_string(),
            )])),
        })
    }
}

/// An agent offered as an in-process provider on the tool bus.
pub struct AgentProvider {
    agent: Arc<Agent>,
    provider_name: String,
    spec: ToolSpec,
    default_session: String,
}

impl AgentProvider {
    pub fn new(
        agent: Arc<Agent>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let provider_name = provider_prefix(&name);
        let default_session = format!("{provider_name}.session");
        Self {
            agent,
            spec: agent_tool_spec(name, description),
            provider_name,
            default_session,
        }
    }
}

impl ToolProvider for AgentProvider {
    fn name(&self) -> String {
        self.provider_name.clone()
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![self.spec.clone()]
    }

    fn handler(&self, _tool_name: &str) -> Option<ProviderHandler> {
        let agent = Arc::clone(&self.agent);
        let default_session = self.default_session.clone();

        Some(Arc::new(move |args: HashMap<String, Value>| {
            let agent = Arc::clone(&agent);
            let default_session = default_session.clone();
            async move {
                let instruction =
                    extract_instruction(&args).map_err(|e| anyhow::anyhow!(e.to_string()))?;
                let session_id = extract_session(&args, &default_session);

                let response = agent
                    .generate(&session_id, &instruction)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

                Ok(json!({"response": response, "session_id": session_id}))
            }
            .boxed()
        }))
    }
}
