//! LLM-driven orchestration: tool selection and chain planning.
//!
//! Both surfaces ask the model for strict JSON and treat anything that does
//! not parse as "no decision", so the pipeline falls through to plain
//! completion instead of failing the turn.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::chain::ChainPlan;
use crate::error::Result;
use crate::helpers::{extract_json, strip_code_fence};
use crate::models::LLM;
use crate::types::{Message, Role, ToolSpec};

/// The strict-JSON reply shape requested for tool selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolDecision {
    #[serde(default)]
    pub use_tool: bool,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
    #[serde(default)]
    pub reason: String,
}

/// Orchestrator that decides, with one model call, whether a turn should
/// route through a tool and which one.
pub struct ToolOrchestrator {
    llm: Arc<dyn LLM>,
}

impl ToolOrchestrator {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self { llm }
    }

    fn manifest(tools: &[ToolSpec]) -> String {
        let mut out = String::new();
        for spec in tools {
            let schema = serde_json::to_string(&spec.input_schema).unwrap_or_default();
            out.push_str(&format!("- {}: {} | input: {}\n", spec.name, spec.description, schema));
        }
        out
    }

    /// Issues the tool-selection call. Any model or parse failure yields
    /// `None` so the caller can fall through silently.
    pub async fn select_tool(&self, user_input: &str, tools: &[ToolSpec]) -> Option<ToolDecision> {
        if tools.is_empty() {
            return None;
        }

        let prompt = format!(
            "You route user requests to tools.\n\
             Tools:\n{}\n\
             User request: {}\n\n\
             Reply with STRICT JSON only, no prose:\n\
             {{\"use_tool\": bool, \"tool_name\": string, \"arguments\": object, \"reason\": string}}\n\
             Set use_tool to false when no tool fits.",
            Self::manifest(tools),
            user_input,
        );

        let response = match self
            .llm
            .generate(
                vec![Message {
                    role: Role::User,
                    content: prompt,
                    metadata: None,
                }],
                None,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "tool selection call failed, falling through");
                return None;
            }
        };

        let raw = strip_code_fence(&response.content);
        let json = extract_json(&raw)?;
        serde_json::from_str::<ToolDecision>(&json).ok()
    }

    /// Asks the model to turn a raw tool result into a user-facing reply.
    pub async fn compose_reply(
        &self,
        user_input: &str,
        tool_name: &str,
        tool_output: &str,
    ) -> Result<String> {
        let prompt = format!(
            "The user asked: {user_input}\n\
             The tool `{tool_name}` returned:\n{tool_output}\n\n\
             Compose a concise, user-facing answer from this result."
        );

        let response = self
            .llm
            .generate(
                vec![Message {
                    role: Role::User,
                    content: prompt,
                    metadata: None,
                }],
                None,
            )
            .await?;
        Ok(response.content)
    }

    /// Asks the model for a multi-step chain plan. `None` means "no chain":
    /// the model declined, the reply did not parse, or the plan was empty.
    pub async fn plan_chain(&self, user_input: &str, tools: &[ToolSpec]) -> Option<ChainPlan> {
        if tools.is_empty() {
            return None;
        }

        let prompt = format!(
            "You plan multi-step tool chains.\n\
             Tools:\n{}\n\
             User request: {}\n\n\
             Reply with STRICT JSON only:\n\
             {{\"use_chain\": bool, \"steps\": [{{\"tool_name\": string, \"inputs\": object, \
             \"use_previous\": bool, \"stream\": bool, \"id\": string}}], \"timeout\": int_ms}}\n\
             Set use_chain to false when one tool call or none suffices.",
            Self::manifest(tools),
            user_input,
        );

        let response = match self
            .llm
            .generate(
                vec![Message {
                    role: Role::User,
                    content: prompt,
                    metadata: None,
                }],
                None,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "chain planning call failed, falling through");
                return None;
            }
        };

        let raw = strip_code_fence(&response.content);
        let json = extract_json(&raw)?;
        let plan: ChainPlan = serde_json::from_str(&json).ok()?;
        (plan.use_chain && !plan.steps.is_empty()).then_some(plan)
    }
}
