//! Tool Calling Protocol integration
//!
//! The external tool bus is consumed through the [`ToolProtocol`] trait;
//! transports are someone else's problem. This module carries the adapter
//! that surfaces protocol tools through the crate's [`Tool`] trait, the
//! namespace-merge rules, and an in-process protocol implementation used by
//! tests, demos, and agent-as-provider registration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::tools::Tool;
use crate::catalog::ToolCatalog;
use crate::types::{ToolRequest, ToolResponse, ToolSpec};

/// A streamed tool result. `next` yields chunks until it returns `None`.
#[async_trait]
pub trait ToolStream: Send {
    async fn next(&mut self) -> anyhow::Result<Option<Value>>;
}

/// Handler type for in-process protocol tools.
pub type ProviderHandler =
    Arc<dyn Fn(HashMap<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A provider of tools on the bus. Providers that can run in-process expose
/// a handler per tool; transport-backed providers return `None` and are
/// dispatched by the concrete protocol client.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> String;
    fn tools(&self) -> Vec<ToolSpec>;
    fn handler(&self, tool_name: &str) -> Option<ProviderHandler>;
}

/// Client interface of the external Tool Calling Protocol.
///
/// Errors cross this boundary as `anyhow::Error` and are wrapped into
/// [`AgentError::Upstream`] at the crate edge.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn search_tools(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ToolSpec>>;

    async fn call_tool(
        &self,
        tool_name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<Value>;

    async fn call_tool_stream(
        &self,
        tool_name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<Box<dyn ToolStream>>;

    async fn register_tool_provider(
        &self,
        provider: Arc<dyn ToolProvider>,
    ) -> anyhow::Result<Vec<ToolSpec>>;

    async fn deregister_tool_provider(&self, provider_name: &str) -> anyhow::Result<()>;
}

/// Renders a protocol result as tool-response text: string payloads pass
/// through, everything else serializes to JSON.
pub fn value_to_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}

/// Drains a tool stream to EOF, concatenating chunk text.
pub async fn aggregate_stream(mut stream: Box<dyn ToolStream>) -> Result<String> {
    let mut aggregated = String::new();
    loop {
        match stream.next().await {
            Ok(Some(chunk)) => aggregated.push_str(&value_to_content(&chunk)),
            Ok(None) => break,
            Err(e) => return Err(AgentError::upstream(e)),
        }
    }
    Ok(aggregated)
}

/// Adapter that exposes a protocol-discovered tool through the [`Tool`] trait.
pub struct ProtocolToolAdapter {
    client: Arc<dyn ToolProtocol>,
    spec: ToolSpec,
}

impl ProtocolToolAdapter {
    pub fn new(client: Arc<dyn ToolProtocol>, spec: ToolSpec) -> Self {
        Self { client, spec }
    }
}

#[async_trait]
impl Tool for ProtocolToolAdapter {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse> {
        let result = self
            .client
            .call_tool(&self.spec.name, req.arguments)
            .await
            .map_err(AgentError::upstream)?;

        Ok(ToolResponse {
            content: value_to_content(&result),
            metadata: Some(HashMap::from([(
                "provider".to_string(),
                "protocol".to_string(),
            )])),
        })
    }
}

/// Merges protocol tools into the catalog namespace.
///
/// Locally registered tools win on name collision: a protocol tool whose
/// name is already taken is skipped, so `specs()` stays a superset of both
/// sources while `lookup` keeps resolving to the local implementation.
pub fn merge_protocol_tools(
    catalog: &ToolCatalog,
    client: Arc<dyn ToolProtocol>,
    tools: Vec<ToolSpec>,
) -> Result<Vec<ToolSpec>> {
    let mut merged = Vec::new();
    for spec in tools {
        if catalog.contains(&spec.name) {
            tracing::debug!(tool = %spec.name, "local tool shadows protocol tool");
            continue;
        }
        let adapter = ProtocolToolAdapter::new(Arc::clone(&client), spec.clone());
        catalog.register(Arc::new(adapter))?;
        merged.push(spec);
    }
    Ok(merged)
}

/// In-process tool paired with its handler.
#[derive(Clone)]
struct InProcessTool {
    spec: ToolSpec,
    handler: ProviderHandler,
}

struct SingleChunkStream {
    chunk: Option<Value>,
}

#[async_trait]
impl ToolStream for SingleChunkStream {
    async fn next(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(self.chunk.take())
    }
}

/// Protocol client backed entirely by in-process handlers.
///
/// Stream calls yield the handler result as a single chunk followed by EOF.
#[derive(Default)]
pub struct InProcessProtocol {
    providers: RwLock<HashMap<String, Vec<InProcessTool>>>,
}

impl InProcessProtocol {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    fn find_handler(&self, tool_name: &str) -> Option<ProviderHandler> {
        let guard = self.providers.read();
        for tools in guard.values() {
            let hit = tools.iter().find(|t| {
                t.spec.name == tool_name
                    || t.spec
                        .name
                        .rsplit('.')
                        .next()
                        .map(|suffix| suffix == tool_name)
                        .unwrap_or(false)
            });
            if let Some(tool) = hit {
                return Some(Arc::clone(&tool.handler));
            }
        }
        None
    }
}

#[async_trait]
impl ToolProtocol for InProcessProtocol {
    async fn search_tools(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ToolSpec>> {
        let query = query.trim().to_lowercase();
        let guard = self.providers.read();
        let mut specs: Vec<ToolSpec> = guard
            .values()
            .flatten()
            .map(|t| t.spec.clone())
            .filter(|s| {
                query.is_empty()
                    || s.name.to_lowercase().contains(&query)
                    || s.description.to_lowercase().contains(&query)
            })
            .collect();
        if limit > 0 {
            specs.truncate(limit);
        }
        Ok(specs)
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<Value> {
        let handler = self
            .find_handler(tool_name)
            .ok_or_else(|| anyhow::anyhow!("unknown tool {tool_name}"))?;
        handler(args).await
    }

    async fn call_tool_stream(
        &self,
        tool_name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<Box<dyn ToolStream>> {
        let result = self.call_tool(tool_name, args).await?;
        Ok(Box::new(SingleChunkStream {
            chunk: Some(result),
        }))
    }

    async fn register_tool_provider(
        &self,
        provider: Arc<dyn ToolProvider>,
    ) -> anyhow::Result<Vec<ToolSpec>> {
        let name = provider.name();
        let specs = provider.tools();

        let mut tools = Vec::with_capacity(specs.len());
        for spec in &specs {
            let handler = provider
                .handler(&spec.name)
                .ok_or_else(|| anyhow::anyhow!("provider {name} has no handler for {}", spec.name))?;
            tools.push(InProcessTool {
                spec: spec.clone(),
                handler,
            });
        }

        self.providers.write().insert(name, tools);
        Ok(specs)
    }

    async fn deregister_tool_provider(&self, provider_name: &str) -> anyhow::Result<()> {
        self.providers.write().remove(provider_name);
        Ok(())
    }
}
