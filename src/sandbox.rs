//! Sandboxed code execution capability.
//!
//! The kit does not ship an interpreter; it defines the capability contract
//! and the exact surface exposed to sandboxed code: `call_tool` and
//! `call_tool_stream`, both routed through the Tool Calling Protocol.
//! Concrete sandboxes are wired in from outside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{aggregate_stream, ToolProtocol};

/// Default deadline for a sandboxed snippet.
pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(20);

/// The only capabilities visible from inside the sandbox.
pub struct SandboxCapabilities {
    protocol: Option<Arc<dyn ToolProtocol>>,
}

impl SandboxCapabilities {
    pub fn new(protocol: Option<Arc<dyn ToolProtocol>>) -> Self {
        Self { protocol }
    }

    /// Synchronous-style tool call routed through the protocol.
    pub async fn call_tool(
        &self,
        name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<Value> {
        match &self.protocol {
            Some(protocol) => protocol.call_tool(name, args).await,
            None => Err(anyhow::anyhow!("no tool protocol wired into the sandbox")),
        }
    }

    /// Streaming tool call, drained to EOF; the concatenation is returned.
    pub async fn call_tool_stream(
        &self,
        name: &str,
        args: HashMap<String, Value>,
    ) -> anyhow::Result<String> {
        match &self.protocol {
            Some(protocol) => {
                let stream = protocol.call_tool_stream(name, args).await?;
                aggregate_stream(stream)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))
            }
            None => Err(anyhow::anyhow!("no tool protocol wired into the sandbox")),
        }
    }
}

/// An isolated code-execution engine.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    /// Runs a snippet with access to `capabilities` only, under `timeout`.
    async fn execute(
        &self,
        code: &str,
        capabilities: Arc<SandboxCapabilities>,
        timeout: Duration,
    ) -> anyhow::Result<Value>;
}
