use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ToolRequest, ToolResponse, ToolSpec};

/// Tool trait for defining custom tools.
///
/// A tool is described by its [`ToolSpec`] and invoked with a session-scoped
/// request. Implementations must be cheap to `spec()` repeatedly; the catalog
/// renders specs on every prompt assembly.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool specification
    fn spec(&self) -> ToolSpec;

    /// Invokes the tool with the given request
    async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse>;
}
