//! Tool and SubAgent catalog implementations
//!
//! The default in-memory registries for tools and sub-agents. Both keep
//! insertion order for deterministic prompt rendering, key entries by their
//! lower-cased trimmed name, and preserve the display name in the spec.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AgentError, Result};
use crate::tools::Tool;
use crate::types::{SubAgent, SubAgentDirectory, ToolRequest, ToolResponse, ToolSpec};

fn registry_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// ToolCatalog is the ordered, name-unique tool registry.
///
/// Lookup is case-insensitive; `specs()` returns registration order.
#[derive(Default)]
pub struct ToolCatalog {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    order: RwLock<Vec<String>>,
}

impl ToolCatalog {
    /// Creates a new empty catalog
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a tool under its lower-cased key.
    /// Empty names are invalid; duplicate names are a conflict.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        let key = registry_key(&spec.name);

        if key.is_empty() {
            return Err(AgentError::InvalidInput("tool name is empty".into()));
        }

        let mut tools = self.tools.write();
        let mut order = self.order.write();

        if tools.contains_key(&key) {
            return Err(AgentError::Conflict(format!(
                "tool {} already registered",
                spec.name
            )));
        }

        tools.insert(key.clone(), tool);
        order.push(key);

        Ok(())
    }

    /// Looks up a tool by name
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let key = registry_key(name);
        self.tools.read().get(&key).map(Arc::clone)
    }

    /// True when a tool with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(&registry_key(name))
    }

    /// Returns a snapshot of all tool specifications in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        let order = self.order.read();
        let tools = self.tools.read();

        order
            .iter()
            .filter_map(|key| tools.get(key).map(|t| t.spec()))
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.read().is_empty()
    }

    /// Invokes a tool by name
    pub async fn invoke(&self, name: &str, req: ToolRequest) -> Result<ToolResponse> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| AgentError::NotFound(format!("tool {name}")))?;
        tool.invoke(req).await
    }
}

/// StaticSubAgentDirectory is the default SubAgentDirectory implementation.
pub struct StaticSubAgentDirectory {
    subagents: RwLock<HashMap<String, Arc<dyn SubAgent>>>,
    order: RwLock<Vec<String>>,
}

impl StaticSubAgentDirectory {
    /// Creates a new empty directory
    pub fn new() -> Self {
        Self {
            subagents: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }
}

impl Default for StaticSubAgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SubAgentDirectory for StaticSubAgentDirectory {
    fn register(&self, subagent: Arc<dyn SubAgent>) -> Result<()> {
        let name = subagent.name();
        let key = registry_key(&name);

        if key.is_empty() {
            return Err(AgentError::InvalidInput("sub-agent name is empty".into()));
        }

        let mut subagents = self.subagents.write();
        let mut order = self.order.write();

        if subagents.contains_key(&key) {
            return Err(AgentError::Conflict(format!(
                "sub-agent {name} already registered"
            )));
        }

        subagents.insert(key.clone(), subagent);
        order.push(key);

        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn SubAgent>> {
        let key = registry_key(name);
        self.subagents.read().get(&key).map(Arc::clone)
    }

    fn all(&self) -> Vec<Arc<dyn SubAgent>> {
        let order = self.order.read();
        let subagents = self.subagents.read();

        order
            .iter()
            .filter_map(|key| subagents.get(key).map(Arc::clone))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct TestTool {
        name: String,
    }

    #[async_trait]
    impl Tool for TestTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: "Test tool".into(),
                input_schema: serde_json::json!({}),
                examples: None,
            }
        }

        async fn invoke(&self, _req: ToolRequest) -> Result<ToolResponse> {
            Ok(ToolResponse {
                content: "test".into(),
                metadata: None,
            })
        }
    }

    #[test]
    fn catalog_registers_and_lookups_tools() {
        let catalog = ToolCatalog::new();
        catalog
            .register(Arc::new(TestTool {
                name: "Test.Tool".into(),
            }))
            .unwrap();

        assert!(catalog.lookup("test.tool").is_some());
        assert!(catalog.lookup("TEST.TOOL").is_some());
        assert!(catalog.lookup("unknown").is_none());
        // Display name keeps its original casing.
        assert_eq!(catalog.specs()[0].name, "Test.Tool");
    }

    #[test]
    fn catalog_rejects_duplicates_and_empty_names() {
        let catalog = ToolCatalog::new();
        catalog
            .register(Arc::new(TestTool {
                name: "test.tool".into(),
            }))
            .unwrap();

        let dup = catalog.register(Arc::new(TestTool {
            name: "TEST.tool".into(),
        }));
        assert!(matches!(dup, Err(AgentError::Conflict(_))));

        let empty = catalog.register(Arc::new(TestTool { name: "  ".into() }));
        assert!(matches!(empty, Err(AgentError::InvalidInput(_))));
    }

    #[test]
    fn catalog_specs_keep_registration_order() {
        let catalog = ToolCatalog::new();
        for name in ["zeta", "alpha", "mid"] {
            catalog
                .register(Arc::new(TestTool { name: name.into() }))
                .unwrap();
        }

        let names: Vec<String> = catalog.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    struct TestSubAgent {
        name: String,
    }

    #[async_trait]
    impl SubAgent for TestSubAgent {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn description(&self) -> String {
            "Test sub-agent".into()
        }

        async fn run(&self, _input: String) -> Result<String> {
            Ok("test output".into())
        }
    }

    #[test]
    fn directory_registers_and_lookups_subagents() {
        let dir = StaticSubAgentDirectory::new();
        dir.register(Arc::new(TestSubAgent {
            name: "researcher".into(),
        }))
        .unwrap();

        assert!(dir.lookup("Researcher").is_some());
        assert!(dir.lookup("unknown").is_none());
    }

    #[test]
    fn directory_prevents_duplicate_registration() {
        let dir = StaticSubAgentDirectory::new();
        dir.register(Arc::new(TestSubAgent {
            name: "researcher".into(),
        }))
        .unwrap();

        let dup = dir.register(Arc::new(TestSubAgent {
            name: "researcher".into(),
        }));
        assert!(matches!(dup, Err(AgentError::Conflict(_))));
    }
}
