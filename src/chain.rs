//! Chain executor: runs an LLM-planned, ordered list of tool invocations
//! with optional data passing between steps and per-step streaming.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ToolCatalog;
use crate::error::{AgentError, Result};
use crate::protocol::{aggregate_stream, ToolProtocol};
use crate::types::ToolRequest;

/// Reserved key that carries a scalar previous-step output.
pub const PREVIOUS_OUTPUT_KEY: &str = "__previous_output";

/// Applied when a plan specifies no timeout.
pub const DEFAULT_CHAIN_TIMEOUT_MS: u64 = 60_000;

/// One planned tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub tool_name: String,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub use_previous: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The strict-JSON plan shape requested from the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainPlan {
    #[serde(default)]
    pub use_chain: bool,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
    /// Total execution budget in milliseconds; 0 means the default.
    #[serde(default)]
    pub timeout: u64,
}

/// Outcome of a completed chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// Step id (or tool name) to output.
    pub results: HashMap<String, Value>,
    /// Output of the final step.
    pub last: Value,
    /// Step ids in execution order.
    pub order: Vec<String>,
}

/// Executes validated chains against the merged tool namespace.
pub struct ChainExecutor {
    catalog: Arc<ToolCatalog>,
    protocol: Option<Arc<dyn ToolProtocol>>,
}

impl ChainExecutor {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            protocol: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Arc<dyn ToolProtocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Checks every step against the merged namespace before running any.
    pub fn validate(&self, plan: &ChainPlan) -> Result<()> {
        if plan.steps.is_empty() {
            return Err(AgentError::InvalidInput("chain has no steps".into()));
        }
        for step in &plan.steps {
            if step.tool_name.trim().is_empty() {
                return Err(AgentError::InvalidInput("chain step without tool name".into()));
            }
            if !self.catalog.contains(&step.tool_name) {
                return Err(AgentError::NotFound(format!(
                    "chain step tool {}",
                    step.tool_name
                )));
            }
        }
        Ok(())
    }

    /// Runs the steps strictly in order, feeding outputs forward.
    ///
    /// Map-valued outputs merge into the next step's inputs for keys not
    /// already present; scalar outputs land under [`PREVIOUS_OUTPUT_KEY`].
    /// Streaming steps are drained to EOF and their concatenation becomes
    /// the step output. A failing step surfaces [`AgentError::ChainStep`]
    /// carrying the partial result map.
    pub async fn execute(&self, session_id: &str, plan: &ChainPlan) -> Result<ChainOutcome> {
        self.validate(plan)?;

        let budget = if plan.timeout == 0 {
            DEFAULT_CHAIN_TIMEOUT_MS
        } else {
            plan.timeout
        };
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_millis(budget);

        let ids = step_ids(&plan.steps);
        let mut results: HashMap<String, Value> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut previous: Option<Value> = None;

        for (step, id) in plan.steps.iter().zip(ids) {
            let mut inputs = step.inputs.clone();
            if step.use_previous {
                match &previous {
                    Some(Value::Object(map)) => {
                        for (k, v) in map {
                            inputs.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                    Some(other) => {
                        inputs.insert(PREVIOUS_OUTPUT_KEY.to_string(), other.clone());
                    }
                    None => {}
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(AgentError::ChainStep {
                    step: id,
                    message: "chain timed out".into(),
                    partial: results,
                });
            }

            let output = match tokio::time::timeout(
                remaining,
                self.run_step(session_id, step, &inputs),
            )
            .await
            {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    return Err(AgentError::ChainStep {
                        step: id,
                        message: e.to_string(),
                        partial: results,
                    });
                }
                Err(_) => {
                    return Err(AgentError::ChainStep {
                        step: id,
                        message: "chain timed out".into(),
                        partial: results,
                    });
                }
            };

            results.insert(id.clone(), output.clone());
            order.push(id);
            previous = Some(output);
        }

        Ok(ChainOutcome {
            last: previous.unwrap_or(Value::Null),
            results,
            order,
        })
    }

    async fn run_step(
        &self,
        session_id: &str,
        step: &ChainStep,
        inputs: &HashMap<String, Value>,
    ) -> Result<Value> {
        if step.stream {
            if let Some(protocol) = &self.protocol {
                let stream = protocol
                    .call_tool_stream(&step.tool_name, inputs.clone())
                    .await
                    .map_err(AgentError::upstream)?;
                let aggregated = aggregate_stream(stream).await?;
                return Ok(Value::String(aggregated));
            }
            tracing::debug!(tool = %step.tool_name, "no protocol for streaming step, invoking directly");
        }

        let response = self
            .catalog
            .invoke(
                &step.tool_name,
                ToolRequest {
                    session_id: session_id.to_string(),
                    arguments: inputs.clone(),
                },
            )
            .await?;

        Ok(parse_output(&response.content))
    }
}

/// Step outputs parse as JSON when they are JSON, otherwise pass as text.
fn parse_output(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string()))
}

/// Resolves step ids: the explicit id, else the tool name, with `#N`
/// appended to disambiguate repeats.
fn step_ids(steps: &[ChainStep]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    steps
        .iter()
        .map(|step| {
            let base = step
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| step.tool_name.clone());
            let n = counts.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                base
            } else {
                format!("{base}#{n}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use crate::types::{ToolResponse, ToolSpec};
    use async_trait::async_trait;

    struct MathTool {
        name: &'static str,
        op: fn(f64, f64) -> f64,
    }

    #[async_trait]
    impl Tool for MathTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.to_string(),
                description: "math".into(),
                input_schema: serde_json::json!({"type": "object"}),
                examples: None,
            }
        }

        async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse> {
            let a = req.arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = req
                .arguments
                .get("b")
                .and_then(Value::as_f64)
                .or_else(|| {
                    req.arguments
                        .get(PREVIOUS_OUTPUT_KEY)
                        .and_then(Value::as_f64)
                })
                .unwrap_or(0.0);
            Ok(ToolResponse {
                content: format!("{}", (self.op)(a, b)),
                metadata: None,
            })
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "always.fails".into(),
                description: "fails".into(),
                input_schema: serde_json::json!({}),
                examples: None,
            }
        }

        async fn invoke(&self, _req: ToolRequest) -> Result<ToolResponse> {
            Err(AgentError::Upstream("deliberate failure".into()))
        }
    }

    fn catalog() -> Arc<ToolCatalog> {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register(Arc::new(MathTool {
                name: "math.add",
                op: |a, b| a + b,
            }))
            .unwrap();
        catalog
            .register(Arc::new(MathTool {
                name: "math.multiply",
                op: |a, b| a * b,
            }))
            .unwrap();
        catalog.register(Arc::new(FailTool)).unwrap();
        catalog
    }

    fn step(tool: &str, inputs: serde_json::Value, use_previous: bool) -> ChainStep {
        ChainStep {
            tool_name: tool.into(),
            inputs: inputs
                .as_object()
                .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            use_previous,
            stream: false,
            id: None,
        }
    }

    #[tokio::test]
    async fn chain_passes_scalar_output_forward() {
        let executor = ChainExecutor::new(catalog());
        let plan = ChainPlan {
            use_chain: true,
            steps: vec![
                step("math.add", serde_json::json!({"a": 2, "b": 3}), false),
                step("math.multiply", serde_json::json!({"a": 4}), true),
            ],
            timeout: 0,
        };

        let outcome = executor.execute("s", &plan).await.unwrap();
        assert_eq!(outcome.results["math.add"], serde_json::json!(5));
        assert_eq!(outcome.results["math.multiply"], serde_json::json!(20));
        assert_eq!(outcome.last, serde_json::json!(20));
        assert_eq!(outcome.order, vec!["math.add", "math.multiply"]);
    }

    #[tokio::test]
    async fn map_outputs_merge_only_missing_keys() {
        struct MapTool;

        #[async_trait]
        impl Tool for MapTool {
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: "emit.map".into(),
                    description: "emits a map".into(),
                    input_schema: serde_json::json!({}),
                    examples: None,
                }
            }

            async fn invoke(&self, _req: ToolRequest) -> Result<ToolResponse> {
                Ok(ToolResponse {
                    content: r#"{"a": 99, "extra": "ctx"}"#.into(),
                    metadata: None,
                })
            }
        }

        struct InspectTool;

        #[async_trait]
        impl Tool for InspectTool {
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: "inspect".into(),
                    description: "echoes its arguments".into(),
                    input_schema: serde_json::json!({}),
                    examples: None,
                }
            }

            async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse> {
                Ok(ToolResponse {
                    content: serde_json::to_string(&req.arguments).unwrap(),
                    metadata: None,
                })
            }
        }

        let catalog = Arc::new(ToolCatalog::new());
        catalog.register(Arc::new(MapTool)).unwrap();
        catalog.register(Arc::new(InspectTool)).unwrap();
        let executor = ChainExecutor::new(catalog);

        let plan = ChainPlan {
            use_chain: true,
            steps: vec![
                step("emit.map", serde_json::json!({}), false),
                step("inspect", serde_json::json!({"a": 1}), true),
            ],
            timeout: 0,
        };

        let outcome = executor.execute("s", &plan).await.unwrap();
        let seen = outcome.results["inspect"].as_object().unwrap();
        // Existing key wins; missing keys merge in.
        assert_eq!(seen["a"], serde_json::json!(1));
        assert_eq!(seen["extra"], serde_json::json!("ctx"));
    }

    #[tokio::test]
    async fn failure_surfaces_partial_results() {
        let executor = ChainExecutor::new(catalog());
        let plan = ChainPlan {
            use_chain: true,
            steps: vec![
                step("math.add", serde_json::json!({"a": 1, "b": 1}), false),
                step("always.fails", serde_json::json!({}), false),
                step("math.multiply", serde_json::json!({"a": 2}), true),
            ],
            timeout: 0,
        };

        match executor.execute("s", &plan).await {
            Err(AgentError::ChainStep { step, partial, .. }) => {
                assert_eq!(step, "always.fails");
                assert_eq!(partial["math.add"], serde_json::json!(2));
                assert!(!partial.contains_key("math.multiply"));
            }
            other => panic!("expected chain step error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_validation() {
        let executor = ChainExecutor::new(catalog());
        let plan = ChainPlan {
            use_chain: true,
            steps: vec![step("no.such.tool", serde_json::json!({}), false)],
            timeout: 0,
        };

        assert!(matches!(
            executor.execute("s", &plan).await,
            Err(AgentError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_ids_get_disambiguated() {
        let steps = vec![
            step("math.add", serde_json::json!({}), false),
            step("math.add", serde_json::json!({}), false),
            step("math.add", serde_json::json!({}), false),
        ];
        assert_eq!(step_ids(&steps), vec!["math.add", "math.add#2", "math.add#3"]);
    }

    #[tokio::test]
    async fn streaming_step_aggregates_chunks() {
        use crate::protocol::{InProcessProtocol, ProviderHandler, ToolProvider};
        use futures::FutureExt;

        struct ChunkyProvider;

        impl ToolProvider for ChunkyProvider {
            fn name(&self) -> String {
                "chunky".into()
            }

            fn tools(&self) -> Vec<ToolSpec> {
                vec![ToolSpec {
                    name: "chunky.stream".into(),
                    description: "streams".into(),
                    input_schema: serde_json::json!({}),
                    examples: None,
                }]
            }

            fn handler(&self, _tool_name: &str) -> Option<ProviderHandler> {
                Some(Arc::new(|_args| {
                    async move { Ok(Value::String("streamed-output".into())) }.boxed()
                }))
            }
        }

        let protocol = Arc::new(InProcessProtocol::new());
        protocol
            .register_tool_provider(Arc::new(ChunkyProvider))
            .await
            .unwrap();

        let catalog = Arc::new(ToolCatalog::new());
        crate::protocol::merge_protocol_tools(
            &catalog,
            protocol.clone() as Arc<dyn ToolProtocol>,
            protocol.search_tools("", 0).await.unwrap(),
        )
        .unwrap();

        let executor = ChainExecutor::new(catalog)
            .with_protocol(protocol as Arc<dyn ToolProtocol>);

        let mut s = step("chunky.stream", serde_json::json!({}), false);
        s.stream = true;
        let plan = ChainPlan {
            use_chain: true,
            steps: vec![s],
            timeout: 0,
        };

        let outcome = executor.execute("s", &plan).await.unwrap();
        assert_eq!(
            outcome.results["chunky.stream"],
            Value::String("streamed-output".into())
        );
    }
}
