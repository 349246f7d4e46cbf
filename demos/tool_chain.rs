use std::sync::Arc;

use async_trait::async_trait;
use rs_adk::memory::{InMemoryStore, MemoryEngine, SessionMemory};
use rs_adk::models::dummy_embedding;
use rs_adk::types::{File, GenerationResponse, Message, ToolRequest, ToolResponse, ToolSpec};
use rs_adk::{Agent, AgentOptions, Embedder, Result, Tool, ToolCatalog, LLM};

// Planner mock: always proposes the same two-step chain
struct PlannerLLM;

#[async_trait]
impl LLM for PlannerLLM {
    async fn generate(
        &self,
        _messages: Vec<Message>,
        _files: Option<Vec<File>>,
    ) -> Result<GenerationResponse> {
        let plan = serde_json::json!({
            "use_chain": true,
            "steps": [
                {"tool_name": "math.add", "inputs": {"a": 2, "b": 3}},
                {"tool_name": "math.multiply", "inputs": {"a": 4}, "use_previous": true}
            ],
            "timeout": 5000
        });
        Ok(GenerationResponse {
            content: plan.to_string(),
            metadata: None,
        })
    }

    fn model_name(&self) -> &str {
        "planner-mock"
    }
}

struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(dummy_embedding(text, 64))
    }

    fn dimensions(&self) -> usize {
        64
    }
}

struct MathTool {
    name: &'static str,
    op: fn(f64, f64) -> f64,
}

#[async_trait]
impl Tool for MathTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: "Basic arithmetic".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                }
            }),
            examples: None,
        }
    }

    async fn invoke(&self, req: ToolRequest) -> Result<ToolResponse> {
        let a = req
            .arguments
            .get("a")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let b = req
            .arguments
            .get("b")
            .and_then(serde_json::Value::as_f64)
            .or_else(|| {
                req.arguments
                    .get(rs_adk::PREVIOUS_OUTPUT_KEY)
                    .and_then(serde_json::Value::as_f64)
            })
            .unwrap_or(0.0);

        Ok(ToolResponse {
            content: format!("{}", (self.op)(a, b)),
            metadata: None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("⛓️  Tool-chain demo\n");

    let engine = Arc::new(MemoryEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder),
    ));
    let memory = Arc::new(SessionMemory::new(engine));

    let catalog = Arc::new(ToolCatalog::new());
    catalog.register(Arc::new(MathTool {
        name: "math.add",
        op: |a, b| a + b,
    }))?;
    catalog.register(Arc::new(MathTool {
        name: "math.multiply",
        op: |a, b| a * b,
    }))?;

    let agent = Agent::new(Arc::new(PlannerLLM), memory, AgentOptions::default())
        .with_tools(catalog)
        .with_chains();

    let answer = agent
        .generate("chain-session", "add 2 and 3, then multiply by 4")
        .await?;

    println!("assistant> {answer}");
    Ok(())
}
