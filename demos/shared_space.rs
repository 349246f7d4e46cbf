use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use rs_adk::memory::{InMemoryStore, MemoryEngine, SessionMemory};
use rs_adk::models::dummy_embedding;
use rs_adk::types::{File, GenerationResponse, Message};
use rs_adk::{Agent, AgentOptions, Embedder, Result, SpaceRole, LLM};

struct QuietLLM;

#[async_trait]
impl LLM for QuietLLM {
    async fn generate(
        &self,
        _messages: Vec<Message>,
        _files: Option<Vec<File>>,
    ) -> Result<GenerationResponse> {
        Ok(GenerationResponse {
            content: "acknowledged".into(),
            metadata: None,
        })
    }

    fn model_name(&self) -> &str {
        "quiet-mock"
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

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🤝 Shared-space demo: two agents, one memory fabric\n");

    let engine = Arc::new(MemoryEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder),
    ));
    let memory = Arc::new(SessionMemory::new(engine));

    // Both principals get writer access to the team space.
    let registry = memory.registry();
    registry.grant("team:shared", "scout", SpaceRole::Writer, Duration::zero());
    registry.grant("team:shared", "planner", SpaceRole::Writer, Duration::zero());

    let scout = Agent::new(Arc::new(QuietLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("scout");
    let planner = Agent::new(Arc::new(QuietLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("planner");

    let scout_view = scout.shared_session().expect("scout shared session");
    let planner_view = planner.shared_session().expect("planner shared session");
    scout_view.join("team:shared")?;
    planner_view.join("team:shared")?;

    scout_view
        .add_short_to(
            "team:shared",
            "Scouted: the staging cluster is back to green.",
            HashMap::new(),
        )
        .await?;
    scout_view.flush_space("team:shared").await?;
    println!("scout> wrote an update into team:shared");

    let hits = planner_view.retrieve("staging cluster status", 5).await?;
    for record in &hits {
        println!("planner sees [{}]: {}", record.space, record.content);
    }

    Ok(())
}
