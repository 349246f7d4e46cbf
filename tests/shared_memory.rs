//! Multi-agent shared-space scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use rs_adk::memory::{InMemoryStore, MemoryEngine, SessionMemory, VectorStore};
use rs_adk::models::dummy_embedding;
use rs_adk::{
    Agent, AgentError, AgentOptions, Embedder, File, GenerationResponse, Message, Result,
    SpaceRole, LLM,
};

struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(dummy_embedding(text, 16))
    }

    fn dimensions(&self) -> usize {
        16
    }
}

struct StaticLLM;

#[async_trait]
impl LLM for StaticLLM {
    async fn generate(
        &self,
        _messages: Vec<Message>,
        _files: Option<Vec<File>>,
    ) -> Result<GenerationResponse> {
        Ok(GenerationResponse {
            content: "ok".into(),
            metadata: None,
        })
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

fn shared_memory() -> Arc<SessionMemory> {
    let engine = Arc::new(MemoryEngine::new(
        Arc::new(InMemoryStore::new()) as Arc<dyn VectorStore>,
        Arc::new(HashEmbedder),
    ));
    Arc::new(SessionMemory::new(engine))
}

#[tokio::test]
async fn writer_update_is_visible_to_the_other_agent() {
    let memory = shared_memory();
    let registry = memory.registry();
    registry.grant("team:shared", "alpha", SpaceRole::Writer, Duration::zero());
    registry.grant("team:shared", "beta", SpaceRole::Writer, Duration::zero());

    let alpha = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("alpha");
    let beta = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("beta");

    let alpha_shared = alpha.shared_session().unwrap();
    let beta_shared = beta.shared_session().unwrap();
    alpha_shared.join("team:shared").unwrap();
    beta_shared.join("team:shared").unwrap();

    alpha_shared
        .add_short_to(
            "team:shared",
            "Swarm update ready for review",
            HashMap::new(),
        )
        .await
        .unwrap();
    alpha_shared.flush_space("team:shared").await.unwrap();

    let hits = beta_shared.retrieve("swarm update", 5).await.unwrap();
    assert!(hits
        .iter()
        .any(|r| r.content.contains("Swarm update ready for review")));
}

#[tokio::test]
async fn reader_cannot_write_but_still_reads() {
    let memory = shared_memory();
    let registry = memory.registry();
    registry.grant("team:shared", "writer", SpaceRole::Writer, Duration::zero());
    registry.grant("team:shared", "observer", SpaceRole::Reader, Duration::zero());

    let writer = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("writer")
        .shared_session()
        .unwrap();
    let observer = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("observer")
        .shared_session()
        .unwrap();

    writer.join("team:shared").unwrap();
    observer.join("team:shared").unwrap();

    writer
        .add_short_to("team:shared", "deploy window moved to friday", HashMap::new())
        .await
        .unwrap();
    writer.flush_space("team:shared").await.unwrap();

    let denied = observer
        .add_short_to("team:shared", "observer note", HashMap::new())
        .await;
    assert!(matches!(denied, Err(AgentError::PermissionDenied(_))));

    let hits = observer.retrieve("deploy window", 5).await.unwrap();
    assert!(hits.iter().any(|r| r.content.contains("deploy window")));
}

#[tokio::test]
async fn expired_grant_behaves_like_no_grant() {
    let memory = shared_memory();
    let registry = memory.registry();
    registry.grant(
        "team:shared",
        "alpha",
        SpaceRole::Writer,
        Duration::milliseconds(-1),
    );

    let shared = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("alpha")
        .shared_session()
        .unwrap();

    assert!(matches!(
        shared.join("team:shared"),
        Err(AgentError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn checkpoint_captures_joined_spaces() {
    let memory = shared_memory();
    let registry = memory.registry();
    registry.grant("team:shared", "alpha", SpaceRole::Reader, Duration::zero());

    let agent = Agent::new(Arc::new(StaticLLM), Arc::clone(&memory), AgentOptions::default())
        .with_shared_session("alpha");
    agent.shared_session().unwrap().join("team:shared").unwrap();

    let blob = agent.checkpoint().unwrap();

    let memory2 = shared_memory();
    let mut restored = Agent::new(Arc::new(StaticLLM), memory2, AgentOptions::default())
        .with_shared_session("alpha");
    restored.restore(&blob).unwrap();

    assert_eq!(
        restored.shared_session().unwrap().spaces(),
        vec!["team:shared"]
    );
}
