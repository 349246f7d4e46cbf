use std::sync::Arc;

use async_trait::async_trait;
use rs_adk::memory::{InMemoryStore, MemoryEngine, SessionMemory};
use rs_adk::models::dummy_embedding;
use rs_adk::types::{File, GenerationResponse, Message, Role};
use rs_adk::{Agent, AgentOptions, Embedder, Result, LLM};

// Mock model that echoes conversation context back
struct ContextAwareLLM;

#[async_trait]
impl LLM for ContextAwareLLM {
    async fn generate(
        &self,
        messages: Vec<Message>,
        _files: Option<Vec<File>>,
    ) -> Result<GenerationResponse> {
        let latest = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "No user input found".to_string());

        Ok(GenerationResponse {
            content: format!("Considering everything so far: {}", latest),
            metadata: None,
        })
    }

    fn model_name(&self) -> &str {
        "context-aware-mock"
    }
}

// Deterministic embedder so the demo runs without any model service
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

    println!("🚀 rs-adk Quickstart\n");

    let engine = Arc::new(MemoryEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder),
    ));
    let memory = Arc::new(SessionMemory::new(engine));

    let agent = Agent::new(
        Arc::new(ContextAwareLLM),
        memory,
        AgentOptions {
            system_prompt: Some("You are a concise assistant.".into()),
            ..Default::default()
        },
    );

    let session = "quickstart-session";

    let first = agent.generate(session, "My project is called aurora.").await?;
    println!("assistant> {first}\n");

    let second = agent
        .generate(session, "Remind me later what the project is called.")
        .await?;
    println!("assistant> {second}\n");

    agent.flush(session).await?;
    println!("✅ Short-term memory flushed to the long-term store");

    Ok(())
}
