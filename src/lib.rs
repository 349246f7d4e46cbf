//! # rs-adk
//!
//! Lattice Agent Development Kit core for Rust
//!
//! `rs-adk` is the orchestration core that turns a user message into a final
//! assistant reply:
//! - A turn pipeline that short-circuits into direct tool calls, commands,
//!   sandboxed code, planned tool chains, or an orchestrated tool pick
//!   before falling back to a model completion
//! - A memory engine with importance scoring, MMR retrieval, clustering,
//!   summarization, de-duplication, and pruning
//! - Shared memory spaces with per-principal, TTL-bound access grants
//! - Tool and sub-agent registries merged with an external tool-calling bus
//!
//! Concrete models, embedders, vector stores, and transports stay outside;
//! the kit consumes them through the `LLM`, `Embedder`, `VectorStore`, and
//! `ToolProtocol` traits.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rs_adk::{Agent, AgentOptions};
//! use rs_adk::memory::{InMemoryStore, MemoryEngine, SessionMemory};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Wire a model and embedder, then:
//!     // let engine = Arc::new(MemoryEngine::new(store, embedder));
//!     // let memory = Arc::new(SessionMemory::new(engine));
//!     // let agent = Agent::new(model, memory, AgentOptions::default());
//! }
//! ```

pub mod agent;
pub mod agent_tool;
pub mod catalog;
pub mod chain;
pub mod error;
pub mod helpers;
pub mod memory;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod prompt;
pub mod protocol;
pub mod query;
pub mod sandbox;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use agent::Agent;
pub use agent_tool::{AgentProvider, AgentTool};
pub use catalog::{StaticSubAgentDirectory, ToolCatalog};
pub use chain::{ChainExecutor, ChainOutcome, ChainPlan, ChainStep, PREVIOUS_OUTPUT_KEY};
pub use error::{AgentError, Result};
pub use memory::{
    cosine_similarity, EngineConfig, InMemoryStore, MemoryEngine, MemoryRecord, ScoreWeights,
    SessionMemory, SharedSession, SpaceRegistry, SpaceRole, VectorStore,
};
pub use models::{Embedder, LLM};
pub use optimizer::{PromptOptimizer, PromptVersion};
pub use protocol::{InProcessProtocol, ToolProtocol, ToolProvider, ToolStream};
pub use sandbox::{CodeSandbox, SandboxCapabilities};
pub use tools::Tool;
pub use types::{
    AgentOptions, AgentState, File, GenerationResponse, Message, Role, StreamChunk, SubAgent,
    SubAgentDirectory, ToolRequest, ToolResponse, ToolSpec,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_options() {
        let opts = AgentOptions::default();
        assert_eq!(opts.context_limit, Some(8192));
        assert!(opts.system_prompt.is_none());
    }
}
