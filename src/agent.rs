//! Core Agent orchestrator
//!
//! The Agent coordinates the model, session memory, tools, sub-agents, and
//! the tool bus behind one turn pipeline. Each user message walks an ordered
//! cascade of states; the first state that claims the message produces the
//! reply and persists its own assistant-side memory. Model calls are the
//! last resort.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::agent_tool::{agent_tool_spec, AgentProvider, AgentTool};
use crate::catalog::{StaticSubAgentDirectory, ToolCatalog};
use crate::chain::ChainExecutor;
use crate::error::{AgentError, Result};
use crate::helpers::{
    arguments_from_payload, looks_like_code, parse_direct_tool_call, split_command,
    strip_code_fence, DirectToolCall,
};
use crate::memory::engine::ScoredRecord;
use crate::memory::{SessionMemory, SharedSession};
use crate::models::{LLM, STREAM_BUFFER};
use crate::orchestrator::ToolOrchestrator;
use crate::prompt::{assemble, attachment_metadata, rehydrate_attachments, PromptInput};
use crate::protocol::{aggregate_stream, merge_protocol_tools, value_to_content, ToolProtocol};
use crate::query::{classify_tool_intent, ToolIntent};
use crate::sandbox::{CodeSandbox, SandboxCapabilities, DEFAULT_SANDBOX_TIMEOUT};
use crate::types::{
    AgentOptions, AgentState, File, GenerationResponse, Message, Role, StreamChunk,
    SubAgentDirectory, ToolRequest, ToolSpec,
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Provide concise, accurate answers and explain when you use tools.";

/// Main Agent orchestrator.
pub struct Agent {
    model: Arc<dyn LLM>,
    memory: Arc<SessionMemory>,
    system_prompt: String,
    context_limit: usize,
    retrieval_k: usize,
    tool_catalog: Arc<ToolCatalog>,
    subagents: Arc<dyn SubAgentDirectory>,
    protocol: Option<Arc<dyn ToolProtocol>>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
    chain_executor: Option<Arc<ChainExecutor>>,
    orchestrator: ToolOrchestrator,
    shared: Option<Arc<SharedSession>>,
}

impl Agent {
    /// Creates a new Agent with the given configuration
    pub fn new(model: Arc<dyn LLM>, memory: Arc<SessionMemory>, options: AgentOptions) -> Self {
        let orchestrator = ToolOrchestrator::new(Arc::clone(&model));
        Self {
            model,
            memory,
            system_prompt: options
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            context_limit: options.context_limit.unwrap_or(8192),
            retrieval_k: options.retrieval_k.unwrap_or(6),
            tool_catalog: Arc::new(ToolCatalog::new()),
            subagents: Arc::new(StaticSubAgentDirectory::new()),
            protocol: None,
            sandbox: None,
            chain_executor: None,
            orchestrator,
            shared: None,
        }
    }

    /// Sets the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the tool catalog
    pub fn with_tools(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.tool_catalog = catalog;
        self
    }

    /// Sets the sub-agent directory
    pub fn with_subagents(mut self, directory: Arc<dyn SubAgentDirectory>) -> Self {
        self.subagents = directory;
        self
    }

    /// Wires the external tool bus in.
    pub fn with_protocol(mut self, protocol: Arc<dyn ToolProtocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Wires a code-execution sandbox in, enabling the sandboxed-code branch.
    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Enables the chain branch. Call after tools and protocol are wired so
    /// the executor sees the final namespace.
    pub fn with_chains(mut self) -> Self {
        let mut executor = ChainExecutor::new(Arc::clone(&self.tool_catalog));
        if let Some(protocol) = &self.protocol {
            executor = executor.with_protocol(Arc::clone(protocol));
        }
        self.chain_executor = Some(Arc::new(executor));
        self
    }

    /// Routes orchestration decisions through a dedicated model instead of
    /// the primary one.
    pub fn with_orchestrator_model(mut self, model: Arc<dyn LLM>) -> Self {
        self.orchestrator = ToolOrchestrator::new(model);
        self
    }

    /// Binds a shared session for multi-agent memory. The principal doubles
    /// as the local session id.
    pub fn with_shared_session(mut self, principal: impl Into<String>) -> Self {
        self.shared = Some(Arc::new(SharedSession::new(&self.memory, principal)));
        self
    }

    /// The bound shared session, if any.
    pub fn shared_session(&self) -> Option<Arc<SharedSession>> {
        self.shared.as_ref().map(Arc::clone)
    }

    /// Returns the tool catalog
    pub fn tools(&self) -> Arc<ToolCatalog> {
        Arc::clone(&self.tool_catalog)
    }

    /// Returns the session memory handle
    pub fn memory(&self) -> Arc<SessionMemory> {
        Arc::clone(&self.memory)
    }

    /// Merged namespace snapshot: local tools plus adopted protocol tools.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tool_catalog.specs()
    }

    /// Discovers tools on the bus and merges them into the namespace.
    /// Locally registered tools win on name collision.
    pub async fn discover_protocol_tools(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolSpec>> {
        let protocol = self
            .protocol
            .as_ref()
            .ok_or_else(|| AgentError::InvalidInput("no tool protocol wired".into()))?;

        let found = protocol
            .search_tools(query, limit)
            .await
            .map_err(AgentError::upstream)?;

        merge_protocol_tools(self.tool_catalog.as_ref(), Arc::clone(protocol), found)
    }

    /// Wraps this agent as a locally registrable tool.
    pub fn as_tool(
        self: &Arc<Self>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> AgentTool {
        AgentTool::new(Arc::clone(self), name, description)
    }

    /// The tool spec another runtime would see for this agent on the bus.
    pub fn as_protocol_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> ToolSpec {
        agent_tool_spec(name, description)
    }

    /// Registers this agent as an in-process provider on the tool bus.
    pub async fn register_as_protocol_provider(
        self: &Arc<Self>,
        client: &dyn ToolProtocol,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<()> {
        let provider = AgentProvider::new(Arc::clone(self), name, description);
        client
            .register_tool_provider(Arc::new(provider))
            .await
            .map_err(AgentError::upstream)?;
        Ok(())
    }

    /// Generates a response for the given user input
    pub async fn generate(
        &self,
        session_id: impl Into<String>,
        user_input: impl Into<String>,
    ) -> Result<String> {
        let response = self
            .generate_internal(session_id.into(), user_input.into(), None)
            .await?;
        Ok(response.content)
    }

    /// Generates a response with file attachments
    pub async fn generate_with_files(
        &self,
        session_id: impl Into<String>,
        user_input: impl Into<String>,
        files: Vec<File>,
    ) -> Result<String> {
        let response = self
            .generate_internal(session_id.into(), user_input.into(), Some(files))
            .await?;
        Ok(response.content)
    }

    /// Streams a response. Non-model branches emit a single delta followed
    /// by the terminal chunk; model completions forward the provider stream
    /// and persist the assistant memory only once the stream finishes
    /// cleanly.
    pub async fn generate_stream(
        &self,
        session_id: impl Into<String>,
        user_input: impl Into<String>,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let session_id = session_id.into();
        let user_input = user_input.into();

        let input = user_input.trim().to_string();
        if input.is_empty() {
            return Err(AgentError::InvalidInput("empty input".into()));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        if let Some(response) = self.try_short_circuit(&session_id, &input).await? {
            let _ = tx.send(StreamChunk::delta(response.content.clone())).await;
            let _ = tx.send(StreamChunk::finished(response.content)).await;
            return Ok(rx);
        }

        // Model completion: persist the user turn before the call.
        self.store_memory(&session_id, "user", &input, None).await?;
        let prompt = self.assemble_prompt(&session_id, &input, &[]).await?;
        let mut model_rx = self
            .model
            .generate_stream(vec![Message {
                role: Role::User,
                content: prompt,
                metadata: None,
            }])
            .await?;

        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            let mut accumulated = String::new();
            while let Some(chunk) = model_rx.recv().await {
                if chunk.done {
                    if chunk.error.is_some() {
                        let _ = tx.send(chunk).await;
                        return;
                    }
                    let full = chunk
                        .aggregated
                        .clone()
                        .unwrap_or_else(|| accumulated.clone());
                    let _ = memory
                        .add_short_term(
                            &session_id,
                            &full,
                            HashMap::from([("role".to_string(), json!("assistant"))]),
                            None,
                        )
                        .await;
                    let _ = tx.send(StreamChunk::finished(full)).await;
                    return;
                }
                accumulated.push_str(&chunk.content);
                let _ = tx.send(chunk).await;
            }
            // Producer hung up without a terminal chunk.
            let _ = tx
                .send(StreamChunk::failed("model stream ended unexpectedly"))
                .await;
        });

        Ok(rx)
    }

    /// Appends a memory without generating.
    pub async fn save(
        &self,
        session_id: impl Into<String>,
        role: &str,
        content: &str,
    ) -> Result<()> {
        self.store_memory(&session_id.into(), role, content, None)
            .await
    }

    /// Flushes a session's short-term buffer into long-term memory.
    pub async fn flush(&self, session_id: &str) -> Result<usize> {
        self.memory.flush_to_long_term(session_id).await
    }

    /// Serializes the agent state: system prompt, limits, joined spaces, and
    /// short-term buffers. Long-term store content is assumed durable and is
    /// not captured.
    pub fn checkpoint(&self) -> Result<Vec<u8>> {
        let state = AgentState {
            system_prompt: self.system_prompt.clone(),
            context_limit: self.context_limit,
            retrieval_k: self.retrieval_k,
            joined_spaces: self
                .shared
                .as_ref()
                .map(|s| s.spaces())
                .unwrap_or_default(),
            short_term: self.memory.buffers_snapshot(),
            timestamp: chrono::Utc::now(),
        };
        Ok(serde_json::to_vec(&state)?)
    }

    /// Whole-object restore from a checkpoint blob. The agent re-binds to
    /// its existing engine and embedder; only the serialized state changes.
    pub fn restore(&mut self, data: &[u8]) -> Result<()> {
        let state: AgentState = serde_json::from_slice(data)?;

        self.system_prompt = state.system_prompt;
        self.context_limit = state.context_limit;
        self.retrieval_k = state.retrieval_k;
        self.memory.replace_buffers(state.short_term);
        if let Some(shared) = &self.shared {
            shared.restore_joined(state.joined_spaces);
        }
        Ok(())
    }

    async fn generate_internal(
        &self,
        session_id: String,
        user_input: String,
        files: Option<Vec<File>>,
    ) -> Result<GenerationResponse> {
        let input = user_input.trim().to_string();
        if input.is_empty() {
            return Err(AgentError::InvalidInput("empty input".into()));
        }

        let files = files.unwrap_or_default();
        if files.is_empty() {
            if let Some(response) = self.try_short_circuit(&session_id, &input).await? {
                return Ok(response);
            }
        } else {
            // Explicit invocations still work with attachments present; the
            // heavier orchestration branches defer to the file-aware path.
            if let Some(call) = self.detect_direct_call(&input) {
                return self.run_direct_call(&session_id, call).await;
            }
            if let Some(response) = self.try_command(&session_id, &input).await? {
                return Ok(response);
            }
        }

        self.model_completion(&session_id, &input, files).await
    }

    /// States 2 through 6 of the cascade. `Ok(None)` means fall through to
    /// model completion.
    async fn try_short_circuit(
        &self,
        session_id: &str,
        input: &str,
    ) -> Result<Option<GenerationResponse>> {
        // DirectToolCall
        if let Some(call) = self.detect_direct_call(input) {
            return self.run_direct_call(session_id, call).await.map(Some);
        }

        // Command prefixes
        if let Some(response) = self.try_command(session_id, input).await? {
            return Ok(Some(response));
        }

        // Sandboxed code
        if let Some(sandbox) = &self.sandbox {
            if looks_like_code(input) {
                return self
                    .run_sandboxed(Arc::clone(sandbox), session_id, input)
                    .await
                    .map(Some);
            }
        }

        // Chain
        if let Some(executor) = &self.chain_executor {
            if let Some(response) = self
                .try_chain(Arc::clone(executor), session_id, input)
                .await?
            {
                return Ok(Some(response));
            }
        }

        // ToolOrchestrator, behind the cheap intent gate.
        if classify_tool_intent(input) == ToolIntent::Maybe && !self.tool_catalog.is_empty() {
            if let Some(response) = self.try_orchestrator(session_id, input).await? {
                return Ok(Some(response));
            }
        }

        Ok(None)
    }

    fn detect_direct_call(&self, input: &str) -> Option<DirectToolCall> {
        parse_direct_tool_call(input, |name| self.tool_catalog.contains(name))
    }

    async fn run_direct_call(
        &self,
        session_id: &str,
        call: DirectToolCall,
    ) -> Result<GenerationResponse> {
        let streaming = self.protocol.as_ref().filter(|_| call.stream);
        let content = match streaming {
            Some(protocol) => {
                let stream = protocol
                    .call_tool_stream(&call.name, call.arguments.clone())
                    .await
                    .map_err(AgentError::upstream)?;
                aggregate_stream(stream).await?
            }
            None => {
                self.invoke_in_namespace(session_id, &call.name, call.arguments.clone())
                    .await?
            }
        };

        let metadata = self
            .store_tagged(
                session_id,
                "tool",
                &format!("Called {}: {}", call.name, content),
                [("tool", call.name.as_str()), ("source", "direct_tool")],
            )
            .await?;

        Ok(GenerationResponse {
            content,
            metadata: Some(metadata),
        })
    }

    async fn try_command(
        &self,
        session_id: &str,
        input: &str,
    ) -> Result<Option<GenerationResponse>> {
        if let Some(rest) = input.strip_prefix("subagent:") {
            let (name, task) = split_command(rest);
            if name.is_empty() {
                return Err(AgentError::InvalidInput("subagent command without name".into()));
            }
            let subagent = self
                .subagents
                .lookup(name)
                .ok_or_else(|| AgentError::NotFound(format!("sub-agent {name}")))?;

            let output = subagent.run(task.to_string()).await?;
            let metadata = self
                .store_tagged(
                    session_id,
                    "assistant",
                    &output,
                    [("subagent", name), ("source", "command")],
                )
                .await?;

            return Ok(Some(GenerationResponse {
                content: output,
                metadata: Some(metadata),
            }));
        }

        if let Some(rest) = input.strip_prefix("tool:") {
            let (name, payload) = split_command(rest);
            if name.is_empty() {
                return Err(AgentError::InvalidInput("tool command without name".into()));
            }
            let arguments = arguments_from_payload(payload);
            let content = self
                .invoke_in_namespace(session_id, name, arguments)
                .await?;

            let metadata = self
                .store_tagged(
                    session_id,
                    "tool",
                    &format!("Called {name}: {content}"),
                    [("tool", name), ("source", "command")],
                )
                .await?;

            return Ok(Some(GenerationResponse {
                content,
                metadata: Some(metadata),
            }));
        }

        Ok(None)
    }

    async fn run_sandboxed(
        &self,
        sandbox: Arc<dyn CodeSandbox>,
        session_id: &str,
        input: &str,
    ) -> Result<GenerationResponse> {
        let code = strip_code_fence(input);
        let capabilities = Arc::new(SandboxCapabilities::new(self.protocol.clone()));

        let result = tokio::time::timeout(
            DEFAULT_SANDBOX_TIMEOUT,
            sandbox.execute(&code, capabilities, DEFAULT_SANDBOX_TIMEOUT),
        )
        .await
        .map_err(|_| AgentError::Timeout("sandboxed code".into()))?
        .map_err(AgentError::upstream)?;

        let content = value_to_content(&result);
        let metadata = self
            .store_tagged(
                session_id,
                "assistant",
                &content,
                [("source", "codemode")],
            )
            .await?;

        Ok(GenerationResponse {
            content,
            metadata: Some(metadata),
        })
    }

    async fn try_chain(
        &self,
        executor: Arc<ChainExecutor>,
        session_id: &str,
        input: &str,
    ) -> Result<Option<GenerationResponse>> {
        let plan = match self
            .orchestrator
            .plan_chain(input, &self.tool_specs())
            .await
        {
            Some(plan) => plan,
            None => return Ok(None),
        };

        match executor.execute(session_id, &plan).await {
            Ok(outcome) => {
                let content = value_to_content(&outcome.last);
                let steps = outcome.order.join(",");
                let metadata = self
                    .store_tagged(
                        session_id,
                        "assistant",
                        &content,
                        [("source", "chain"), ("steps", steps.as_str())],
                    )
                    .await?;
                Ok(Some(GenerationResponse {
                    content,
                    metadata: Some(metadata),
                }))
            }
            Err(e) => {
                self.store_tagged(
                    session_id,
                    "assistant",
                    &format!("Chain failed: {e}"),
                    [("source", "chain")],
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn try_orchestrator(
        &self,
        session_id: &str,
        input: &str,
    ) -> Result<Option<GenerationResponse>> {
        let decision = match self
            .orchestrator
            .select_tool(input, &self.tool_specs())
            .await
        {
            Some(d) if d.use_tool && self.tool_catalog.contains(&d.tool_name) => d,
            _ => return Ok(None),
        };

        let content = self
            .invoke_in_namespace(session_id, &decision.tool_name, decision.arguments.clone())
            .await?;

        self.store_tagged(
            session_id,
            "tool",
            &format!("Called {}: {}", decision.tool_name, content),
            [
                ("tool", decision.tool_name.as_str()),
                ("source", "tool_orchestrator"),
            ],
        )
        .await?;

        let reply = self
            .orchestrator
            .compose_reply(input, &decision.tool_name, &content)
            .await?;

        let metadata = self
            .store_tagged(
                session_id,
                "assistant",
                &reply,
                [("source", "tool_orchestrator")],
            )
            .await?;

        Ok(Some(GenerationResponse {
            content: reply,
            metadata: Some(metadata),
        }))
    }

    async fn model_completion(
        &self,
        session_id: &str,
        input: &str,
        files: Vec<File>,
    ) -> Result<GenerationResponse> {
        // The user turn is persisted before the model call; a failed or
        // cancelled completion keeps it.
        self.store_memory(session_id, "user", input, None).await?;

        let files = if files.is_empty() {
            self.rehydrate_session_files(session_id, &[]).await?
        } else {
            for file in &files {
                self.store_memory(
                    session_id,
                    "user",
                    &format!("[file] {}", file.name),
                    Some(attachment_metadata(file)),
                )
                .await?;
            }
            let mut all = files;
            let previous = self.rehydrate_session_files(session_id, &all).await?;
            all.extend(previous);
            all
        };

        let prompt = self.assemble_prompt(session_id, input, &files).await?;

        let messages = vec![Message {
            role: Role::User,
            content: prompt,
            metadata: None,
        }];

        let response = if files.is_empty() {
            self.model.generate(messages, None).await?
        } else {
            self.model.generate(messages, Some(files)).await?
        };

        // Assistant memory is written only after the model returns.
        self.store_memory(session_id, "assistant", &response.content, None)
            .await?;

        Ok(response)
    }

    async fn assemble_prompt(
        &self,
        session_id: &str,
        input: &str,
        files: &[File],
    ) -> Result<String> {
        let memories = self.retrieve_scored(session_id, input).await?;
        let subagents: Vec<(String, String)> = self
            .subagents
            .all()
            .into_iter()
            .map(|s| (s.name(), s.description()))
            .collect();

        let mut prompt = assemble(&PromptInput {
            system_prompt: &self.system_prompt,
            tools: &self.tool_specs(),
            subagents: &subagents,
            memories: &memories,
            user_input: input,
            files,
        });

        // Crude 4-chars-per-token budget guard; memory is dropped first by
        // reassembling without it.
        if prompt.len() / 4 > self.context_limit {
            prompt = assemble(&PromptInput {
                system_prompt: &self.system_prompt,
                tools: &self.tool_specs(),
                subagents: &subagents,
                memories: &[],
                user_input: input,
                files,
            });
        }

        Ok(prompt)
    }

    async fn retrieve_scored(&self, session_id: &str, query: &str) -> Result<Vec<ScoredRecord>> {
        if let Some(shared) = &self.shared {
            if shared.principal() == session_id {
                return shared.retrieve_scored(query, self.retrieval_k).await;
            }
        }

        let short_term = self.memory.short_term_snapshot(session_id);
        self.memory
            .engine()
            .retrieve(
                query,
                &[session_id.to_string()],
                self.retrieval_k,
                &short_term,
            )
            .await
    }

    /// Attachments stored in previous turns, minus any re-uploaded now.
    async fn rehydrate_session_files(
        &self,
        session_id: &str,
        current: &[File],
    ) -> Result<Vec<File>> {
        let mut records = self.memory.short_term_snapshot(session_id);
        let store = self.memory.engine().store_handle();
        store
            .iterate(&mut |r| {
                if r.session_id == session_id && r.metadata.contains_key("filename") {
                    records.push(r.clone());
                }
                true
            })
            .await?;

        let mut files = rehydrate_attachments(&records);
        files.retain(|f| !current.iter().any(|c| c.name == f.name));
        Ok(files)
    }

    /// Invokes a tool from the merged namespace, falling back to a raw bus
    /// call for tools known to the protocol but never merged.
    async fn invoke_in_namespace(
        &self,
        session_id: &str,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<String> {
        if self.tool_catalog.contains(name) {
            let response = self
                .tool_catalog
                .invoke(
                    name,
                    ToolRequest {
                        session_id: session_id.to_string(),
                        arguments,
                    },
                )
                .await?;
            return Ok(response.content);
        }

        if let Some(protocol) = &self.protocol {
            let result = protocol
                .call_tool(name, arguments)
                .await
                .map_err(AgentError::upstream)?;
            return Ok(value_to_content(&result));
        }

        Err(AgentError::NotFound(format!("tool {name}")))
    }

    /// Invokes a tool by name and persists the invocation.
    pub async fn invoke_tool(
        &self,
        session_id: impl Into<String>,
        tool_name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<String> {
        let session_id = session_id.into();
        let content = self
            .invoke_in_namespace(&session_id, tool_name, arguments)
            .await?;

        self.store_tagged(
            &session_id,
            "tool",
            &format!("Called {tool_name}: {content}"),
            [("tool", tool_name)],
        )
        .await?;

        Ok(content)
    }

    async fn store_memory(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        extra: Option<HashMap<String, Value>>,
    ) -> Result<()> {
        let mut metadata = extra.unwrap_or_default();
        metadata.insert("role".to_string(), json!(role));
        self.memory
            .add_short_term(session_id, content, metadata, None)
            .await
    }

    async fn store_tagged<'a>(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        tags: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<HashMap<String, String>> {
        let mut extra = HashMap::new();
        let mut rendered = HashMap::new();
        for (k, v) in tags {
            extra.insert(k.to_string(), json!(v));
            rendered.insert(k.to_string(), v.to_string());
        }
        self.store_memory(session_id, role, content, Some(extra))
            .await?;
        Ok(rendered)
    }
}
