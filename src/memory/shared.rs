//! Shared sessions: a principal's view over its local session plus any
//! joined shared spaces.
//!
//! The shared session holds a non-owning handle to the session memory; the
//! session memory always outlives it. Writes touch only the affected space
//! buffer lock, and retrieval works from a snapshot, never holding a buffer
//! lock across the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{AgentError, Result};
use crate::memory::{normalize_metadata, MemoryRecord};

use super::engine::ScoredRecord;
use super::session::SessionMemory;
use super::spaces::SpaceRole;

type Buffer = Arc<Mutex<VecDeque<MemoryRecord>>>;

/// A principal's access-checked view over shared memory spaces.
pub struct SharedSession {
    memory: Weak<SessionMemory>,
    principal: String,
    joined: Mutex<Vec<String>>,
    space_buffers: RwLock<HashMap<String, Buffer>>,
}

impl SharedSession {
    /// Creates a view for `principal`, which doubles as the local session id.
    pub fn new(memory: &Arc<SessionMemory>, principal: impl Into<String>) -> Self {
        Self {
            memory: Arc::downgrade(memory),
            principal: principal.into(),
            joined: Mutex::new(Vec::new()),
            space_buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    fn memory(&self) -> Result<Arc<SessionMemory>> {
        self.memory
            .upgrade()
            .ok_or_else(|| AgentError::Internal("session memory dropped".into()))
    }

    fn space_buffer(&self, space: &str) -> Buffer {
        if let Some(buf) = self.space_buffers.read().get(space) {
            return Arc::clone(buf);
        }
        let mut buffers = self.space_buffers.write();
        Arc::clone(
            buffers
                .entry(space.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Joins a space. Requires at least reader access; joining twice is a
    /// no-op.
    pub fn join(&self, space: &str) -> Result<()> {
        let memory = self.memory()?;
        if !memory
            .registry()
            .check(space, &self.principal, SpaceRole::Reader)
        {
            return Err(AgentError::PermissionDenied(format!(
                "{} cannot read space {space}",
                self.principal
            )));
        }

        let mut joined = self.joined.lock();
        if !joined.iter().any(|s| s == space) {
            joined.push(space.to_string());
        }
        Ok(())
    }

    /// Leaves a space locally; the registry grant is untouched.
    pub fn leave(&self, space: &str) {
        self.joined.lock().retain(|s| s != space);
    }

    /// Currently joined spaces, in join order.
    pub fn spaces(&self) -> Vec<String> {
        self.joined.lock().clone()
    }

    /// Replaces the joined list wholesale; used by checkpoint restore.
    pub fn restore_joined(&self, spaces: Vec<String>) {
        *self.joined.lock() = spaces;
    }

    /// Writes to the local session buffer only.
    pub async fn add_short_local(
        &self,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let memory = self.memory()?;
        memory
            .add_short_term(&self.principal, content, metadata, None)
            .await
    }

    /// Writes to a named space's buffer. Requires writer access.
    pub async fn add_short_to(
        &self,
        space: &str,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let memory = self.memory()?;
        if !memory
            .registry()
            .check(space, &self.principal, SpaceRole::Writer)
        {
            return Err(AgentError::PermissionDenied(format!(
                "{} cannot write to space {space}",
                self.principal
            )));
        }

        if content.trim().is_empty() {
            return Ok(());
        }

        // Embed before touching the space lock.
        let embedding = memory.embed(content).await;
        let record = MemoryRecord::new(&self.principal, content)
            .with_space(space)
            .with_metadata(normalize_metadata(&metadata))
            .with_embedding(embedding);

        let buffer = self.space_buffer(space);
        let mut guard = buffer.lock();
        guard.push_back(record);
        while guard.len() > memory.window() {
            guard.pop_front();
        }
        Ok(())
    }

    /// Retrieval over the union of the local session and every joined space
    /// the principal can still read. Denied spaces degrade to silence.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .retrieve_scored(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.record)
            .collect())
    }

    /// As [`retrieve`](Self::retrieve), keeping the composite scores.
    pub async fn retrieve_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        let memory = self.memory()?;
        let registry = memory.registry();

        let mut spaces = vec![self.principal.clone()];
        for space in self.spaces() {
            if registry.check(&space, &self.principal, SpaceRole::Reader) {
                spaces.push(space);
            }
        }

        // Snapshot short-term candidates: local buffer plus readable space
        // buffers.
        let mut short_term = memory.short_term_snapshot(&self.principal);
        for space in spaces.iter().skip(1) {
            if let Some(buf) = self.space_buffers.read().get(space) {
                short_term.extend(buf.lock().iter().cloned());
            }
        }

        let hits = memory.engine().retrieve(query, &spaces, k, &short_term).await?;

        let mut seen: HashSet<u64> = HashSet::new();
        let mut out = Vec::with_capacity(k);
        for hit in hits {
            if out.len() >= k {
                break;
            }
            if seen.insert(hit.record.content_hash()) {
                out.push(hit);
            }
        }
        Ok(out)
    }

    /// Persists the local session's short-term buffer.
    pub async fn flush_local(&self) -> Result<usize> {
        let memory = self.memory()?;
        memory.flush_to_long_term(&self.principal).await
    }

    /// Persists a space buffer into long-term memory. Requires writer access.
    pub async fn flush_space(&self, space: &str) -> Result<usize> {
        let memory = self.memory()?;
        if !memory
            .registry()
            .check(space, &self.principal, SpaceRole::Writer)
        {
            return Err(AgentError::PermissionDenied(format!(
                "{} cannot flush space {space}",
                self.principal
            )));
        }

        let drained: Vec<MemoryRecord> = {
            let buffer = self.space_buffer(space);
            let mut guard = buffer.lock();
            guard.drain(..).collect()
        };

        let engine = memory.engine();
        let mut flushed = 0;
        for record in drained {
            if engine.add(record).await? != 0 {
                flushed += 1;
            }
        }
        Ok(flushed)
    }
}
