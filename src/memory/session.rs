//! Session memory: per-session short-term buffers in front of the engine.
//!
//! The short-term side is a bounded FIFO per session id; the long-term side
//! is the memory engine. Buffer locks are never held across an embedder or
//! store call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::memory::{normalize_metadata, MemoryRecord};

use super::engine::MemoryEngine;
use super::spaces::SpaceRegistry;

/// Default short-term window size.
pub const DEFAULT_WINDOW: usize = 8;

type Buffer = Arc<Mutex<VecDeque<MemoryRecord>>>;

/// Session memory manages short-term and long-term memory per session.
///
/// It owns the short-term buffers and the space registry; shared sessions
/// hold a non-owning handle back to it.
pub struct SessionMemory {
    engine: Arc<MemoryEngine>,
    registry: Arc<SpaceRegistry>,
    buffers: RwLock<HashMap<String, Buffer>>,
    window: usize,
}

impl SessionMemory {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self::with_window(engine, DEFAULT_WINDOW)
    }

    pub fn with_window(engine: Arc<MemoryEngine>, window: usize) -> Self {
        Self {
            engine,
            registry: Arc::new(SpaceRegistry::new()),
            buffers: RwLock::new(HashMap::new()),
            window: window.max(1),
        }
    }

    pub fn engine(&self) -> Arc<MemoryEngine> {
        Arc::clone(&self.engine)
    }

    pub fn registry(&self) -> Arc<SpaceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn buffer(&self, session_id: &str) -> Buffer {
        if let Some(buf) = self.buffers.read().get(session_id) {
            return Arc::clone(buf);
        }
        let mut buffers = self.buffers.write();
        Arc::clone(
            buffers
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Appends to the session's short-term FIFO, evicting the oldest entry
    /// once the window is full. Eviction is lossy unless a flush already
    /// persisted the entry.
    pub async fn add_short_term(
        &self,
        session_id: &str,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        if content.trim().is_empty() {
            return Ok(());
        }

        // Embed before taking the buffer lock.
        let embedding = match embedding {
            Some(v) if !v.is_empty() => v,
            _ => self.engine.embed(content).await,
        };

        let record = MemoryRecord::new(session_id, content)
            .with_metadata(normalize_metadata(&metadata))
            .with_embedding(embedding);

        self.push_record(record);
        Ok(())
    }

    /// Appends an already-built record to its session buffer.
    pub fn push_record(&self, record: MemoryRecord) {
        let buffer = self.buffer(&record.session_id);
        let mut guard = buffer.lock();
        guard.push_back(record);
        while guard.len() > self.window {
            guard.pop_front();
        }
    }

    /// Drains the session buffer into the engine, preserving append order.
    /// Returns the number of records persisted.
    pub async fn flush_to_long_term(&self, session_id: &str) -> Result<usize> {
        let drained: Vec<MemoryRecord> = {
            let buffer = self.buffer(session_id);
            let mut guard = buffer.lock();
            guard.drain(..).collect()
        };

        let mut flushed = 0;
        for mut record in drained {
            record.last_embedded = Utc::now();
            if self.engine.add(record).await? != 0 {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Hybrid retrieval: short-term first (chronological), then engine
    /// results, de-duplicated by content hash and capped at k.
    pub async fn retrieve_context(
        &self,
        session_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<MemoryRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let short_term = self.short_term_snapshot(session_id);

        let mut seen: HashSet<u64> = HashSet::new();
        let mut out: Vec<MemoryRecord> = Vec::new();

        for record in short_term {
            if out.len() >= k {
                return Ok(out);
            }
            if seen.insert(record.content_hash()) {
                out.push(record);
            }
        }

        let spaces = vec![session_id.to_string()];
        for hit in self.engine.retrieve(query, &spaces, k, &[]).await? {
            if out.len() >= k {
                break;
            }
            if seen.insert(hit.record.content_hash()) {
                out.push(hit.record);
            }
        }

        Ok(out)
    }

    /// Embeds text with the engine's dummy fallback.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        self.engine.embed(text).await
    }

    /// Chronological copy of a session's short-term buffer.
    pub fn short_term_snapshot(&self, session_id: &str) -> Vec<MemoryRecord> {
        match self.buffers.read().get(session_id) {
            Some(buf) => buf.lock().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// All buffers keyed by session id; used for checkpointing.
    pub fn buffers_snapshot(&self) -> HashMap<String, Vec<MemoryRecord>> {
        let buffers = self.buffers.read();
        buffers
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().iter().cloned().collect()))
            .collect()
    }

    /// Whole-buffer replacement; used by restore.
    pub fn replace_buffers(&self, snapshot: HashMap<String, Vec<MemoryRecord>>) {
        let mut buffers = self.buffers.write();
        buffers.clear();
        for (session, records) in snapshot {
            let mut deque: VecDeque<MemoryRecord> = records.into();
            while deque.len() > self.window {
                deque.pop_front();
            }
            buffers.insert(session, Arc::new(Mutex::new(deque)));
        }
    }
}
