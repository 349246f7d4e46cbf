//! Memory fabric: records, store contracts, and the default in-memory store.
//!
//! The engine, session, space, and shared-session layers build on the
//! [`VectorStore`] contract defined here. Stores persist [`MemoryRecord`]s
//! and answer similarity queries; graph-aware stores additionally expose the
//! optional [`GraphStore`] capability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod engine;
pub mod session;
pub mod shared;
pub mod spaces;

pub use engine::{EngineConfig, MemoryEngine, ScoreWeights, Summarizer};
pub use session::SessionMemory;
pub use shared::SharedSession;
pub use spaces::{SpaceRegistry, SpaceRole};

/// Typed edge kinds between memory records. Unknown kinds are dropped at the
/// store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Follows,
    Explains,
    Contradicts,
    DerivedFrom,
}

impl EdgeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "follows" => Some(EdgeType::Follows),
            "explains" => Some(EdgeType::Explains),
            "contradicts" => Some(EdgeType::Contradicts),
            "derived_from" => Some(EdgeType::DerivedFrom),
            _ => None,
        }
    }
}

/// A directed edge from the owning record to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub target: i64,
    pub edge_type: EdgeType,
}

/// Memory record storing a piece of information.
///
/// Immutable once stored, except for embedding refresh and the importance
/// bump applied by duplicate merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Store-allocated id; 0 until persisted.
    pub id: i64,
    pub session_id: String,
    /// Memory scope; defaults to the session id when empty.
    pub space: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub embedding: Vec<f32>,
    /// Optional additional vectors for multi-vector recall.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding_matrix: Vec<Vec<f32>>,
    pub importance: f32,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_embedded: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graph_edges: Vec<GraphEdge>,
}

impl MemoryRecord {
    /// A fresh, unpersisted record with defaults applied.
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let now = Utc::now();
        Self {
            id: 0,
            space: session_id.clone(),
            session_id,
            content: content.into(),
            metadata: HashMap::new(),
            embedding: Vec::new(),
            embedding_matrix: Vec::new(),
            importance: 0.5,
            source: String::new(),
            summary: None,
            created_at: now,
            last_embedded: now,
            graph_edges: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = space.into();
        self
    }

    /// Conversation role, when the record carries one.
    pub fn role(&self) -> &str {
        self.metadata.get("role").map(String::as_str).unwrap_or("")
    }

    /// True when at least one non-empty vector is attached.
    pub fn has_vector(&self) -> bool {
        !self.embedding.is_empty() || self.embedding_matrix.iter().any(|v| !v.is_empty())
    }

    /// Stable content hash used for retrieval de-duplication.
    pub fn content_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.content.hash(&mut hasher);
        hasher.finish()
    }

    /// Similarity to a query vector: the maximum cosine over the primary
    /// embedding and every matrix row.
    pub fn similarity_to(&self, query: &[f32]) -> f32 {
        let mut best = cosine_similarity(query, &self.embedding);
        for row in &self.embedding_matrix {
            let s = cosine_similarity(query, row);
            if s > best {
                best = s;
            }
        }
        best
    }
}

/// Cosine similarity over the shorter of the two vectors; extra dimensions
/// are ignored and a zero norm yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let (a, b) = (&a[..n], &b[..n]);
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Similarity between two records: max cosine across both vector sets.
pub fn record_similarity(a: &MemoryRecord, b: &MemoryRecord) -> f32 {
    let mut best = 0.0f32;
    let a_vecs = std::iter::once(&a.embedding).chain(a.embedding_matrix.iter());
    for av in a_vecs {
        if av.is_empty() {
            continue;
        }
        let s = b.similarity_to(av);
        if s > best {
            best = s;
        }
    }
    best
}

/// The single place where loosely typed metadata is coerced to strings.
///
/// Strings pass through; numbers and booleans render in their canonical
/// form; structured values survive as compact JSON; null becomes empty.
pub fn normalize_metadata(
    metadata: &HashMap<String, serde_json::Value>,
) -> HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| {
            let coerced = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            (k.clone(), coerced)
        })
        .collect()
}

/// Vector store contract the memory engine is built on.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persists a record, allocating its id. Records with empty content are
    /// dropped silently (returns 0). Stores normalize on the way in: the
    /// importance clamp, the space fallback, the primary-embedding
    /// substitution from the matrix, and graph-edge validation.
    async fn store(&self, record: MemoryRecord) -> Result<i64>;

    /// Top-k records by descending multi-vector cosine similarity.
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<MemoryRecord>>;

    /// Refreshes a record's primary embedding.
    async fn update_embedding(
        &self,
        id: i64,
        embedding: Vec<f32>,
        last_embedded: DateTime<Utc>,
    ) -> Result<()>;

    /// Adjusts a record's importance (used by duplicate merging).
    async fn update_importance(&self, id: i64, importance: f32) -> Result<()>;

    async fn delete(&self, ids: &[i64]) -> Result<()>;

    /// Visits records in creation order until the callback returns false.
    async fn iterate(&self, f: &mut (dyn for<'a> FnMut(&'a MemoryRecord) -> bool + Send)) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Bootstrap hook for stores that manage their own schema.
    async fn create_schema(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Capability probe for graph-aware stores.
    fn as_graph_store(&self) -> Option<&dyn GraphStore> {
        None
    }
}

/// Optional graph capability: edge persistence plus neighborhood walks.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_graph(&self, record_id: i64, edges: &[GraphEdge]) -> Result<()>;

    /// Records reachable from the seeds within `hops`, capped at `limit`.
    async fn neighborhood(
        &self,
        seed_ids: &[i64],
        hops: usize,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;
}

struct StoreInner {
    records: Vec<MemoryRecord>,
    next_id: i64,
}

/// In-memory store implementation; also the reference for the graph
/// capability.
pub struct InMemoryStore {
    inner: parking_lot::RwLock<StoreInner>,
    edges: parking_lot::RwLock<HashMap<i64, Vec<GraphEdge>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(StoreInner {
                records: Vec::new(),
                next_id: 1,
            }),
            edges: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    fn normalize(mut record: MemoryRecord) -> MemoryRecord {
        if record.space.trim().is_empty() {
            record.space = record.session_id.clone();
        }
        record.importance = record.importance.clamp(0.0, 1.0);
        if record.embedding.is_empty() {
            if let Some(row) = record.embedding_matrix.iter().find(|v| !v.is_empty()) {
                record.embedding = row.clone();
            }
        }
        if record.last_embedded < record.created_at {
            record.last_embedded = record.created_at;
        }
        record.graph_edges.retain(|e| e.target != 0);
        record
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn store(&self, record: MemoryRecord) -> Result<i64> {
        if record.content.trim().is_empty() {
            return Ok(0);
        }

        let mut record = Self::normalize(record);
        let mut inner = self.inner.write();
        record.id = inner.next_id;
        inner.next_id += 1;

        if !record.graph_edges.is_empty() {
            self.edges
                .write()
                .insert(record.id, record.graph_edges.clone());
        }

        let id = record.id;
        inner.records.push(record);
        Ok(id)
    }

    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<MemoryRecord>> {
        let inner = self.inner.read();
        let mut scored: Vec<(f32, &MemoryRecord)> = inner
            .records
            .iter()
            .filter(|r| r.has_vector())
            .map(|r| (r.similarity_to(query_embedding), r))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, r)| r.clone()).collect())
    }

    async fn update_embedding(
        &self,
        id: i64,
        embedding: Vec<f32>,
        last_embedded: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.embedding = embedding;
            record.last_embedded = last_embedded.max(record.created_at);
        }
        Ok(())
    }

    async fn update_importance(&self, id: i64, importance: f32) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.importance = importance.clamp(0.0, 1.0);
            record.last_embedded = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.records.retain(|r| !ids.contains(&r.id));
        let mut edges = self.edges.write();
        for id in ids {
            edges.remove(id);
        }
        Ok(())
    }

    async fn iterate(&self, f: &mut (dyn for<'a> FnMut(&'a MemoryRecord) -> bool + Send)) -> Result<()> {
        let inner = self.inner.read();
        for record in &inner.records {
            if !f(record) {
                break;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().records.len())
    }

    fn as_graph_store(&self) -> Option<&dyn GraphStore> {
        Some(self)
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn upsert_graph(&self, record_id: i64, edges: &[GraphEdge]) -> Result<()> {
        let valid: Vec<GraphEdge> = edges.iter().copied().filter(|e| e.target != 0).collect();
        self.edges.write().insert(record_id, valid);
        Ok(())
    }

    async fn neighborhood(
        &self,
        seed_ids: &[i64],
        hops: usize,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        use std::collections::HashSet;

        let edges = self.edges.read();
        let mut frontier: Vec<i64> = seed_ids.to_vec();
        let mut visited: HashSet<i64> = seed_ids.iter().copied().collect();
        let mut reached: Vec<i64> = Vec::new();

        for _ in 0..hops {
            let mut next = Vec::new();
            for id in &frontier {
                for edge in edges.get(id).into_iter().flatten() {
                    if visited.insert(edge.target) {
                        reached.push(edge.target);
                        next.push(edge.target);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let inner = self.inner.read();
        let mut out: Vec<MemoryRecord> = reached
            .into_iter()
            .filter_map(|id| inner.records.iter().find(|r| r.id == id).cloned())
            .collect();
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session: &str, content: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(session, content).with_embedding(embedding)
    }

    #[test]
    fn cosine_ignores_extra_dimensions() {
        let a = vec![1.0, 0.0, 5.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &b), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &b), 0.0);
    }

    #[test]
    fn normalize_metadata_coerces_to_strings() {
        let input = HashMap::from([
            ("text".to_string(), serde_json::json!("plain")),
            ("count".to_string(), serde_json::json!(7)),
            ("flag".to_string(), serde_json::json!(true)),
            ("nested".to_string(), serde_json::json!({"a": 1})),
            ("none".to_string(), serde_json::Value::Null),
        ]);

        let out = normalize_metadata(&input);
        assert_eq!(out["text"], "plain");
        assert_eq!(out["count"], "7");
        assert_eq!(out["flag"], "true");
        assert_eq!(out["nested"], r#"{"a":1}"#);
        assert_eq!(out["none"], "");
    }

    #[tokio::test]
    async fn store_allocates_ids_and_skips_empty_content() {
        let store = InMemoryStore::new();
        let id1 = store
            .store(record("s", "first", vec![1.0, 0.0]))
            .await
            .unwrap();
        let id2 = store
            .store(record("s", "second", vec![0.0, 1.0]))
            .await
            .unwrap();
        let skipped = store.store(record("s", "   ", vec![1.0])).await.unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(skipped, 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn store_substitutes_primary_from_matrix() {
        let store = InMemoryStore::new();
        let mut r = MemoryRecord::new("s", "matrix only");
        r.embedding_matrix = vec![vec![], vec![0.6, 0.8]];
        store.store(r).await.unwrap();

        let found = store.search(&[0.6, 0.8], 1).await.unwrap();
        assert_eq!(found[0].embedding, vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn store_clamps_importance_and_space() {
        let store = InMemoryStore::new();
        let mut r = record("sess-1", "clamped", vec![1.0]);
        r.importance = 4.2;
        r.space = "  ".into();
        store.store(r).await.unwrap();

        let got = store.search(&[1.0], 1).await.unwrap();
        assert_eq!(got[0].importance, 1.0);
        assert_eq!(got[0].space, "sess-1");
    }

    #[tokio::test]
    async fn store_drops_invalid_graph_edges() {
        let store = InMemoryStore::new();
        let mut r = record("s", "edgy", vec![1.0]);
        r.graph_edges = vec![
            GraphEdge {
                target: 0,
                edge_type: EdgeType::Follows,
            },
            GraphEdge {
                target: 99,
                edge_type: EdgeType::Explains,
            },
        ];
        store.store(r).await.unwrap();

        let got = store.search(&[1.0], 1).await.unwrap();
        assert_eq!(got[0].graph_edges.len(), 1);
        assert_eq!(got[0].graph_edges[0].target, 99);
    }

    #[tokio::test]
    async fn search_uses_max_cosine_over_matrix() {
        let store = InMemoryStore::new();
        let mut multi = record("s", "multi", vec![1.0, 0.0]);
        multi.embedding_matrix = vec![vec![0.0, 1.0]];
        store.store(multi).await.unwrap();
        store
            .store(record("s", "single", vec![0.2, 0.8]))
            .await
            .unwrap();

        // Query aligned with the matrix row, not the primary vector.
        let found = store.search(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(found[0].content, "multi");
    }

    #[tokio::test]
    async fn iterate_stops_when_callback_returns_false() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .store(record("s", &format!("r{i}"), vec![1.0]))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        store
            .iterate(&mut |r| {
                seen.push(r.content.clone());
                seen.len() < 3
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["r0", "r1", "r2"]);
    }

    #[tokio::test]
    async fn neighborhood_walks_edges_within_hops() {
        let store = InMemoryStore::new();
        let a = store.store(record("s", "a", vec![1.0])).await.unwrap();
        let mut b = record("s", "b", vec![1.0]);
        b.graph_edges = vec![GraphEdge {
            target: a,
            edge_type: EdgeType::Follows,
        }];
        let b_id = store.store(b).await.unwrap();
        let mut c = record("s", "c", vec![1.0]);
        c.graph_edges = vec![GraphEdge {
            target: b_id,
            edge_type: EdgeType::DerivedFrom,
        }];
        let c_id = store.store(c).await.unwrap();

        let graph = store.as_graph_store().expect("graph capability");
        let one_hop = graph.neighborhood(&[c_id], 1, 10).await.unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].content, "b");

        let two_hops = graph.neighborhood(&[c_id], 2, 10).await.unwrap();
        assert_eq!(two_hops.len(), 2);
    }

    #[test]
    fn edge_type_parsing() {
        assert_eq!(EdgeType::parse("follows"), Some(EdgeType::Follows));
        assert_eq!(EdgeType::parse("derived_from"), Some(EdgeType::DerivedFrom));
        assert_eq!(EdgeType::parse("likes"), None);
    }
}
