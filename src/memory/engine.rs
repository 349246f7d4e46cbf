//! Memory engine: scoring, de-duplication, clustering, summarization,
//! pruning, and diversity-aware retrieval.
//!
//! The engine sits between the session layer and the vector store. Every
//! write is scored and checked against its nearest neighbor before insert;
//! every read re-scores candidates with the composite function and selects
//! the final k by Maximal Marginal Relevance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::models::{dummy_embedding, Embedder, LLM};
use crate::types::{Message, Role};

use super::{cosine_similarity, record_similarity, MemoryRecord, VectorStore};

/// Importance bump applied when a near-duplicate is merged instead of stored.
const DUPLICATE_IMPORTANCE_BUMP: f32 = 0.05;

/// Additive bonus for short-term candidates so a just-seen message is never
/// starved out of retrieval.
const SHORT_TERM_BONUS: f32 = 0.05;

/// Words ignored by keyword-overlap scoring.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "am", "to", "of", "in", "on",
    "at", "for", "and", "or", "but", "with", "as", "by", "it", "its", "this", "that", "these",
    "those", "i", "you", "we", "they", "he", "she", "do", "does", "did", "not", "no", "so",
    "if", "then", "than", "too", "very", "can", "will", "just", "my", "your", "our", "me",
    "what", "when", "where", "which", "who", "whom", "why", "how",
];

/// Composite-score weights. Negative values are rejected; the engine
/// re-normalizes whatever remains to sum to 1.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ScoreWeights {
    pub similarity: f32,
    pub keywords: f32,
    pub importance: f32,
    pub recency: f32,
    pub source: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.45,
            keywords: 0.20,
            importance: 0.20,
            recency: 0.10,
            source: 0.05,
        }
    }
}

impl ScoreWeights {
    /// Clamps negatives to zero and scales the set to sum to 1. An all-zero
    /// set falls back to the defaults.
    pub fn normalized(&self) -> Self {
        let mut w = Self {
            similarity: self.similarity.max(0.0),
            keywords: self.keywords.max(0.0),
            importance: self.importance.max(0.0),
            recency: self.recency.max(0.0),
            source: self.source.max(0.0),
        };
        let sum = w.similarity + w.keywords + w.importance + w.recency + w.source;
        if sum <= f32::EPSILON {
            return Self::default();
        }
        w.similarity /= sum;
        w.keywords /= sum;
        w.importance /= sum;
        w.recency /= sum;
        w.source /= sum;
        w
    }
}

/// Engine tuning knobs. The defaults mirror long-running production use.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub weights: ScoreWeights,
    /// Recency half-life for the exp(-dt/half_life) term.
    pub half_life: Duration,
    /// Per-source additive boost; missing sources score 0.
    pub source_boost: HashMap<String, f32>,
    /// MMR relevance/diversity trade-off.
    pub lambda: f32,
    /// Cosine floor for duplicate detection.
    pub duplicate_similarity: f32,
    /// Token-set overlap floor for duplicate detection.
    pub duplicate_overlap: f32,
    /// Cosine floor for joining an existing cluster.
    pub cluster_similarity: f32,
    /// Below this centroid similarity a record spawns its own cluster.
    pub drift_threshold: f32,
    /// Cluster size that triggers summarization.
    pub summary_threshold: usize,
    /// Fraction of lowest-scoring cluster members pruned after summarization.
    pub prune_quantile: f32,
    /// Hard age limit for records.
    pub ttl: Duration,
    /// Hard record-count limit; overflow evicts lowest-score-first.
    pub max_size: usize,
    /// Write-path embedding deadline before the dummy fallback kicks in.
    pub embed_timeout: std::time::Duration,
    /// Fallback vector width when the embedder reports no dimensions.
    pub embedding_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            half_life: Duration::hours(72),
            source_boost: HashMap::new(),
            lambda: 0.7,
            duplicate_similarity: 0.97,
            duplicate_overlap: 0.8,
            cluster_similarity: 0.83,
            drift_threshold: 0.90,
            summary_threshold: 8,
            prune_quantile: 0.25,
            ttl: Duration::hours(720),
            max_size: 2048,
            embed_timeout: std::time::Duration::from_secs(2),
            embedding_width: 384,
        }
    }
}

/// A retrieval hit with its composite score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Produces one short note from a cluster of related memories.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, contents: &[String]) -> Result<String>;
}

/// Summarizer backed by the model.
pub struct LlmSummarizer {
    llm: Arc<dyn LLM>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, contents: &[String]) -> Result<String> {
        let mut prompt =
            String::from("Condense the following related memories into one short note:\n");
        for content in contents {
            prompt.push_str("- ");
            prompt.push_str(content);
            prompt.push('\n');
        }

        let response = self
            .llm
            .generate(
                vec![Message {
                    role: Role::User,
                    content: prompt,
                    metadata: None,
                }],
                None,
            )
            .await?;
        Ok(response.content)
    }
}

/// Deterministic fallback summarizer: leading sentences, capped.
pub struct ExtractiveSummarizer {
    pub max_len: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_len: 400 }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, contents: &[String]) -> Result<String> {
        let mut out = String::new();
        for content in contents {
            let sentence = content
                .split_terminator(&['.', '!', '?'][..])
                .next()
                .unwrap_or(content)
                .trim();
            if sentence.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str(sentence);
            if out.len() >= self.max_len {
                out.truncate(self.max_len);
                break;
            }
        }
        Ok(out)
    }
}

struct Cluster {
    id: Uuid,
    centroid: Vec<f32>,
    members: Vec<i64>,
    summarized: bool,
}

enum ClusterAssignment {
    Joined {
        needs_summary: Option<(Uuid, Vec<i64>, Vec<f32>)>,
    },
    Spawned,
}

/// The memory engine. Cheap to share behind an `Arc`; cluster state is the
/// only interior mutability and its lock is never held across a remote call.
pub struct MemoryEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: EngineConfig,
    clusters: Mutex<Vec<Cluster>>,
}

impl MemoryEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(store, embedder, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        mut config: EngineConfig,
    ) -> Self {
        config.weights = config.weights.normalized();
        config.lambda = config.lambda.clamp(0.0, 1.0);
        Self {
            store,
            embedder,
            summarizer: None,
            config,
            clusters: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn store_handle(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Embeds text, degrading to the deterministic dummy vector when the
    /// embedder errors or exceeds the write-path deadline.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let width = match self.embedder.dimensions() {
            0 => self.config.embedding_width,
            d => d,
        };

        match tokio::time::timeout(self.config.embed_timeout, self.embedder.embed(text)).await {
            Ok(Ok(v)) if !v.is_empty() => v,
            Ok(Ok(_)) => dummy_embedding(text, width),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "embedder failed, using dummy vector");
                dummy_embedding(text, width)
            }
            Err(_) => {
                tracing::warn!("embedder timed out, using dummy vector");
                dummy_embedding(text, width)
            }
        }
    }

    /// Write path: clamp, embed, de-duplicate, cluster, persist, prune.
    ///
    /// Returns the id of the stored record, or of the merged-into record
    /// when the write collapsed into an existing near-duplicate.
    pub async fn add(&self, mut record: MemoryRecord) -> Result<i64> {
        if record.content.trim().is_empty() {
            return Ok(0);
        }

        record.importance = record.importance.clamp(0.0, 1.0);
        if record.embedding.is_empty() {
            record.embedding = self.embed(&record.content).await;
            record.last_embedded = Utc::now();
        }

        // Duplicate detection against the nearest stored neighbor.
        if let Some(existing) = self.store.search(&record.embedding, 1).await?.into_iter().next() {
            let cos = existing.similarity_to(&record.embedding);
            let overlap = token_set_overlap(&record.content, &existing.content);
            if cos >= self.config.duplicate_similarity && overlap >= self.config.duplicate_overlap
            {
                let bumped = (existing.importance + DUPLICATE_IMPORTANCE_BUMP).clamp(0.0, 1.0);
                self.store.update_importance(existing.id, bumped).await?;
                tracing::debug!(id = existing.id, "merged duplicate memory");
                return Ok(existing.id);
            }
        }

        let embedding = record.embedding.clone();
        let edges = record.graph_edges.clone();
        let session_id = record.session_id.clone();
        let space = record.space.clone();

        let id = self.store.store(record).await?;
        if id == 0 {
            return Ok(0);
        }

        if !edges.is_empty() {
            if let Some(graph) = self.store.as_graph_store() {
                graph.upsert_graph(id, &edges).await?;
            }
        }

        let assignment = self.assign_cluster(id, &embedding);
        if let ClusterAssignment::Joined {
            needs_summary: Some((cluster_id, members, centroid)),
        } = assignment
        {
            if let Err(e) = self
                .summarize_cluster(cluster_id, &members, &centroid, &session_id, &space)
                .await
            {
                tracing::warn!(error = %e, cluster = %cluster_id, "cluster summarization skipped");
            }
        }

        self.prune().await?;
        Ok(id)
    }

    /// Cluster bookkeeping. The lock covers only the in-memory mutation;
    /// summarization happens after release.
    fn assign_cluster(&self, id: i64, embedding: &[f32]) -> ClusterAssignment {
        let mut clusters = self.clusters.lock();

        let best = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(embedding, &c.centroid)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        if let Some((idx, sim)) = best {
            // Joining requires centroid agreement; a record that agrees only
            // loosely is drifting and gets its own cluster rather than
            // distorting the old one.
            if sim >= self.config.cluster_similarity && sim >= self.config.drift_threshold {
                let cluster = &mut clusters[idx];
                cluster.members.push(id);
                update_centroid(&mut cluster.centroid, embedding, cluster.members.len());

                let needs_summary = (!cluster.summarized
                    && cluster.members.len() >= self.config.summary_threshold)
                    .then(|| {
                        cluster.summarized = true;
                        (cluster.id, cluster.members.clone(), cluster.centroid.clone())
                    });

                return ClusterAssignment::Joined { needs_summary };
            }
        }

        clusters.push(Cluster {
            id: Uuid::new_v4(),
            centroid: embedding.to_vec(),
            members: vec![id],
            summarized: false,
        });
        ClusterAssignment::Spawned
    }

    async fn summarize_cluster(
        &self,
        cluster_id: Uuid,
        member_ids: &[i64],
        centroid: &[f32],
        session_id: &str,
        space: &str,
    ) -> Result<()> {
        let summarizer = match &self.summarizer {
            Some(s) => Arc::clone(s),
            None => return Ok(()),
        };

        let members = self.fetch_by_ids(member_ids).await?;
        if members.is_empty() {
            return Ok(());
        }

        let contents: Vec<String> = members.iter().map(|r| r.content.clone()).collect();
        let summary = summarizer.summarize(&contents).await?;
        if summary.trim().is_empty() {
            return Ok(());
        }

        let avg_importance =
            members.iter().map(|r| r.importance).sum::<f32>() / members.len() as f32;

        let record = MemoryRecord::new(session_id, summary.clone())
            .with_space(space)
            .with_source("summary")
            .with_importance((avg_importance + 0.1).clamp(0.0, 1.0))
            .with_embedding(centroid.to_vec())
            .with_metadata(HashMap::from([(
                "cluster_id".to_string(),
                cluster_id.to_string(),
            )]));
        self.store.store(record).await?;

        // Prune constituents whose composite score sits below the quantile.
        let quantile = self.config.prune_quantile.clamp(0.0, 1.0);
        if quantile > 0.0 && members.len() > 1 {
            let now = Utc::now();
            let query_tokens: HashSet<String> = HashSet::new();
            let mut scored: Vec<(i64, f32)> = members
                .iter()
                .map(|r| {
                    let sim = r.similarity_to(centroid);
                    (r.id, self.composite_score(r, sim, &query_tokens, now))
                })
                .collect();
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));

            let cut = ((members.len() as f32) * quantile).floor() as usize;
            if cut > 0 {
                let doomed: Vec<i64> = scored.iter().take(cut).map(|(id, _)| *id).collect();
                self.store.delete(&doomed).await?;
                let mut clusters = self.clusters.lock();
                if let Some(cluster) = clusters.iter_mut().find(|c| c.id == cluster_id) {
                    cluster.members.retain(|id| !doomed.contains(id));
                }
                tracing::debug!(cluster = %cluster_id, pruned = doomed.len(), "pruned summarized cluster");
            }
        }

        Ok(())
    }

    /// Re-embeds a stored record's content, e.g. after an embedder upgrade.
    /// The record itself stays immutable apart from the refreshed vector.
    pub async fn refresh_embedding(&self, id: i64, content: &str) -> Result<()> {
        let embedding = self.embed(content).await;
        self.store.update_embedding(id, embedding, Utc::now()).await
    }

    /// TTL and size eviction, lowest-score-first for the size limit.
    pub async fn prune(&self) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - self.config.ttl;

        let mut expired = Vec::new();
        let mut survivors: Vec<(i64, f32)> = Vec::new();
        let empty_tokens: HashSet<String> = HashSet::new();

        self.store
            .iterate(&mut |r| {
                if r.created_at < cutoff {
                    expired.push(r.id);
                } else {
                    let score = self.composite_score(r, 0.0, &empty_tokens, now);
                    survivors.push((r.id, score));
                }
                true
            })
            .await?;

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicting expired memories");
            self.store.delete(&expired).await?;
        }

        if survivors.len() > self.config.max_size {
            survivors.sort_by(|a, b| a.1.total_cmp(&b.1));
            let overflow = survivors.len() - self.config.max_size;
            let doomed: Vec<i64> = survivors.iter().take(overflow).map(|(id, _)| *id).collect();
            tracing::debug!(count = doomed.len(), "evicting over-capacity memories");
            self.store.delete(&doomed).await?;
        }

        Ok(())
    }

    /// Read path: embed the query, pull top-M store candidates, merge the
    /// caller's short-term entries (with their recency bonus), re-score with
    /// the composite function, and MMR-select k.
    pub async fn retrieve(
        &self,
        query: &str,
        spaces: &[String],
        k: usize,
        short_term: &[MemoryRecord],
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embed(query).await;
        let query_tokens = tokenize(query);
        let pool = (3 * k).max(20);

        let mut candidates = self.store.search(&query_embedding, pool).await?;
        if !spaces.is_empty() {
            candidates.retain(|r| spaces.iter().any(|s| s == &r.space));
        }

        let mut seen: HashSet<u64> = candidates.iter().map(|r| r.content_hash()).collect();
        let mut bonuses: HashMap<i64, f32> = HashMap::new();

        for record in short_term {
            if record.content.trim().is_empty() {
                continue;
            }
            if seen.insert(record.content_hash()) {
                bonuses.insert(record.id, SHORT_TERM_BONUS);
                candidates.push(record.clone());
            }
        }

        let now = Utc::now();
        let scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|record| {
                let sim = record.similarity_to(&query_embedding);
                let mut score = self.composite_score(&record, sim, &query_tokens, now);
                if let Some(bonus) = bonuses.get(&record.id) {
                    score += bonus;
                }
                ScoredRecord { record, score }
            })
            .collect();

        Ok(mmr_select(scored, k, self.config.lambda))
    }

    fn composite_score(
        &self,
        record: &MemoryRecord,
        similarity: f32,
        query_tokens: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f32 {
        let w = &self.config.weights;

        let kw = if query_tokens.is_empty() {
            0.0
        } else {
            let record_tokens = tokenize(&record.content);
            let hits = query_tokens.intersection(&record_tokens).count();
            hits as f32 / query_tokens.len() as f32
        };

        let age = (now - record.last_embedded).num_seconds().max(0) as f32;
        let half_life = self.config.half_life.num_seconds().max(1) as f32;
        let recency = (-age / half_life).exp();

        let boost = self
            .config
            .source_boost
            .get(&record.source)
            .copied()
            .unwrap_or(0.0);

        w.similarity * similarity
            + w.keywords * kw
            + w.importance * record.importance
            + w.recency * recency
            + w.source * boost
    }
}

fn update_centroid(centroid: &mut Vec<f32>, embedding: &[f32], member_count: usize) {
    let n = member_count as f32;
    if centroid.len() < embedding.len() {
        centroid.resize(embedding.len(), 0.0);
    }
    for (c, e) in centroid.iter_mut().zip(embedding.iter()) {
        *c += (*e - *c) / n;
    }
}

impl MemoryEngine {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<MemoryRecord>> {
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        let mut found = Vec::with_capacity(wanted.len());
        self.store
            .iterate(&mut |r| {
                if wanted.contains(&r.id) {
                    found.push(r.clone());
                }
                found.len() < wanted.len()
            })
            .await
            .map_err(|e| AgentError::Internal(format!("cluster member fetch: {e}")))?;
        Ok(found)
    }
}

/// Case-folded token set with stopwords removed.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap between two content token sets.
pub fn token_set_overlap(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Maximal Marginal Relevance selection over composite-scored candidates.
///
/// Picks argmax of `lambda * score - (1 - lambda) * max_sim_to_selected`;
/// ties break by larger importance, then newer `last_embedded`, then smaller
/// id. Output scores are the composite scores, monotonically non-increasing.
pub fn mmr_select(candidates: Vec<ScoredRecord>, k: usize, lambda: f32) -> Vec<ScoredRecord> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut remaining = candidates;
    let mut selected: Vec<ScoredRecord> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_mmr = f32::NEG_INFINITY;

        for (i, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| record_similarity(&candidate.record, &s.record))
                .fold(0.0f32, f32::max);
            let mmr = lambda * candidate.score - (1.0 - lambda) * max_sim;

            let better = match mmr.total_cmp(&best_mmr) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    let cur = &remaining[best_idx];
                    let cand = &candidate.record;
                    let incumbent = &cur.record;
                    match cand.importance.total_cmp(&incumbent.importance) {
                        std::cmp::Ordering::Greater => true,
                        std::cmp::Ordering::Less => false,
                        std::cmp::Ordering::Equal => {
                            (cand.last_embedded, std::cmp::Reverse(cand.id))
                                > (incumbent.last_embedded, std::cmp::Reverse(incumbent.id))
                        }
                    }
                }
            };

            if better {
                best_idx = i;
                best_mmr = mmr;
            }
        }

        selected.push(remaining.swap_remove(best_idx));
    }

    // Presentation order: best composite first.
    selected.sort_by(|a, b| b.score.total_cmp(&a.score));
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    struct FixedEmbedder {
        map: HashMap<String, Vec<f32>>,
        width: usize,
    }

    impl FixedEmbedder {
        fn new(width: usize) -> Self {
            Self {
                map: HashMap::new(),
                width,
            }
        }

        fn with(mut self, text: &str, v: Vec<f32>) -> Self {
            self.map.insert(text.to_string(), v);
            self
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            match self.map.get(text) {
                Some(v) => Ok(v.clone()),
                None => Ok(dummy_embedding(text, self.width)),
            }
        }

        fn dimensions(&self) -> usize {
            self.width
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AgentError::Upstream("embedding service down".into()))
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn engine_with(embedder: impl Embedder + 'static) -> MemoryEngine {
        MemoryEngine::new(Arc::new(InMemoryStore::new()), Arc::new(embedder))
    }

    #[test]
    fn weights_normalize_to_unit_sum() {
        let w = ScoreWeights {
            similarity: 2.0,
            keywords: 1.0,
            importance: 1.0,
            recency: 0.5,
            source: 0.5,
        }
        .normalized();
        let sum = w.similarity + w.keywords + w.importance + w.recency + w.source;
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((w.similarity - 0.4).abs() < 1e-6);
    }

    #[test]
    fn zero_weights_fall_back_to_defaults() {
        let w = ScoreWeights {
            similarity: 0.0,
            keywords: 0.0,
            importance: 0.0,
            recency: 0.0,
            source: 0.0,
        }
        .normalized();
        assert!((w.similarity - 0.45).abs() < 1e-6);
    }

    #[test]
    fn tokenize_folds_case_and_drops_stopwords() {
        let tokens = tokenize("What is the Memory Engine?");
        assert!(tokens.contains("memory"));
        assert!(tokens.contains("engine"));
        assert!(!tokens.contains("what"));
        assert!(!tokens.contains("the"));
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_dummy_vector() {
        let engine = engine_with(FailingEmbedder);
        let v = engine.embed("whatever").await;
        assert_eq!(v.len(), 8);
        assert_eq!(v, dummy_embedding("whatever", 8));
    }

    #[tokio::test]
    async fn duplicate_insert_merges_with_importance_bump() {
        let embedder = FixedEmbedder::new(4).with("the same fact", vec![1.0, 0.0, 0.0, 0.0]);
        let engine = engine_with(embedder);

        let first = engine
            .add(MemoryRecord::new("s", "the same fact"))
            .await
            .unwrap();
        let second = engine
            .add(MemoryRecord::new("s", "the same fact"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.store_handle().count().await.unwrap(), 1);

        let stored = engine
            .store_handle()
            .search(&[1.0, 0.0, 0.0, 0.0], 1)
            .await
            .unwrap();
        assert!((stored[0].importance - 0.55).abs() < 1e-6);
    }

    #[tokio::test]
    async fn duplicate_bump_clamps_at_one() {
        let embedder = FixedEmbedder::new(4).with("pinned", vec![0.0, 1.0, 0.0, 0.0]);
        let engine = engine_with(embedder);

        engine
            .add(MemoryRecord::new("s", "pinned").with_importance(0.99))
            .await
            .unwrap();
        engine.add(MemoryRecord::new("s", "pinned")).await.unwrap();

        let stored = engine
            .store_handle()
            .search(&[0.0, 1.0, 0.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(stored[0].importance, 1.0);
    }

    #[tokio::test]
    async fn dissimilar_content_is_not_merged() {
        let embedder = FixedEmbedder::new(4)
            .with("cats are mammals", vec![1.0, 0.0, 0.0, 0.0])
            .with("rust has ownership", vec![0.0, 1.0, 0.0, 0.0]);
        let engine = engine_with(embedder);

        engine
            .add(MemoryRecord::new("s", "cats are mammals"))
            .await
            .unwrap();
        engine
            .add(MemoryRecord::new("s", "rust has ownership"))
            .await
            .unwrap();

        assert_eq!(engine.store_handle().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn retrieval_respects_k_and_orders_by_score() {
        let engine = engine_with(FixedEmbedder::new(16));
        for i in 0..10 {
            engine
                .add(MemoryRecord::new("s", format!("note number {i} about rust")))
                .await
                .unwrap();
        }

        let hits = engine
            .retrieve("note about rust", &["s".to_string()], 3, &[])
            .await
            .unwrap();
        assert!(hits.len() <= 3);

        let mut prev = f32::INFINITY;
        let mut ids = HashSet::new();
        for hit in &hits {
            assert!(hit.score <= prev);
            prev = hit.score;
            assert!(ids.insert(hit.record.id), "duplicate id in retrieval");
        }
    }

    #[tokio::test]
    async fn retrieval_filters_by_space() {
        let embedder = FixedEmbedder::new(4)
            .with("alpha fact", vec![1.0, 0.0, 0.0, 0.0])
            .with("beta fact", vec![0.9, 0.1, 0.0, 0.0])
            .with("alpha", vec![1.0, 0.0, 0.0, 0.0]);
        let engine = engine_with(embedder);

        engine
            .add(MemoryRecord::new("s1", "alpha fact").with_space("team:a"))
            .await
            .unwrap();
        engine
            .add(MemoryRecord::new("s2", "beta fact").with_space("team:b"))
            .await
            .unwrap();

        let hits = engine
            .retrieve("alpha", &["team:a".to_string()], 5, &[])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.space, "team:a");
    }

    #[tokio::test]
    async fn short_term_candidates_receive_bonus() {
        let engine = engine_with(FixedEmbedder::new(8));
        let fresh = MemoryRecord::new("s", "just said this").with_embedding(dummy_embedding(
            "just said this",
            8,
        ));

        let hits = engine
            .retrieve("anything at all", &[], 5, &[fresh])
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.record.content == "just said this"));
    }

    #[tokio::test]
    async fn refresh_embedding_updates_vector_and_timestamp() {
        let embedder = FixedEmbedder::new(4).with("drifting note", vec![1.0, 0.0, 0.0, 0.0]);
        let engine = engine_with(embedder);

        let id = engine
            .add(MemoryRecord::new("s", "drifting note"))
            .await
            .unwrap();

        let before = engine
            .store_handle()
            .search(&[1.0, 0.0, 0.0, 0.0], 1)
            .await
            .unwrap()[0]
            .last_embedded;

        // Re-embed against different content.
        engine.refresh_embedding(id, "entirely new angle").await.unwrap();

        let mut refreshed = None;
        engine
            .store_handle()
            .iterate(&mut |r| {
                if r.id == id {
                    refreshed = Some(r.clone());
                }
                true
            })
            .await
            .unwrap();
        let refreshed = refreshed.unwrap();
        assert_ne!(refreshed.embedding, vec![1.0, 0.0, 0.0, 0.0]);
        assert!(refreshed.last_embedded >= before);
    }

    #[tokio::test]
    async fn ttl_pruning_evicts_old_records() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = EngineConfig::default();
        config.ttl = Duration::hours(1);
        let engine = MemoryEngine::with_config(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::new(FixedEmbedder::new(4)),
            config,
        );

        let mut old = MemoryRecord::new("s", "ancient history").with_embedding(vec![1.0]);
        old.created_at = Utc::now() - Duration::hours(5);
        old.last_embedded = old.created_at;
        store.store(old).await.unwrap();

        engine
            .add(MemoryRecord::new("s", "current events"))
            .await
            .unwrap();

        let mut contents = Vec::new();
        store
            .iterate(&mut |r| {
                contents.push(r.content.clone());
                true
            })
            .await
            .unwrap();
        assert_eq!(contents, vec!["current events"]);
    }

    #[tokio::test]
    async fn size_pruning_evicts_lowest_score_first() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = EngineConfig::default();
        config.max_size = 3;
        let engine = MemoryEngine::with_config(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::new(FixedEmbedder::new(4)),
            config,
        );

        for (content, importance) in [
            ("low value note", 0.1),
            ("medium value note", 0.5),
            ("high value note", 0.9),
            ("another high note", 0.8),
        ] {
            engine
                .add(MemoryRecord::new("s", content).with_importance(importance))
                .await
                .unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 3);
        let mut contents = Vec::new();
        store
            .iterate(&mut |r| {
                contents.push(r.content.clone());
                true
            })
            .await
            .unwrap();
        assert!(!contents.contains(&"low value note".to_string()));
    }

    #[tokio::test]
    async fn oversize_cluster_produces_summary_record() {
        let store = Arc::new(InMemoryStore::new());
        // All records embed to the same direction so they share one cluster.
        let mut embedder = FixedEmbedder::new(4);
        for i in 0..4 {
            embedder = embedder.with(
                &format!("fact {i} about the deploy pipeline"),
                vec![1.0, 0.0, 0.0, 0.0],
            );
        }
        let mut config = EngineConfig::default();
        config.summary_threshold = 3;
        config.prune_quantile = 0.0;
        // Identical embeddings would otherwise merge as duplicates.
        config.duplicate_overlap = 1.1;
        let engine = MemoryEngine::with_config(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::new(embedder),
            config,
        )
        .with_summarizer(Arc::new(ExtractiveSummarizer::default()));

        for i in 0..4 {
            engine
                .add(MemoryRecord::new(
                    "s",
                    format!("fact {i} about the deploy pipeline"),
                ))
                .await
                .unwrap();
        }

        let mut summaries = Vec::new();
        store
            .iterate(&mut |r| {
                if r.source == "summary" {
                    summaries.push(r.clone());
                }
                true
            })
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].metadata.contains_key("cluster_id"));
    }

    #[test]
    fn mmr_prefers_diverse_results() {
        let mk = |id: i64, content: &str, emb: Vec<f32>, score: f32| ScoredRecord {
            record: {
                let mut r = MemoryRecord::new("s", content).with_embedding(emb);
                r.id = id;
                r
            },
            score,
        };

        // Two near-identical high scorers plus one distinct mid scorer.
        let candidates = vec![
            mk(1, "rust ownership", vec![1.0, 0.0], 0.9),
            mk(2, "rust ownership redux", vec![1.0, 0.01], 0.89),
            mk(3, "tokio scheduling", vec![0.0, 1.0], 0.6),
        ];

        let picked = mmr_select(candidates, 2, 0.5);
        let ids: Vec<i64> = picked.iter().map(|s| s.record.id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3), "diversity should beat the near-duplicate");
    }

    #[test]
    fn mmr_ties_break_by_importance_then_recency_then_id() {
        let now = Utc::now();
        let mk = |id: i64, importance: f32, at: DateTime<Utc>| ScoredRecord {
            record: {
                let mut r =
                    MemoryRecord::new("s", format!("r{id}")).with_embedding(vec![id as f32, 1.0]);
                r.id = id;
                r.importance = importance;
                r.last_embedded = at;
                r
            },
            score: 0.5,
        };

        let picked = mmr_select(
            vec![mk(5, 0.5, now), mk(2, 0.9, now), mk(9, 0.5, now)],
            1,
            1.0,
        );
        assert_eq!(picked[0].record.id, 2);

        let earlier = now - Duration::minutes(10);
        let picked = mmr_select(vec![mk(7, 0.5, earlier), mk(4, 0.5, now)], 1, 1.0);
        assert_eq!(picked[0].record.id, 4);

        let picked = mmr_select(vec![mk(7, 0.5, now), mk(4, 0.5, now)], 1, 1.0);
        assert_eq!(picked[0].record.id, 4);
    }
}
