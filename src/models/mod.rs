//! Model and embedder contracts.
//!
//! Concrete providers live outside the kit; the core consumes these traits
//! only. The streaming contract is push-based: chunks arrive on a channel
//! and the final chunk carries `done = true` with the aggregated text, or an
//! error.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{File, GenerationResponse, Message, StreamChunk};

/// Buffer size for streamed generation channels.
pub const STREAM_BUFFER: usize = 32;

/// LLM model interface
#[async_trait]
pub trait LLM: Send + Sync {
    /// Generates a response from the model
    async fn generate(
        &self,
        messages: Vec<Message>,
        files: Option<Vec<File>>,
    ) -> Result<GenerationResponse>;

    /// Streams a response. The default implementation degrades to a single
    /// generate call followed by one terminal chunk.
    async fn generate_stream(
        &self,
        messages: Vec<Message>,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        match self.generate(messages, None).await {
            Ok(response) => {
                let _ = tx.send(StreamChunk::delta(response.content.clone())).await;
                let _ = tx.send(StreamChunk::finished(response.content)).await;
            }
            Err(e) => {
                let _ = tx.send(StreamChunk::failed(e.to_string())).await;
            }
        }
        Ok(rx)
    }

    /// Returns the model name
    fn model_name(&self) -> &str;
}

/// Text embedding interface
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector width; used to size dummy fallback vectors.
    fn dimensions(&self) -> usize;
}

/// Deterministic hash-based vector used when the embedder is unavailable.
///
/// Storage must never block on the embedding model, so write paths degrade
/// to this fallback. The vector depends only on the text and the width, and
/// is L2-normalized so cosine math stays meaningful.
pub fn dummy_embedding(text: &str, width: usize) -> Vec<f32> {
    use std::hash::{Hash, Hasher};

    if width == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(width);
    let mut state: u64 = {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish() | 1
    };

    for _ in 0..width {
        // xorshift64 keeps the sequence cheap and reproducible.
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
        out.push(unit * 2.0 - 1.0);
    }

    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}
