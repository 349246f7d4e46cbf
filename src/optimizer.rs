//! Prompt self-optimization surface.
//!
//! Versions are append-only; the best pointer always tracks the maximum
//! score. External optimization loops record candidate prompts with their
//! measured score and read back the current best.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One scored prompt candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub version: u32,
    pub prompt: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

/// Append-only prompt history with a best pointer.
pub struct PromptOptimizer {
    inner: Mutex<OptimizerState>,
}

struct OptimizerState {
    versions: Vec<PromptVersion>,
    best: Option<usize>,
}

impl PromptOptimizer {
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        let optimizer = Self {
            inner: Mutex::new(OptimizerState {
                versions: Vec::new(),
                best: None,
            }),
        };
        optimizer.record(initial_prompt, 0.0);
        optimizer
    }

    /// Appends a new version and returns it. The best pointer moves only on
    /// a strictly greater score, so earlier versions win ties.
    pub fn record(&self, prompt: impl Into<String>, score: f32) -> PromptVersion {
        let mut inner = self.inner.lock();
        let version = PromptVersion {
            version: inner.versions.len() as u32 + 1,
            prompt: prompt.into(),
            score,
            timestamp: Utc::now(),
        };
        inner.versions.push(version.clone());

        let idx = inner.versions.len() - 1;
        let improved = match inner.best {
            Some(best) => score > inner.versions[best].score,
            None => true,
        };
        if improved {
            inner.best = Some(idx);
        }
        version
    }

    /// The highest-scoring version so far.
    pub fn best(&self) -> PromptVersion {
        let inner = self.inner.lock();
        let idx = inner.best.expect("optimizer always holds at least one version");
        inner.versions[idx].clone()
    }

    /// Full append-only history.
    pub fn history(&self) -> Vec<PromptVersion> {
        self.inner.lock().versions.clone()
    }
}
