//! Token counting for prompt budgeting

use crate::error::{Result, SentinelError};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;
}

/// Tiktoken-based estimator using cl100k_base
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| SentinelError::Configuration(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based estimator (~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

/// Pick tiktoken when requested and available, else the word heuristic
pub fn default_estimator(use_tiktoken: bool) -> Arc<dyn TokenEstimator> {
    if use_tiktoken {
        match TiktokenEstimator::new() {
            Ok(estimator) => return Arc::new(estimator),
            Err(e) => tracing::warn!("tiktoken unavailable, using word estimate: {}", e),
        }
    }
    Arc::new(WordBasedEstimator::default())
}
