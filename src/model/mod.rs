//! Text-completion capability used by the pipeline
//!
//! The pipeline needs exactly one thing from a model provider: a stateful
//! conversation that can be created from a system prompt, forked, asked to
//! count tokens, prompted, and destroyed.

pub mod chat;
pub mod scripted;
pub mod token_estimator;

pub use chat::{ChatCompletionModel, ChatSession};
pub use scripted::{ScriptedModel, ScriptedStats};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};

use crate::error::Result;
use async_trait::async_trait;

/// Factory for model conversations
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a new conversation scoped to `system_prompt`
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ModelSession>>;

    /// Backend name for logging
    fn name(&self) -> &'static str {
        "model"
    }
}

/// A live conversation with the model
///
/// `prompt` takes `&mut self`: one handle carries one sequence of turns.
/// Concurrent callers must `fork` and prompt their own copy.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Copy this conversation; turns on the copy never reach the parent
    async fn fork(&self) -> Result<Box<dyn ModelSession>>;

    /// Count prompt tokens for `text` as this session's tokenizer sees it
    async fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Send one user turn and return the model's text reply
    async fn prompt(&mut self, text: &str) -> Result<String>;

    /// Release backend resources. Safe to call more than once.
    async fn destroy(&mut self);
}
