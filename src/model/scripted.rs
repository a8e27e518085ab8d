//! In-process model driven by a responder function
//!
//! Used for offline runs and tests: every prompt is answered by a closure that
//! sees the session's system prompt and the user text. Optional latency lets
//! callers exercise concurrency and timeouts.

use super::{LanguageModel, ModelSession};
use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&str, &str) -> Result<String> + Send + Sync;

/// Counters observed across all sessions of a [`ScriptedModel`]
#[derive(Debug, Default)]
pub struct ScriptedStats {
    pub sessions_created: AtomicUsize,
    pub sessions_destroyed: AtomicUsize,
    pub prompts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    prompt_log: Mutex<Vec<String>>,
    system_prompts: Mutex<Vec<String>>,
}

impl ScriptedStats {
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_destroyed(&self) -> usize {
        self.sessions_destroyed.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// User texts in the order they were prompted
    pub fn prompt_log(&self) -> Vec<String> {
        self.prompt_log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// System prompts sessions were created with
    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

/// Model whose replies come from a closure
pub struct ScriptedModel {
    responder: Arc<Responder>,
    latency: Duration,
    stats: Arc<ScriptedStats>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: Duration::ZERO,
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    /// Always answer with the same text
    pub fn constant(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Sleep this long inside every prompt
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ModelSession>> {
        self.stats.sessions_created.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.stats.system_prompts.lock() {
            log.push(system_prompt.to_string());
        }
        Ok(Box::new(ScriptedSession {
            system_prompt: system_prompt.to_string(),
            responder: self.responder.clone(),
            latency: self.latency,
            stats: self.stats.clone(),
            turns: Vec::new(),
            destroyed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    system_prompt: String,
    responder: Arc<Responder>,
    latency: Duration,
    stats: Arc<ScriptedStats>,
    turns: Vec<String>,
    destroyed: bool,
}

struct InFlightGuard<'a>(&'a ScriptedStats);

impl<'a> InFlightGuard<'a> {
    fn enter(stats: &'a ScriptedStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelSession for ScriptedSession {
    async fn fork(&self) -> Result<Box<dyn ModelSession>> {
        if self.destroyed {
            return Err(SentinelError::SessionUnavailable);
        }
        Ok(Box::new(ScriptedSession {
            system_prompt: self.system_prompt.clone(),
            responder: self.responder.clone(),
            latency: self.latency,
            stats: self.stats.clone(),
            turns: self.turns.clone(),
            destroyed: false,
        }))
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }

    async fn prompt(&mut self, text: &str) -> Result<String> {
        if self.destroyed {
            return Err(SentinelError::SessionUnavailable);
        }

        let _guard = InFlightGuard::enter(&self.stats);
        self.stats.prompts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.stats.prompt_log.lock() {
            log.push(text.to_string());
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = (self.responder)(&self.system_prompt, text)?;
        self.turns.push(text.to_string());
        Ok(reply)
    }

    async fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.stats.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
