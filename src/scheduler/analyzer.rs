//! Per-segment analysis against the model session

use super::{AnalysisResult, Segment};
use crate::classify::classify_with;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::logging::preview;
use crate::metrics::METRICS;
use crate::session::{Checkout, SessionManager};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Turns one segment into a verdict
#[async_trait]
pub trait SegmentAnalyzer: Send + Sync {
    async fn analyze(&self, segment: &Segment) -> Result<AnalysisResult>;
}

/// Analyzer backed by the shared [`SessionManager`]
///
/// Settings are read at the start of every call, so profile and strictness
/// changes apply to the next segment dispatched. Switching the active
/// profile always starts a fresh model session, even when the new profile
/// shares the old one's system prompt.
pub struct SessionAnalyzer {
    sessions: Arc<SessionManager>,
    settings: Arc<SettingsStore>,
    verdicts: Option<Cache<String, Arc<str>>>,
    last_profile: Mutex<Option<String>>,
}

impl SessionAnalyzer {
    pub fn new(sessions: Arc<SessionManager>, settings: Arc<SettingsStore>) -> Self {
        Self {
            sessions,
            settings,
            verdicts: None,
            last_profile: Mutex::new(None),
        }
    }

    /// Remember raw replies per (system prompt, rendered prompt)
    pub fn with_cache(mut self, config: &CacheConfig) -> Self {
        self.verdicts = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(config.ttl())
                .build()
        });
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Record `name` as the profile in use; true when it replaces another
    async fn profile_switched(&self, name: &str) -> bool {
        let mut last = self.last_profile.lock().await;
        let switched = matches!(last.as_deref(), Some(previous) if previous != name);
        if last.as_deref() != Some(name) {
            *last = Some(name.to_string());
        }
        switched
    }

    async fn ask(&self, system_prompt: &str, prompt: &str, token_budget: usize) -> Result<Arc<str>> {
        let key = cache_key(system_prompt, prompt);
        if let Some(cache) = &self.verdicts {
            if let Some(reply) = cache.get(&key).await {
                METRICS.record_cache(true);
                return Ok(reply);
            }
            METRICS.record_cache(false);
        }

        let mut handle = self
            .sessions
            .ensure(system_prompt, Checkout::Fork, false)
            .await?;
        let reply = self
            .sessions
            .send_within(&mut handle, prompt, token_budget)
            .await;
        handle.release().await;

        let reply: Arc<str> = Arc::from(reply?);
        if let Some(cache) = &self.verdicts {
            cache.insert(key, reply.clone()).await;
        }
        Ok(reply)
    }
}

#[async_trait]
impl SegmentAnalyzer for SessionAnalyzer {
    async fn analyze(&self, segment: &Segment) -> Result<AnalysisResult> {
        let settings = self.settings.snapshot().await;
        let profile = settings.active();
        let prompt = profile.render(&segment.text);
        let budget = profile.token_budget_or(self.sessions.config().token_budget);

        if self.profile_switched(&profile.name).await {
            debug!("Active profile is now {}, dropping the old session", profile.name);
            self.sessions.destroy().await;
        }
        let reply = self.ask(&profile.system_prompt, &prompt, budget).await?;
        let classification = classify_with(&reply, settings.strictness, settings.unparsable);
        METRICS.record_classification(classification.level.as_str(), classification.parsed);

        debug!(
            "Segment {} scored {} ({}) under {}: {:?}",
            segment.id,
            classification.score,
            classification.level.as_str(),
            profile.name,
            preview(&reply)
        );
        Ok(AnalysisResult::new(segment.id, classification))
    }
}

fn cache_key(system_prompt: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system_prompt.as_bytes());
    hasher.update(b"|");
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}
