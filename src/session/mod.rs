//! Model session lifecycle
//!
//! The manager owns at most one live conversation, created for one system
//! prompt. Callers either check out the primary conversation exclusively
//! (sequential turns) or take a fork (independent concurrent calls). Asking
//! for a different system prompt destroys the live session before a new one
//! is created.
//!
//! Errors are returned to the caller untouched; retrying is the caller's call.

pub mod truncation;

pub use truncation::{TruncationWindows, ELISION_MARKER};

use crate::config::SessionConfig;
use crate::error::{Result, SentinelError};
use crate::logging::preview;
use crate::metrics::METRICS;
use crate::model::{LanguageModel, ModelSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

type SharedSession = Arc<Mutex<Box<dyn ModelSession>>>;

/// How a caller wants to hold the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    /// The live conversation itself, held exclusively until the handle drops
    Exclusive,
    /// A private copy sharing history up to this point
    Fork,
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Active,
}

struct LiveSession {
    system_prompt: Arc<str>,
    primary: SharedSession,
}

enum HandleInner {
    Primary(OwnedMutexGuard<Box<dyn ModelSession>>),
    Fork(Box<dyn ModelSession>),
}

/// A checked-out conversation
pub struct SessionHandle {
    inner: HandleInner,
    system_prompt: Arc<str>,
}

impl SessionHandle {
    /// System prompt the underlying session was created with
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn is_fork(&self) -> bool {
        matches!(self.inner, HandleInner::Fork(_))
    }

    fn session(&self) -> &dyn ModelSession {
        match &self.inner {
            HandleInner::Primary(guard) => &***guard,
            HandleInner::Fork(session) => &**session,
        }
    }

    fn session_mut(&mut self) -> &mut dyn ModelSession {
        match &mut self.inner {
            HandleInner::Primary(guard) => &mut ***guard,
            HandleInner::Fork(session) => &mut **session,
        }
    }

    /// Give the handle back; forks are destroyed, the primary is unlocked
    pub async fn release(self) {
        if let HandleInner::Fork(mut session) = self.inner {
            session.destroy().await;
        }
    }
}

/// Owns the model conversation for one classification profile at a time
///
/// Sessions are keyed by system prompt text only. Callers that switch
/// between profiles sharing a system prompt call [`destroy`](Self::destroy)
/// or pass `force_new` to start over.
pub struct SessionManager {
    model: Arc<dyn LanguageModel>,
    config: SessionConfig,
    live: Mutex<Option<LiveSession>>,
}

impl SessionManager {
    pub fn new(model: Arc<dyn LanguageModel>, config: SessionConfig) -> Self {
        Self {
            model,
            config,
            live: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn windows(&self) -> TruncationWindows {
        TruncationWindows {
            head: self.config.head_words,
            middle: self.config.middle_words,
            tail: self.config.tail_words,
        }
    }

    pub async fn state(&self) -> SessionState {
        if self.live.lock().await.is_some() {
            SessionState::Active
        } else {
            SessionState::Absent
        }
    }

    /// System prompt of the live session, if any
    pub async fn active_system_prompt(&self) -> Option<String> {
        self.live
            .lock()
            .await
            .as_ref()
            .map(|live| live.system_prompt.to_string())
    }

    /// Make sure a session for `system_prompt` exists and check it out
    ///
    /// An exclusive checkout must be released before asking for a different
    /// system prompt, since switching waits for the old session to be free.
    pub async fn ensure(
        &self,
        system_prompt: &str,
        checkout: Checkout,
        force_new: bool,
    ) -> Result<SessionHandle> {
        let (primary, prompt) = self.live_session(system_prompt, force_new).await?;

        let inner = match checkout {
            Checkout::Exclusive => HandleInner::Primary(primary.lock_owned().await),
            Checkout::Fork => {
                let parent = primary.lock().await;
                HandleInner::Fork(parent.fork().await?)
            }
        };

        Ok(SessionHandle {
            inner,
            system_prompt: prompt,
        })
    }

    async fn live_session(
        &self,
        system_prompt: &str,
        force_new: bool,
    ) -> Result<(SharedSession, Arc<str>)> {
        let mut live = self.live.lock().await;

        let stale = match live.as_ref() {
            Some(current) => force_new || &*current.system_prompt != system_prompt,
            None => false,
        };
        if stale {
            if let Some(old) = live.take() {
                info!("System prompt changed, recreating model session");
                old.primary.lock().await.destroy().await;
            }
        }

        if live.is_none() {
            debug!("Creating {} session", self.model.name());
            let session = self.model.create_session(system_prompt).await?;
            *live = Some(LiveSession {
                system_prompt: Arc::from(system_prompt),
                primary: Arc::new(Mutex::new(session)),
            });
        }

        match live.as_ref() {
            Some(current) => Ok((current.primary.clone(), current.system_prompt.clone())),
            None => Err(SentinelError::SessionUnavailable),
        }
    }

    /// Send `message` on `handle` with the configured token budget
    pub async fn send(&self, handle: &mut SessionHandle, message: &str) -> Result<String> {
        self.send_within(handle, message, self.config.token_budget).await
    }

    /// Send `message`, truncating it when system prompt + message exceed `token_budget`
    pub async fn send_within(
        &self,
        handle: &mut SessionHandle,
        message: &str,
        token_budget: usize,
    ) -> Result<String> {
        let start = Instant::now();
        let combined = format!("{}{}", handle.system_prompt(), message);
        let estimated = handle.session().count_tokens(&combined).await?;

        let windows = self.windows();
        let processed = if estimated > token_budget {
            debug!(
                "Prompt estimated at {} tokens (budget {}), truncating",
                estimated, token_budget
            );
            METRICS.record_truncation();
            windows.apply(message)
        } else {
            std::borrow::Cow::Borrowed(message)
        };

        let timeout = self.config.prompt_timeout();
        let outcome = match tokio::time::timeout(timeout, handle.session_mut().prompt(&processed)).await {
            Ok(Ok(reply)) if reply.trim().is_empty() => Err(SentinelError::InvalidResponse(
                "model returned no text".to_string(),
            )),
            Ok(result) => result,
            Err(_) => Err(SentinelError::Timeout(timeout)),
        };

        let elapsed = start.elapsed();
        match &outcome {
            Ok(_) => METRICS.record_model_call("success", elapsed),
            Err(e) => {
                warn!(
                    "Model call failed after {:?}: {} (message: {:?})",
                    elapsed,
                    e,
                    preview(message)
                );
                METRICS.record_model_call(e.kind(), elapsed);
            }
        }

        outcome
    }

    /// Release the live session. Does nothing when none exists.
    pub async fn destroy(&self) {
        let old = self.live.lock().await.take();
        if let Some(old) = old {
            info!("Destroying model session");
            old.primary.lock().await.destroy().await;
        }
    }

    pub fn prompt_timeout(&self) -> Duration {
        self.config.prompt_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn manager(model: ScriptedModel) -> (SessionManager, Arc<crate::model::ScriptedStats>) {
        let stats = model.stats();
        (
            SessionManager::new(Arc::new(model), SessionConfig::default()),
            stats,
        )
    }

    #[tokio::test]
    async fn test_ensure_creates_once_per_prompt() {
        let (manager, stats) = manager(ScriptedModel::constant("1"));
        assert_eq!(manager.state().await, SessionState::Absent);

        let h1 = manager.ensure("nsfw", Checkout::Fork, false).await.unwrap();
        let h2 = manager.ensure("nsfw", Checkout::Fork, false).await.unwrap();
        assert!(h1.is_fork() && h2.is_fork());
        assert_eq!(stats.sessions_created(), 1);
        assert_eq!(manager.state().await, SessionState::Active);
    }

    #[tokio::test]
    async fn test_prompt_change_destroys_then_recreates() {
        let (manager, stats) = manager(ScriptedModel::constant("1"));
        manager.ensure("nsfw", Checkout::Exclusive, false).await.unwrap().release().await;
        manager.ensure("spoilers", Checkout::Exclusive, false).await.unwrap().release().await;

        assert_eq!(stats.sessions_created(), 2);
        assert_eq!(stats.sessions_destroyed(), 1);
        assert_eq!(stats.system_prompts(), vec!["nsfw", "spoilers"]);
        assert_eq!(manager.active_system_prompt().await.as_deref(), Some("spoilers"));
    }

    #[tokio::test]
    async fn test_force_new_recreates_same_prompt() {
        let (manager, stats) = manager(ScriptedModel::constant("1"));
        manager.ensure("nsfw", Checkout::Fork, false).await.unwrap().release().await;
        manager.ensure("nsfw", Checkout::Fork, true).await.unwrap().release().await;
        assert_eq!(stats.sessions_created(), 2);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (manager, stats) = manager(ScriptedModel::constant("1"));
        manager.ensure("nsfw", Checkout::Fork, false).await.unwrap().release().await;
        manager.destroy().await;
        manager.destroy().await;
        assert_eq!(manager.state().await, SessionState::Absent);
        // one fork released + the primary
        assert_eq!(stats.sessions_destroyed(), 2);
    }

    #[tokio::test]
    async fn test_send_passes_short_message_through() {
        let (manager, stats) = manager(ScriptedModel::constant("Rating: 2"));
        let mut handle = manager.ensure("sys", Checkout::Fork, false).await.unwrap();
        let reply = manager.send(&mut handle, "a short paragraph").await.unwrap();
        assert_eq!(reply, "Rating: 2");
        assert_eq!(stats.prompt_log(), vec!["a short paragraph"]);
    }

    #[tokio::test]
    async fn test_send_truncates_over_budget() {
        let (manager, stats) = manager(ScriptedModel::constant("Rating: 2"));
        let message = (0..3000).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let mut handle = manager.ensure("sys", Checkout::Fork, false).await.unwrap();
        manager.send(&mut handle, &message).await.unwrap();

        let sent = &stats.prompt_log()[0];
        assert_eq!(sent.matches("[...]").count(), 2);
        assert!(sent.len() < message.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out() {
        let model = ScriptedModel::constant("5").with_latency(Duration::from_secs(60));
        let (manager, _) = manager(model);
        let mut handle = manager.ensure("sys", Checkout::Fork, false).await.unwrap();
        let err = manager.send(&mut handle, "slow").await.unwrap_err();
        assert!(matches!(err, SentinelError::Timeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_blank_reply_is_invalid_response() {
        let (manager, _) = manager(ScriptedModel::constant("   "));
        let mut handle = manager.ensure("sys", Checkout::Fork, false).await.unwrap();
        let err = manager.send(&mut handle, "text").await.unwrap_err();
        assert!(matches!(err, SentinelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_model_errors_propagate() {
        let model = ScriptedModel::new(|_, _| Err(SentinelError::Model("quota".to_string())));
        let (manager, _) = manager(model);
        let mut handle = manager.ensure("sys", Checkout::Exclusive, false).await.unwrap();
        let err = manager.send(&mut handle, "text").await.unwrap_err();
        assert_eq!(err.to_string(), "Model error: quota");
    }
}
