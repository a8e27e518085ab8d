//! Pipeline assembly
//!
//! [`Sentinel`] wires the settings store, session manager, analyzer,
//! scheduler and profile tooling together from one [`Config`].

use crate::config::Config;
use crate::error::Result;
use crate::model::LanguageModel;
use crate::profile::{Profile, ProfileGenerator, ProfileManager};
use crate::retry::RetryPolicy;
use crate::scheduler::{BatchRun, BatchScheduler, Segment, SessionAnalyzer};
use crate::session::SessionManager;
use crate::settings::SettingsStore;
use crate::signals::eligible_segments;
use crate::store::{FileStore, KeyValueStore, MemoryStore};
use std::sync::Arc;
use tracing::info;

/// Builder for [`Sentinel`]
pub struct SentinelBuilder {
    config: Config,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SentinelBuilder {
    /// Use `store` instead of the one named in the config
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load settings, seed default profiles and assemble the pipeline
    pub async fn build(self, model: Arc<dyn LanguageModel>) -> Result<Sentinel> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match (self.store, &config.store.path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path).await?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let settings = Arc::new(SettingsStore::load(store).await?);
        let profiles = ProfileManager::new(settings.clone());
        profiles.initialize().await?;

        let sessions = Arc::new(SessionManager::new(model.clone(), config.session.clone()));
        let analyzer = SessionAnalyzer::new(sessions.clone(), settings.clone()).with_cache(&config.cache);
        let scheduler = BatchScheduler::new(Arc::new(analyzer), config.scheduler.clone())
            .watch_settings(settings.clone());
        let generator = ProfileGenerator::new(
            model.clone(),
            config.session.clone(),
            RetryPolicy::from(&config.retry),
        );

        info!(
            "Pipeline ready with {} model (concurrency cap {})",
            model.name(),
            config.scheduler.concurrency_cap
        );

        Ok(Sentinel {
            config,
            settings,
            sessions,
            profiles,
            generator,
            scheduler,
        })
    }
}

/// The assembled analysis pipeline
pub struct Sentinel {
    config: Config,
    settings: Arc<SettingsStore>,
    sessions: Arc<SessionManager>,
    profiles: ProfileManager,
    generator: ProfileGenerator,
    scheduler: BatchScheduler,
}

impl Sentinel {
    pub fn builder(config: Config) -> SentinelBuilder {
        SentinelBuilder {
            config,
            store: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    /// Analyse every segment as given
    pub fn run_batch(&self, segments: Vec<Segment>) -> BatchRun {
        self.scheduler.run_batch(segments)
    }

    /// Analyse only segments longer than the configured minimum
    pub fn analyze_page(&self, segments: Vec<Segment>) -> BatchRun {
        let eligible = eligible_segments(segments, self.config.scheduler.min_segment_chars);
        self.scheduler.run_batch(eligible)
    }

    /// Synthesize a profile without saving it
    pub async fn generate_profile(&self, description: &str) -> Result<Profile> {
        self.generator.generate(description).await
    }

    /// Synthesize a profile, save it and make it active
    pub async fn generate_and_activate(&self, description: &str) -> Result<Profile> {
        let profile = self.generator.generate(description).await?;
        self.profiles.upsert(profile.clone()).await?;
        self.profiles.set_active(&profile.name).await?;
        Ok(profile)
    }

    /// Release every model session
    pub async fn shutdown(&self) {
        self.sessions.destroy().await;
        self.generator.shutdown().await;
    }
}
