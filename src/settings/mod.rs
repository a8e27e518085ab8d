//! Process-wide settings with change notification
//!
//! [`SettingsStore`] holds the only shared mutable state in the pipeline. All
//! changes go through [`SettingsStore::update`], which persists the whole
//! settings object under one key and then broadcasts a [`SettingsEvent`].

use crate::classify::{Strictness, UnparsablePolicy};
use crate::error::{Result, SentinelError};
use crate::profile::{Profile, DEFAULT_PROFILE};
use crate::store::KeyValueStore;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Store key the settings document lives under
pub const SETTINGS_KEY: &str = "settings";

const EVENT_CAPACITY: usize = 64;

/// User settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub strictness: Strictness,

    #[serde(default = "default_active_profile")]
    pub active_profile: String,

    #[serde(default)]
    pub profiles: IndexMap<String, Profile>,

    /// Score assigned when a reply has no number in it
    #[serde(default)]
    pub unparsable: UnparsablePolicy,
}

fn default_enabled() -> bool {
    true
}

fn default_active_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        let mut profiles = IndexMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), Profile::nsfw());
        Self {
            enabled: default_enabled(),
            strictness: Strictness::default(),
            active_profile: default_active_profile(),
            profiles,
            unparsable: UnparsablePolicy::default(),
        }
    }
}

impl Settings {
    /// Active profile, or the built-in default when the active name is stale
    pub fn active(&self) -> Profile {
        if let Some(profile) = self.profiles.get(&self.active_profile) {
            return profile.clone();
        }
        warn!(
            "Active profile {:?} not found, using {}",
            self.active_profile, DEFAULT_PROFILE
        );
        self.profiles
            .get(DEFAULT_PROFILE)
            .cloned()
            .unwrap_or_else(Profile::nsfw)
    }
}

/// Published after every successful update
#[derive(Debug, Clone)]
pub struct SettingsEvent {
    /// Increments by one per update
    pub revision: u64,
    pub settings: Arc<Settings>,
}

/// Owner of the settings snapshot
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    current: RwLock<Arc<Settings>>,
    /// Mirrors `current.enabled` for callers that cannot await
    enabled: AtomicBool,
    persisted: AtomicBool,
    revision: AtomicU64,
    events: broadcast::Sender<SettingsEvent>,
}

impl SettingsStore {
    /// Read settings from `store`, using defaults when nothing usable is there
    ///
    /// Defaults are not written back until the first update.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let (settings, persisted) = match store.get(SETTINGS_KEY).await? {
            Some(value) => match serde_json::from_value::<Settings>(value) {
                Ok(settings) => (settings, true),
                Err(e) => {
                    warn!("Stored settings are unreadable, using defaults: {}", e);
                    (Settings::default(), false)
                }
            },
            None => {
                debug!("No stored settings, using defaults");
                (Settings::default(), false)
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            enabled: AtomicBool::new(settings.enabled),
            current: RwLock::new(Arc::new(settings)),
            persisted: AtomicBool::new(persisted),
            revision: AtomicU64::new(0),
            events,
        })
    }

    /// Whether the current settings have been written to the store
    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Arc<Settings> {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    /// Whether analysis is currently switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Apply `change` to a copy of the settings, persist it, then publish it
    ///
    /// When `change` or the write fails the current settings are untouched.
    pub async fn update<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Settings) -> Result<T>,
    {
        let mut current = self.current.write().await;
        let mut next = Settings::clone(&current);
        let output = change(&mut next)?;

        let value = serde_json::to_value(&next)?;
        self.store
            .set(SETTINGS_KEY, value)
            .await
            .map_err(SentinelError::from)?;

        let next = Arc::new(next);
        *current = next.clone();
        self.enabled.store(next.enabled, Ordering::SeqCst);
        drop(current);

        self.persisted.store(true, Ordering::SeqCst);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        // no subscribers is fine
        let _ = self.events.send(SettingsEvent {
            revision,
            settings: next,
        });
        debug!("Settings updated to revision {}", revision);
        Ok(output)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        info!("Analysis {}", if enabled { "enabled" } else { "disabled" });
        self.update(|s| {
            s.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_strictness(&self, strictness: Strictness) -> Result<()> {
        info!("Strictness set to {}", strictness);
        self.update(|s| {
            s.strictness = strictness;
            Ok(())
        })
        .await
    }

    pub async fn set_unparsable_policy(&self, policy: UnparsablePolicy) -> Result<()> {
        self.update(|s| {
            s.unparsable = policy;
            Ok(())
        })
        .await
    }
}
