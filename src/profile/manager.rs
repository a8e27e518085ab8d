//! CRUD over named profiles

use super::{Profile, DEFAULT_PROFILE};
use crate::error::{Result, SentinelError};
use crate::settings::{Settings, SettingsStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Profile operations on top of the settings store
///
/// Every mutation rewrites the whole settings object in one store write.
#[derive(Clone)]
pub struct ProfileManager {
    settings: Arc<SettingsStore>,
}

impl ProfileManager {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Seed the built-in profile and default settings on first run
    ///
    /// Calling this again once profiles exist changes nothing.
    pub async fn initialize(&self) -> Result<()> {
        let snapshot = self.settings.snapshot().await;
        if self.settings.is_persisted() && !snapshot.profiles.is_empty() {
            return Ok(());
        }

        info!("Seeding default settings and profiles");
        self.settings
            .update(|s| {
                if s.profiles.is_empty() {
                    *s = Settings::default();
                }
                Ok(())
            })
            .await
    }

    /// Active profile, falling back to the built-in default
    pub async fn get_active(&self) -> Profile {
        self.settings.snapshot().await.active()
    }

    pub async fn get(&self, name: &str) -> Option<Profile> {
        self.settings.snapshot().await.profiles.get(name).cloned()
    }

    /// Profile names in insertion order
    pub async fn list(&self) -> Vec<String> {
        self.settings.snapshot().await.profiles.keys().cloned().collect()
    }

    pub async fn set_active(&self, name: &str) -> Result<()> {
        self.settings
            .update(|s| {
                if !s.profiles.contains_key(name) {
                    return Err(SentinelError::ProfileNotFound(name.to_string()));
                }
                s.active_profile = name.to_string();
                Ok(())
            })
            .await?;
        info!("Active profile set to {}", name);
        Ok(())
    }

    /// Insert or replace a profile by name
    ///
    /// Replacing keeps the original `created_at` and position.
    pub async fn upsert(&self, mut profile: Profile) -> Result<()> {
        profile.validate()?;
        let name = profile.name.clone();

        self.settings
            .update(move |s| {
                let now = Utc::now();
                profile.updated_at = now;
                match s.profiles.get(&profile.name) {
                    Some(existing) => profile.created_at = existing.created_at,
                    None => profile.created_at = now,
                }
                s.profiles.insert(profile.name.clone(), profile);
                Ok(())
            })
            .await?;
        info!("Saved profile {}", name);
        Ok(())
    }

    /// Delete a profile, returning it
    ///
    /// Removing the active profile makes the first remaining profile active,
    /// or the built-in default when none remain.
    pub async fn remove(&self, name: &str) -> Result<Profile> {
        let removed = self
            .settings
            .update(|s| {
                let removed = s
                    .profiles
                    .shift_remove(name)
                    .ok_or_else(|| SentinelError::ProfileNotFound(name.to_string()))?;

                if s.active_profile == name {
                    s.active_profile = s
                        .profiles
                        .keys()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
                    info!("Removed active profile, now using {}", s.active_profile);
                }
                Ok(removed)
            })
            .await?;
        info!("Removed profile {}", name);
        Ok(removed)
    }

    /// Restore a built-in profile's shipped content
    pub async fn reset_to_default(&self, name: &str) -> Result<()> {
        let builtin =
            Profile::builtin(name).ok_or_else(|| SentinelError::ProfileNotFound(name.to_string()))?;

        self.settings
            .update(move |s| {
                let created_at = s
                    .profiles
                    .get(&builtin.name)
                    .map(|p| p.created_at)
                    .unwrap_or(builtin.created_at);
                let mut builtin = builtin;
                builtin.created_at = created_at;
                s.profiles.insert(builtin.name.clone(), builtin);
                Ok(())
            })
            .await?;
        info!("Reset profile {} to default", name);
        Ok(())
    }
}
