//! Classification profiles
//!
//! A profile bundles the system prompt a model session is created with and
//! the rating template each segment is rendered into. Profiles are stored
//! by name inside [`Settings`](crate::settings::Settings).

pub mod generator;
pub mod manager;

pub use generator::{ProfileGenerator, RUBRIC_RANGES};
pub use manager::ProfileManager;

use crate::config::SessionConfig;
use crate::error::{Result, SentinelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder replaced by the segment text
pub const TEXT_PLACEHOLDER: &str = "{{text}}";

/// Name of the built-in profile
pub const DEFAULT_PROFILE: &str = "nsfw";

const NSFW_SYSTEM_PROMPT: &str = "You are a friendly, helpful AI assistant with strict content moderation standards. Your main work is to rate.

Content Moderation Rules:
- Strictly avoid any adult themes, violence, inappropriate language, or mature content
- Immediately reject requests involving harmful, dangerous, or unsafe activities
- Keep responses educational and family-friendly
- If a topic is inappropriate for children, politely decline to discuss it

General Guidelines:
- Be concise but informative
- If you don't know something, be honest about it
- Always prioritize user safety and well-being";

const NSFW_RATING_TEMPLATE: &str = "Rate the following text for adult content and violence on a scale of 0-10 where:
1-2: No adult content or violence
2-4: Mild references to adult themes or mild violence (like pushing)
4-6: Moderate adult content or violence (fighting, mild gore)
6-8: Strong adult content or violence
8-10: Extreme adult content or extreme violence

Provide the rating and a brief explanation focusing only on adult content and violence levels.

Text to analyze: \"{{text}}\"";

const NSFW_RULES: [&str; 4] = [
    "Strictly avoid any adult themes, violence, inappropriate language, or mature content",
    "Immediately reject requests involving harmful, dangerous, or unsafe activities",
    "Keep responses educational and family-friendly",
    "If a topic is inappropriate for children, politely decline to discuss it",
];

const NSFW_BANDS: [(&str, &str); 5] = [
    ("1-2", "No adult content or violence"),
    ("2-4", "Mild references to adult themes or mild violence (like pushing)"),
    ("4-6", "Moderate adult content or violence (fighting, mild gore)"),
    ("6-8", "Strong adult content or violence"),
    ("8-10", "Extreme adult content or extreme violence"),
];

/// One row of a rating rubric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingBand {
    pub range: String,
    pub description: String,
}

impl RatingBand {
    pub fn new(range: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            range: range.into(),
            description: description.into(),
        }
    }
}

/// A named classification profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub system_prompt: String,
    /// Must contain [`TEXT_PLACEHOLDER`]
    pub rating_template: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub bands: Vec<RatingBand>,
    /// Overrides the session token budget for this profile
    #[serde(default)]
    pub token_budget: Option<usize>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        rating_template: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            rating_template: rating_template.into(),
            rules: Vec::new(),
            bands: Vec::new(),
            token_budget: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Built-in profile by name
    pub fn builtin(name: &str) -> Option<Profile> {
        match name {
            DEFAULT_PROFILE => Some(Self::nsfw()),
            _ => None,
        }
    }

    /// The adult content and violence profile seeded on first run
    pub fn nsfw() -> Profile {
        let mut profile = Profile::new(DEFAULT_PROFILE, NSFW_SYSTEM_PROMPT, NSFW_RATING_TEMPLATE);
        profile.rules = NSFW_RULES.iter().map(|r| r.to_string()).collect();
        profile.bands = NSFW_BANDS
            .iter()
            .map(|(range, description)| RatingBand::new(*range, *description))
            .collect();
        profile
    }

    pub fn is_builtin(&self) -> bool {
        Self::builtin(&self.name).is_some()
    }

    /// Substitute `text` for the first placeholder in the rating template
    pub fn render(&self, text: &str) -> String {
        self.rating_template.replacen(TEXT_PLACEHOLDER, text, 1)
    }

    /// Token budget to use with this profile, falling back to `default_budget`
    pub fn token_budget_or(&self, default_budget: usize) -> usize {
        self.token_budget.unwrap_or(default_budget)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SentinelError::InvalidProfile(
                "profile name must not be empty".to_string(),
            ));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(SentinelError::InvalidProfile(format!(
                "{}: system prompt must not be empty",
                self.name
            )));
        }
        if !self.rating_template.contains(TEXT_PLACEHOLDER) {
            return Err(SentinelError::InvalidProfile(format!(
                "{}: rating template must contain {}",
                self.name, TEXT_PLACEHOLDER
            )));
        }
        if let Some(budget) = self.token_budget {
            let range = SessionConfig::MIN_TOKEN_BUDGET..=SessionConfig::MAX_TOKEN_BUDGET;
            if !range.contains(&budget) {
                return Err(SentinelError::InvalidProfile(format!(
                    "{}: token budget {} outside {}-{}",
                    self.name,
                    budget,
                    SessionConfig::MIN_TOKEN_BUDGET,
                    SessionConfig::MAX_TOKEN_BUDGET
                )));
            }
        }
        Ok(())
    }
}
