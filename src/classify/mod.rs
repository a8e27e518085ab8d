//! Score extraction and strictness-based bucketing
//!
//! Everything here is pure: the same reply and strictness always produce the
//! same classification.

use serde::{Deserialize, Serialize};

/// Highest score a model may assign
pub const MAX_SCORE: u8 = 10;

/// Threshold policy selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Low,
    #[default]
    Medium,
    High,
}

impl Strictness {
    pub fn all() -> &'static [Strictness] {
        &[Strictness::Low, Strictness::Medium, Strictness::High]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strictness::Low => "low",
            Strictness::Medium => "medium",
            Strictness::High => "high",
        }
    }

    /// Thresholds applied at this strictness
    pub fn thresholds(&self) -> ThresholdPair {
        match self {
            Strictness::Low => ThresholdPair::new(10, 10),
            Strictness::Medium => ThresholdPair::new(2, 7),
            Strictness::High => ThresholdPair::new(0, 2),
        }
    }

    /// Short description shown next to the setting
    pub fn description(&self) -> &'static str {
        match self {
            Strictness::Low => "More permissive content filtering",
            Strictness::Medium => "Balanced content filtering",
            Strictness::High => "Strict content filtering",
        }
    }
}

impl std::fmt::Display for Strictness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucketed outcome for one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Safe,
    Moderate,
    TooSensitive,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Safe => "safe",
            SafetyLevel::Moderate => "moderate",
            SafetyLevel::TooSensitive => "too_sensitive",
        }
    }
}

/// Score boundaries for one strictness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPair {
    /// Scores at or below this are Safe
    pub safe_ceiling: u8,
    /// Scores at or above this (and above `safe_ceiling`) are TooSensitive
    pub moderate_floor: u8,
}

impl ThresholdPair {
    pub const fn new(safe_ceiling: u8, moderate_floor: u8) -> Self {
        Self {
            safe_ceiling,
            moderate_floor,
        }
    }

    /// `<=` ceiling is checked first, so it wins when the ranges overlap
    pub fn level_for(&self, score: u8) -> SafetyLevel {
        if score <= self.safe_ceiling {
            SafetyLevel::Safe
        } else if score >= self.moderate_floor {
            SafetyLevel::TooSensitive
        } else {
            SafetyLevel::Moderate
        }
    }
}

/// What to score a reply that contains no number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnparsablePolicy {
    /// Score 0, which is Safe at every strictness
    #[default]
    FailOpen,
    /// Score 10, which is TooSensitive at Medium and High
    FailClosed,
}

impl UnparsablePolicy {
    fn fallback_score(&self) -> u8 {
        match self {
            UnparsablePolicy::FailOpen => 0,
            UnparsablePolicy::FailClosed => MAX_SCORE,
        }
    }
}

/// Result of classifying one model reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub score: u8,
    pub level: SafetyLevel,
    pub explanation: String,
    /// False when the reply had no digits and the fallback score was used
    pub parsed: bool,
}

/// Value of the first maximal run of ASCII digits, if any
///
/// Runs too long for `u64` saturate.
pub fn extract_score(response: &str) -> Option<u64> {
    let start = response.find(|c: char| c.is_ascii_digit())?;
    let run = &response[start..];
    let end = run
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(run.len());

    Some(run[..end].bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
    }))
}

/// Classify a reply with the default fail-open policy
pub fn classify(response: &str, strictness: Strictness) -> Classification {
    classify_with(response, strictness, UnparsablePolicy::default())
}

/// Classify a reply, clamping the score into `0..=10`
pub fn classify_with(
    response: &str,
    strictness: Strictness,
    policy: UnparsablePolicy,
) -> Classification {
    let (score, parsed) = match extract_score(response) {
        Some(raw) => (raw.min(u64::from(MAX_SCORE)) as u8, true),
        None => (policy.fallback_score(), false),
    };

    Classification {
        score,
        level: strictness.thresholds().level_for(score),
        explanation: response.to_string(),
        parsed,
    }
}
