//! Meta-prompting profile generator
//!
//! A profile is synthesized from a free-text description in two independent
//! rounds against the model: one for moderation rules, one for a rating
//! rubric. Each round parses and validates the reply and is retried on any
//! failure. The final prompts are assembled from the parsed pieces without
//! further model calls.

use super::{Profile, RatingBand, TEXT_PLACEHOLDER};
use crate::config::SessionConfig;
use crate::error::{GenerationStage, ParseError, Result, SentinelError};
use crate::metrics::METRICS;
use crate::model::LanguageModel;
use crate::retry::RetryPolicy;
use crate::session::{Checkout, SessionManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ranges a rubric must cover, in order
pub const RUBRIC_RANGES: [&str; 5] = ["0-2", "3-4", "5-6", "7-8", "9-10"];

/// A rule list must be longer than this
pub const MIN_RULES_EXCLUSIVE: usize = 3;

const GENERATOR_SYSTEM_PROMPT: &str =
    "You are an AI prompt generator specializing in creating content rating guidelines.";

const RULE_MARKER: &str = "moderationrule";

const SYSTEM_PROMPT_PREAMBLE: &str =
    "You are a content moderation assistant. Your main work is to rate text against these rules:";

const SYSTEM_PROMPT_GUIDELINES: &str = "General Guidelines:
- Be concise but informative
- If you don't know something, be honest about it
- Always prioritize user safety and well-being";

/// Generates profiles through its own model session
pub struct ProfileGenerator {
    sessions: SessionManager,
    retry: RetryPolicy,
}

impl ProfileGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, session: SessionConfig, retry: RetryPolicy) -> Self {
        Self {
            sessions: SessionManager::new(model, session),
            retry,
        }
    }

    /// Synthesize a profile for `description`
    ///
    /// The profile is named after the description; rename it before saving
    /// if needed. Nothing is persisted here.
    pub async fn generate(&self, description: &str) -> Result<Profile> {
        let description = description.trim();
        if description.is_empty() {
            return Err(SentinelError::InvalidProfile(
                "description must not be empty".to_string(),
            ));
        }

        info!("Generating profile for {:?}", description);
        let rules = self
            .round(GenerationStage::Rules, &rules_request(description), |reply| {
                validate_rules(parse_rules(reply))
            })
            .await?;

        let bands = self
            .round(GenerationStage::Rubric, &rubric_request(description), |reply| {
                validate_bands(parse_bands(reply))
            })
            .await?;

        let mut profile = Profile::new(
            profile_name(description),
            assemble_system_prompt(&rules),
            assemble_rating_template(description, &bands),
        );
        profile.rules = rules;
        profile.bands = bands;
        Ok(profile)
    }

    /// Release the generator's model session
    pub async fn shutdown(&self) {
        self.sessions.destroy().await;
    }

    async fn round<T, P>(&self, stage: GenerationStage, request: &str, parse: P) -> Result<T>
    where
        P: Fn(&str) -> std::result::Result<T, ParseError>,
    {
        let parse = &parse;
        let outcome = self
            .retry
            .run(
                || async move {
                    // a fresh fork per attempt so earlier replies don't leak in
                    let mut handle = self
                        .sessions
                        .ensure(GENERATOR_SYSTEM_PROMPT, Checkout::Fork, false)
                        .await?;
                    let reply = self.sessions.send(&mut handle, request).await;
                    handle.release().await;

                    let parsed = parse(&reply?);
                    METRICS.record_generation_attempt(stage.as_str(), parsed.is_ok());
                    if let Err(e) = &parsed {
                        debug!("{} round reply rejected: {}", stage, e);
                    }
                    Ok::<T, SentinelError>(parsed?)
                },
                |_| true,
            )
            .await;

        outcome.map_err(|e| {
            warn!("Profile generation failed in {} round: {}", stage, e);
            let source = match e {
                SentinelError::RetryExhausted { source, .. } => source,
                other => Box::new(other),
            };
            SentinelError::GenerationFailed { stage, source }
        })
    }
}

fn rules_request(description: &str) -> String {
    format!(
        "Write content moderation rules for this category: \"{description}\".
Reply with exactly 4 rules, one per line, each in this format:
**Moderation Rule 1** <rule text>
Do not add any other text."
    )
}

fn rubric_request(description: &str) -> String {
    let lines = RUBRIC_RANGES
        .iter()
        .map(|range| format!("**{}: <what a {} rating means>**", range, range))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Write a 0-10 sensitivity rating scale for this category: \"{description}\".
Reply with exactly 5 lines, one per range, each in this format:
{lines}
Do not add any other text."
    )
}

/// Text between the first pair of `**` in `line`, and whatever follows it
fn bold_span(line: &str) -> Option<(&str, &str)> {
    let start = line.find("**")? + 2;
    let len = line[start..].find("**")?;
    Some((&line[start..start + len], &line[start + len + 2..]))
}

/// Strip a leading `12.` list number
fn strip_numbering(line: &str) -> &str {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && line[digits..].starts_with('.') {
        line[digits + 1..].trim_start()
    } else {
        line
    }
}

/// Rules from lines shaped like `**Moderation Rule 1** text` or `1. **text**`
///
/// Lines that do not open with a bold span are skipped.
pub fn parse_rules(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let line = strip_numbering(line);
            if !line.starts_with("**") {
                return None;
            }
            let (label, rest) = bold_span(line)?;
            let label = label.trim();
            let rest = rest.trim();

            let cleaned: String = label.chars().filter(|c| !"()<>".contains(*c)).collect();
            let normalized: String = cleaned
                .chars()
                .filter(|c| !c.is_ascii_digit() && *c != '.' && !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();

            if normalized == RULE_MARKER && !rest.is_empty() {
                Some(rest.to_string())
            } else {
                Some(cleaned.trim().to_string())
            }
        })
        .filter(|rule| !rule.is_empty())
        .collect()
}

pub fn validate_rules(rules: Vec<String>) -> std::result::Result<Vec<String>, ParseError> {
    if rules.len() > MIN_RULES_EXCLUSIVE {
        Ok(rules)
    } else {
        Err(ParseError::TooFewRules {
            found: rules.len(),
            required: MIN_RULES_EXCLUSIVE,
        })
    }
}

/// Bold spans that look like `N-M: description`
pub fn parse_bands(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter_map(|line| bold_span(line.trim()))
        .map(|(content, _)| content.trim())
        .filter(|content| is_range_line(content))
        .map(str::to_string)
        .collect()
}

fn is_range_line(content: &str) -> bool {
    let Some((range, _)) = content.split_once(':') else {
        return false;
    };
    match range.split_once('-') {
        Some((lo, hi)) => {
            !lo.is_empty()
                && !hi.is_empty()
                && lo.bytes().all(|b| b.is_ascii_digit())
                && hi.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Accept a rubric only when it covers every range in [`RUBRIC_RANGES`]
/// and contains nothing else
pub fn validate_bands(lines: Vec<String>) -> std::result::Result<Vec<RatingBand>, ParseError> {
    let mut bands = Vec::with_capacity(lines.len());
    for line in &lines {
        let band = RUBRIC_RANGES.iter().find_map(|range| {
            line.strip_prefix(range)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|description| RatingBand::new(*range, description.trim()))
        });
        match band {
            Some(band) => bands.push(band),
            None => return Err(ParseError::UnexpectedRange(line.clone())),
        }
    }

    let missing: Vec<String> = RUBRIC_RANGES
        .iter()
        .filter(|range| !bands.iter().any(|b| b.range == **range))
        .map(|range| range.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingRanges(missing));
    }

    Ok(bands)
}

/// Drop markdown emphasis the model may have left in
fn clean(text: &str) -> String {
    text.replace("**", "").replace("* ", "").trim().to_string()
}

pub fn assemble_system_prompt(rules: &[String]) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT_PREAMBLE);
    prompt.push('\n');
    for rule in rules {
        prompt.push_str("- ");
        prompt.push_str(&clean(rule));
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(SYSTEM_PROMPT_GUIDELINES);
    prompt
}

pub fn assemble_rating_template(description: &str, bands: &[RatingBand]) -> String {
    let mut template = format!(
        "Rate the following text for {} on a scale of 0-10 where:\n",
        clean(description)
    );
    for band in bands {
        template.push_str(&format!("- {}: {}\n", band.range, clean(&band.description)));
    }
    template.push_str(&format!(
        "\nProvide the rating and a brief explanation without repeating any of the sensitive content.\nText to analyze: \"{}\"",
        TEXT_PLACEHOLDER
    ));
    template
}

/// `"Story Spoilers!"` -> `"story-spoilers"`
///
/// Slugs that name a built-in profile get a `-custom` suffix so saving the
/// result never replaces the built-in.
fn profile_name(description: &str) -> String {
    let slug = description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "custom".to_string()
    } else if Profile::builtin(&slug).is_some() {
        format!("{}-custom", slug)
    } else {
        slug
    }
}
