//! UI-facing signals derived from batch outcomes

use crate::classify::SafetyLevel;
use crate::scheduler::{BatchOutcome, RunId, Segment, SegmentId};
use serde::Serialize;

/// Instruction for the page overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiSignal {
    /// Remove the blur placed over the segment
    Unblur { segment_id: SegmentId },
    /// Keep the segment blurred and attach the warning as a tooltip
    Flag {
        segment_id: SegmentId,
        score: u8,
        warning: Warning,
    },
    /// Transient notification
    Toast { message: String, level: ToastLevel },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Success,
    Warning,
    Error,
}

/// Headline plus explanation lines for a content warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub headline: String,
    pub details: Vec<String>,
}

/// Segments long enough to be worth analysing
///
/// Text is trimmed first; only segments with more than `min_chars`
/// characters are kept. The rest stay visible without analysis.
pub fn eligible_segments<I>(segments: I, min_chars: usize) -> Vec<Segment>
where
    I: IntoIterator<Item = Segment>,
{
    segments
        .into_iter()
        .filter_map(|mut segment| {
            let trimmed = segment.text.trim();
            if trimmed.chars().count() <= min_chars {
                return None;
            }
            if trimmed.len() != segment.text.len() {
                segment.text = trimmed.to_string();
            }
            Some(segment)
        })
        .collect()
}

/// Split a model explanation into a headline and detail lines
///
/// Breaks after sentence punctuation or a digit followed by whitespace, and
/// around any `explanation:` label. The first piece is the headline.
pub fn format_warning(explanation: &str) -> Warning {
    let pieces = split_explanation(explanation);
    let mut pieces = pieces.into_iter();
    match pieces.next() {
        Some(headline) => Warning {
            headline,
            details: pieces.collect(),
        },
        None => Warning {
            headline: explanation.trim().to_string(),
            details: Vec::new(),
        },
    }
}

fn split_explanation(text: &str) -> Vec<String> {
    const LABEL: &str = "explanation:";

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let at_label = text
            .get(idx..idx + LABEL.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(LABEL));
        if at_label {
            push_piece(&mut pieces, &mut current);
            for _ in 1..LABEL.len() {
                chars.next();
            }
            continue;
        }

        if c.is_whitespace() && current.chars().last().is_some_and(ends_sentence) {
            push_piece(&mut pieces, &mut current);
            while chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
                chars.next();
            }
            continue;
        }
        current.push(c);
    }
    push_piece(&mut pieces, &mut current);
    pieces
}

fn ends_sentence(c: char) -> bool {
    matches!(c, '.' | '!' | '?') || c.is_ascii_digit()
}

fn push_piece(pieces: &mut Vec<String>, current: &mut String) {
    let piece = current.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_string());
    }
    current.clear();
}

/// Signal for one outcome
pub fn signal_for(outcome: &BatchOutcome) -> UiSignal {
    match outcome {
        BatchOutcome::Completed { result, .. } => match result.level {
            SafetyLevel::TooSensitive => UiSignal::Flag {
                segment_id: result.segment_id,
                score: result.score,
                warning: format_warning(&result.explanation),
            },
            SafetyLevel::Safe | SafetyLevel::Moderate => UiSignal::Unblur {
                segment_id: result.segment_id,
            },
        },
        BatchOutcome::PermanentFailure {
            segment_id,
            attempts,
            ..
        } => UiSignal::Toast {
            message: format!(
                "Could not analyse segment {} after {} attempts",
                segment_id, attempts
            ),
            level: ToastLevel::Error,
        },
    }
}

/// Running tally for one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    #[serde(skip)]
    run_id: RunId,
    pub safe: usize,
    pub moderate: usize,
    pub too_sensitive: usize,
    pub failed: usize,
    /// Highest score seen so far
    pub max_score: Option<u8>,
}

impl PageSummary {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            safe: 0,
            moderate: 0,
            too_sensitive: 0,
            failed: 0,
            max_score: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Count `outcome` and return the signal for it
    ///
    /// Outcomes from another run are ignored and yield `None`.
    pub fn record(&mut self, outcome: &BatchOutcome) -> Option<UiSignal> {
        if outcome.run_id() != self.run_id {
            return None;
        }

        match outcome {
            BatchOutcome::Completed { result, .. } => {
                match result.level {
                    SafetyLevel::Safe => self.safe += 1,
                    SafetyLevel::Moderate => self.moderate += 1,
                    SafetyLevel::TooSensitive => self.too_sensitive += 1,
                }
                self.max_score = Some(self.max_score.map_or(result.score, |m| m.max(result.score)));
            }
            BatchOutcome::PermanentFailure { .. } => self.failed += 1,
        }
        Some(signal_for(outcome))
    }

    pub fn analysed(&self) -> usize {
        self.safe + self.moderate + self.too_sensitive
    }

    /// Page-level banner, shown when any segment is too sensitive
    pub fn banner(&self) -> Option<String> {
        match self.too_sensitive {
            0 => None,
            1 => Some("Content Warning: 1 section of this page was hidden".to_string()),
            n => Some(format!(
                "Content Warning: {} sections of this page were hidden",
                n
            )),
        }
    }

    /// Closing notification once the run has finished
    pub fn completion_toast(&self) -> UiSignal {
        if self.failed > 0 {
            UiSignal::Toast {
                message: format!(
                    "Analysis finished: {} sections checked, {} could not be analysed",
                    self.analysed(),
                    self.failed
                ),
                level: ToastLevel::Warning,
            }
        } else {
            UiSignal::Toast {
                message: format!("Analysis finished: {} sections checked", self.analysed()),
                level: ToastLevel::Success,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::AnalysisResult;

    fn completed(run_id: RunId, id: u64, score: u8, level: SafetyLevel) -> BatchOutcome {
        BatchOutcome::Completed {
            run_id,
            result: AnalysisResult {
                segment_id: SegmentId(id),
                score,
                level,
                explanation: format!("Rating: {}. Explanation: graphic detail.", score),
            },
        }
    }

    #[test]
    fn test_eligible_segments_filters_short_text() {
        let long = "x".repeat(101);
        let segments = vec![
            Segment::new(0, "too short"),
            Segment::new(1, format!("  {}  ", long)),
            Segment::new(2, "y".repeat(100)),
        ];
        let kept = eligible_segments(segments, 100);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, SegmentId(1));
        assert_eq!(kept[0].text, long);
    }

    #[test]
    fn test_format_warning_splits_sentences_and_label() {
        let warning = format_warning("Rating: 8 Explanation: Graphic violence. Several deaths are described!");
        assert_eq!(warning.headline, "Rating: 8");
        assert_eq!(
            warning.details,
            vec!["Graphic violence.", "Several deaths are described!"]
        );
    }

    #[test]
    fn test_format_warning_single_piece() {
        let warning = format_warning("Strong content");
        assert_eq!(warning.headline, "Strong content");
        assert!(warning.details.is_empty());
    }

    #[test]
    fn test_signal_for_levels() {
        let run_id = RunId::new();
        assert_eq!(
            signal_for(&completed(run_id, 1, 2, SafetyLevel::Safe)),
            UiSignal::Unblur { segment_id: SegmentId(1) }
        );
        assert!(matches!(
            signal_for(&completed(run_id, 2, 9, SafetyLevel::TooSensitive)),
            UiSignal::Flag { score: 9, .. }
        ));
    }

    #[test]
    fn test_summary_counts_and_banner() {
        let run_id = RunId::new();
        let mut summary = PageSummary::new(run_id);
        assert!(summary.banner().is_none());

        summary.record(&completed(run_id, 1, 1, SafetyLevel::Safe));
        summary.record(&completed(run_id, 2, 8, SafetyLevel::TooSensitive));
        summary.record(&BatchOutcome::PermanentFailure {
            run_id,
            segment_id: SegmentId(3),
            attempts: 5,
            error: "timeout".to_string(),
        });

        assert_eq!(summary.analysed(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.max_score, Some(8));
        assert_eq!(
            summary.banner().as_deref(),
            Some("Content Warning: 1 section of this page was hidden")
        );
        assert!(matches!(
            summary.completion_toast(),
            UiSignal::Toast { level: ToastLevel::Warning, .. }
        ));
    }

    #[test]
    fn test_summary_ignores_other_runs() {
        let mut summary = PageSummary::new(RunId::new());
        let stale = completed(RunId::new(), 1, 9, SafetyLevel::TooSensitive);
        assert!(summary.record(&stale).is_none());
        assert_eq!(summary.too_sensitive, 0);
    }
}
