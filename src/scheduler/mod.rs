//! Bounded-concurrency batch analysis
//!
//! A [`BatchRun`] keeps a FIFO of pending segments and at most
//! `concurrency_cap` analyses in flight. Outcomes come back in completion
//! order. A failed analysis goes to the back of the queue; with an attempt
//! cap it eventually yields [`BatchOutcome::PermanentFailure`] instead.
//!
//! Dropping a run cancels its in-flight analyses and nothing further is
//! delivered.

pub mod analyzer;

pub use analyzer::{SegmentAnalyzer, SessionAnalyzer};

use crate::classify::{Classification, SafetyLevel};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::settings::{SettingsEvent, SettingsStore};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller-assigned handle for a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of page text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    pub text: String,
}

impl Segment {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id: SegmentId(id),
            text: text.into(),
        }
    }
}

/// Verdict for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub segment_id: SegmentId,
    pub score: u8,
    pub level: SafetyLevel,
    pub explanation: String,
}

impl AnalysisResult {
    pub fn new(segment_id: SegmentId, classification: Classification) -> Self {
        Self {
            segment_id,
            score: classification.score,
            level: classification.level,
            explanation: classification.explanation,
        }
    }
}

/// Identity of one `run_batch` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a run yields per segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed {
        run_id: RunId,
        result: AnalysisResult,
    },
    /// The segment ran out of attempts
    PermanentFailure {
        run_id: RunId,
        segment_id: SegmentId,
        attempts: u32,
        error: String,
    },
}

impl BatchOutcome {
    pub fn run_id(&self) -> RunId {
        match self {
            BatchOutcome::Completed { run_id, .. } => *run_id,
            BatchOutcome::PermanentFailure { run_id, .. } => *run_id,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        match self {
            BatchOutcome::Completed { result, .. } => result.segment_id,
            BatchOutcome::PermanentFailure { segment_id, .. } => *segment_id,
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            BatchOutcome::Completed { result, .. } => Some(result),
            BatchOutcome::PermanentFailure { .. } => None,
        }
    }
}

/// Starts batch runs against one analyzer
pub struct BatchScheduler {
    analyzer: Arc<dyn SegmentAnalyzer>,
    config: SchedulerConfig,
    settings: Option<Arc<SettingsStore>>,
}

impl BatchScheduler {
    pub fn new(analyzer: Arc<dyn SegmentAnalyzer>, config: SchedulerConfig) -> Self {
        Self {
            analyzer,
            config,
            settings: None,
        }
    }

    /// Respect the `enabled` setting: runs started while analysis is off
    /// dispatch nothing, and a run halts when an update switches it off
    pub fn watch_settings(mut self, settings: Arc<SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start a run over `segments` with the configured cap
    pub fn run_batch(&self, segments: Vec<Segment>) -> BatchRun {
        self.run_batch_with_cap(segments, self.config.concurrency_cap)
    }

    /// Start a run over `segments` with at most `concurrency_cap` in flight
    pub fn run_batch_with_cap(&self, segments: Vec<Segment>, concurrency_cap: usize) -> BatchRun {
        let run_id = RunId::new();
        // subscribe before reading the flag so a concurrent disable is not missed
        let events = self.settings.as_ref().map(|s| s.subscribe());
        let halted = self.settings.as_ref().is_some_and(|s| !s.is_enabled());
        if halted {
            info!(
                "Analysis disabled, run {} dispatches none of {} segments",
                run_id,
                segments.len()
            );
        } else {
            info!(
                "Starting run {} over {} segments (cap {})",
                run_id,
                segments.len(),
                concurrency_cap
            );
        }

        BatchRun {
            run_id,
            analyzer: self.analyzer.clone(),
            concurrency_cap: concurrency_cap.max(1),
            max_attempts: self.config.max_attempts,
            pending: segments
                .into_iter()
                .map(|segment| Job {
                    segment: Arc::new(segment),
                    attempts: 0,
                })
                .collect(),
            in_flight: FuturesUnordered::new(),
            settings: events,
            halted,
        }
    }
}

struct Job {
    segment: Arc<Segment>,
    attempts: u32,
}

type InFlight = BoxFuture<'static, (Job, Result<AnalysisResult>)>;

/// A lazily driven batch
pub struct BatchRun {
    run_id: RunId,
    analyzer: Arc<dyn SegmentAnalyzer>,
    concurrency_cap: usize,
    max_attempts: Option<u32>,
    pending: VecDeque<Job>,
    in_flight: FuturesUnordered<InFlight>,
    settings: Option<broadcast::Receiver<SettingsEvent>>,
    halted: bool,
}

impl BatchRun {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether dispatch stopped because analysis was disabled
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Next outcome in completion order, `None` once the run is over
    ///
    /// A halted run still delivers analyses that were already in flight.
    pub async fn next(&mut self) -> Option<BatchOutcome> {
        loop {
            self.poll_settings();
            if !self.halted {
                self.fill();
            }

            let (mut job, result) = self.in_flight.next().await?;
            job.attempts += 1;

            match result {
                Ok(result) => {
                    debug!(
                        "Segment {} finished after {} attempt(s)",
                        job.segment.id, job.attempts
                    );
                    return Some(BatchOutcome::Completed {
                        run_id: self.run_id,
                        result,
                    });
                }
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| job.attempts >= max) {
                        warn!(
                            "Segment {} failed permanently after {} attempts: {}",
                            job.segment.id, job.attempts, e
                        );
                        METRICS.record_permanent_failure();
                        return Some(BatchOutcome::PermanentFailure {
                            run_id: self.run_id,
                            segment_id: job.segment.id,
                            attempts: job.attempts,
                            error: e.to_string(),
                        });
                    }

                    warn!(
                        "Segment {} failed (attempt {}), requeueing: {}",
                        job.segment.id, job.attempts, e
                    );
                    METRICS.record_requeue();
                    self.pending.push_back(job);
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Consume the run as a stream of outcomes
    pub fn into_stream(self) -> impl Stream<Item = BatchOutcome> + Send {
        futures::stream::unfold(self, |mut run| async move {
            let outcome = run.next().await?;
            Some((outcome, run))
        })
    }

    /// Drain every remaining outcome
    pub async fn collect(mut self) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Stop the run; in-flight analyses are cancelled
    pub fn abandon(self) {
        info!(
            "Abandoning run {} ({} pending, {} in flight)",
            self.run_id,
            self.pending.len(),
            self.in_flight.len()
        );
    }

    fn fill(&mut self) {
        while self.in_flight.len() < self.concurrency_cap {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            let analyzer = self.analyzer.clone();
            self.in_flight.push(Box::pin(async move {
                let result = analyzer.analyze(&job.segment).await;
                (job, result)
            }));
        }
    }

    fn poll_settings(&mut self) {
        let Some(rx) = self.settings.as_mut() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if !event.settings.enabled && !self.halted {
                        info!(
                            "Analysis disabled, halting run {} with {} pending",
                            self.run_id,
                            self.pending.len()
                        );
                        self.halted = true;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Run {} skipped {} settings events", self.run_id, skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, Strictness};
    use crate::error::SentinelError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sleeps, tracks concurrency, and fails each segment a scripted number of times
    #[derive(Default)]
    struct FakeAnalyzer {
        delay: Duration,
        failures: Mutex<HashMap<SegmentId, usize>>,
        always_fail: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn fail_times(self, id: u64, times: usize) -> Self {
            self.failures.lock().unwrap().insert(SegmentId(id), times);
            self
        }
    }

    #[async_trait]
    impl SegmentAnalyzer for FakeAnalyzer {
        async fn analyze(&self, segment: &Segment) -> Result<AnalysisResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.always_fail {
                return Err(SentinelError::Model("unavailable".to_string()));
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(&segment.id) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(SentinelError::Timeout(Duration::from_secs(30)));
                    }
                }
            }
            let reply = format!("Rating: {}", segment.id.0 % 11);
            Ok(AnalysisResult::new(
                segment.id,
                classify(&reply, Strictness::Medium),
            ))
        }
    }

    fn segments(n: u64) -> Vec<Segment> {
        (0..n).map(|i| Segment::new(i, format!("segment {}", i))).collect()
    }

    fn scheduler(analyzer: Arc<FakeAnalyzer>, max_attempts: Option<u32>) -> BatchScheduler {
        BatchScheduler::new(
            analyzer,
            SchedulerConfig {
                max_attempts,
                ..SchedulerConfig::default()
            },
        )
    }

    fn ids(outcomes: &[BatchOutcome]) -> Vec<u64> {
        let mut ids: Vec<u64> = outcomes.iter().map(|o| o.segment_id().0).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency_cap() {
        let analyzer = Arc::new(FakeAnalyzer::with_delay(Duration::from_millis(50)));
        let run = scheduler(analyzer.clone(), Some(5)).run_batch_with_cap(segments(30), 4);

        let outcomes = run.collect().await;
        assert_eq!(outcomes.len(), 30);
        assert_eq!(analyzer.max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_segment_appears_exactly_once() {
        let analyzer = Arc::new(
            FakeAnalyzer::with_delay(Duration::from_millis(10))
                .fail_times(3, 2)
                .fail_times(7, 1),
        );
        let outcomes = scheduler(analyzer.clone(), Some(5)).run_batch(segments(20)).collect().await;

        assert_eq!(ids(&outcomes), (0..20).collect::<Vec<_>>());
        assert!(outcomes.iter().all(|o| o.result().is_some()));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 23);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_segment_goes_to_back_of_queue() {
        let analyzer = Arc::new(FakeAnalyzer::with_delay(Duration::from_millis(10)).fail_times(0, 1));
        let run = scheduler(analyzer, Some(5)).run_batch_with_cap(segments(3), 1);

        let order: Vec<u64> = run.collect().await.iter().map(|o| o.segment_id().0).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_yields_permanent_failure() {
        let analyzer = Arc::new(FakeAnalyzer::with_delay(Duration::from_millis(10)).fail_times(2, 100));
        let outcomes = scheduler(analyzer, Some(3)).run_batch(segments(4)).collect().await;

        assert_eq!(ids(&outcomes), vec![0, 1, 2, 3]);
        let failure = outcomes
            .iter()
            .find(|o| o.segment_id() == SegmentId(2))
            .unwrap();
        match failure {
            BatchOutcome::PermanentFailure { attempts, error, .. } => {
                assert_eq!(*attempts, 3);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected a permanent failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbounded_retries_never_finish() {
        let analyzer = Arc::new(FakeAnalyzer {
            always_fail: true,
            ..Default::default()
        });
        let mut run = scheduler(analyzer.clone(), None).run_batch(segments(1));

        let outcome = tokio::time::timeout(Duration::from_millis(200), run.next()).await;
        assert!(outcome.is_err(), "run should still be retrying");
        assert!(analyzer.calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_run_started_while_disabled_dispatches_nothing() {
        let settings = Arc::new(
            SettingsStore::load(Arc::new(crate::store::MemoryStore::new()))
                .await
                .unwrap(),
        );
        settings.set_enabled(false).await.unwrap();

        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(analyzer.clone(), Some(5)).watch_settings(settings.clone());

        let mut run = scheduler.run_batch(segments(5));
        assert!(run.is_halted());
        assert!(run.next().await.is_none());
        assert_eq!(run.pending(), 5);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);

        // switching back on applies to the next run
        settings.set_enabled(true).await.unwrap();
        let outcomes = scheduler.run_batch(segments(5)).collect().await;
        assert_eq!(ids(&outcomes), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_batch_ends_immediately() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let mut run = scheduler(analyzer, Some(5)).run_batch(Vec::new());
        assert!(run.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_carry_run_id() {
        let analyzer = Arc::new(FakeAnalyzer::with_delay(Duration::from_millis(1)));
        let scheduler = scheduler(analyzer, Some(5));
        let first = scheduler.run_batch(segments(2));
        let second = scheduler.run_batch(segments(2));
        assert_ne!(first.run_id(), second.run_id());

        let run_id = first.run_id();
        let stream = first.into_stream();
        let outcomes: Vec<BatchOutcome> = stream.collect().await;
        assert!(outcomes.iter().all(|o| o.run_id() == run_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_cancels_in_flight() {
        let analyzer = Arc::new(FakeAnalyzer::with_delay(Duration::from_secs(10)));
        let mut run = scheduler(analyzer.clone(), Some(5)).run_batch_with_cap(segments(10), 3);

        let pending = tokio::time::timeout(Duration::from_secs(1), run.next()).await;
        assert!(pending.is_err());
        assert_eq!(run.in_flight(), 3);
        run.abandon();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(analyzer.in_flight.load(Ordering::SeqCst), 3);
    }
}
