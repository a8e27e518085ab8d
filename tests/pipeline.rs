//! End-to-end tests for the analysis pipeline
//!
//! These drive the public API with an in-process scripted model: settings,
//! profiles, the session manager, the scheduler and UI signals together.

use content_sentinel::classify::{SafetyLevel, Strictness, UnparsablePolicy};
use content_sentinel::config::Config;
use content_sentinel::model::{ScriptedModel, ScriptedStats};
use content_sentinel::scheduler::{BatchOutcome, Segment, SegmentId};
use content_sentinel::signals::{PageSummary, UiSignal};
use content_sentinel::store::{FileStore, KeyValueStore, MemoryStore};
use content_sentinel::{Sentinel, SentinelError};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn paragraph(topic: &str, id: u64) -> Segment {
    let text = format!(
        "Paragraph {} talks about {} at some length so that it clears the minimum size for analysis. \
         It keeps going with more ordinary words to stay realistic.",
        id, topic
    );
    Segment::new(id, text)
}

/// Rates text by keyword: a massacre is 9, a quarrel is 4, everything else 1
fn keyword_model() -> ScriptedModel {
    ScriptedModel::new(|_, prompt| {
        let reply = if prompt.contains("massacre") {
            "Rating: 9. Explanation: graphic violence is described."
        } else if prompt.contains("quarrel") {
            "Rating: 4. A heated argument, no physical harm."
        } else {
            "Rating: 1. Nothing of concern."
        };
        Ok(reply.to_string())
    })
}

async fn sentinel(model: ScriptedModel) -> (Sentinel, Arc<ScriptedStats>) {
    let stats = model.stats();
    let sentinel = Sentinel::builder(Config::default())
        .store(Arc::new(MemoryStore::new()))
        .build(Arc::new(model))
        .await
        .unwrap();
    (sentinel, stats)
}

#[tokio::test]
async fn test_page_analysis_end_to_end() {
    let (sentinel, stats) = sentinel(keyword_model()).await;

    let segments = vec![
        paragraph("gardening", 0),
        paragraph("a massacre", 1),
        paragraph("a quarrel", 2),
        Segment::new(3, "short caption"),
    ];
    let run = sentinel.analyze_page(segments);
    let mut summary = PageSummary::new(run.run_id());

    let mut signals = Vec::new();
    let mut stream = Box::pin(run.into_stream());
    while let Some(outcome) = stream.next().await {
        signals.push(summary.record(&outcome).unwrap());
    }

    // the caption is too short to analyse
    assert_eq!(stats.prompts(), 3);
    assert_eq!(signals.len(), 3);
    assert_eq!(summary.safe, 1);
    assert_eq!(summary.moderate, 1);
    assert_eq!(summary.too_sensitive, 1);
    assert!(summary.banner().is_some());

    let flag = signals
        .iter()
        .find(|s| matches!(s, UiSignal::Flag { .. }))
        .unwrap();
    match flag {
        UiSignal::Flag {
            segment_id,
            score,
            warning,
        } => {
            assert_eq!(*segment_id, SegmentId(1));
            assert_eq!(*score, 9);
            assert_eq!(warning.headline, "Rating: 9.");
            assert_eq!(warning.details, vec!["graphic violence is described."]);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_strictness_change_applies_to_next_batch() {
    let (sentinel, _) = sentinel(keyword_model()).await;

    let level = |outcomes: &[BatchOutcome]| outcomes[0].result().map(|r| r.level);

    let outcomes = sentinel.run_batch(vec![paragraph("a quarrel", 0)]).collect().await;
    assert_eq!(level(&outcomes), Some(SafetyLevel::Moderate));

    sentinel.settings().set_strictness(Strictness::High).await.unwrap();
    let outcomes = sentinel.run_batch(vec![paragraph("a quarrel", 0)]).collect().await;
    assert_eq!(level(&outcomes), Some(SafetyLevel::TooSensitive));

    sentinel.settings().set_strictness(Strictness::Low).await.unwrap();
    let outcomes = sentinel.run_batch(vec![paragraph("a massacre", 0)]).collect().await;
    assert_eq!(level(&outcomes), Some(SafetyLevel::Safe));
}

#[tokio::test]
async fn test_unparsable_policy_setting() {
    let (sentinel, _) = sentinel(ScriptedModel::constant("I would rather not say.")).await;

    let outcomes = sentinel.run_batch(vec![paragraph("anything", 0)]).collect().await;
    assert_eq!(outcomes[0].result().unwrap().score, 0);

    sentinel
        .settings()
        .set_unparsable_policy(UnparsablePolicy::FailClosed)
        .await
        .unwrap();
    let outcomes = sentinel.run_batch(vec![paragraph("anything", 0)]).collect().await;
    let result = outcomes[0].result().unwrap();
    assert_eq!(result.score, 10);
    assert_eq!(result.level, SafetyLevel::TooSensitive);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let counter = calls.clone();
    let model = ScriptedModel::new(move |_, prompt| {
        counter.fetch_add(1, Ordering::SeqCst);
        // the first attempt at every segment fails
        if seen.lock().unwrap().insert(prompt.to_string()) {
            Err(SentinelError::Model("overloaded".to_string()))
        } else {
            Ok("Rating: 2".to_string())
        }
    });
    let (sentinel, _) = sentinel(model).await;

    let segments: Vec<Segment> = (0..12).map(|i| paragraph("gardening", i)).collect();
    let outcomes = sentinel.run_batch(segments).collect().await;

    let mut ids: Vec<u64> = outcomes.iter().map(|o| o.segment_id().0).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..12).collect::<Vec<_>>());
    assert!(outcomes.iter().all(|o| o.result().is_some()));
    assert_eq!(calls.load(Ordering::SeqCst), 24);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_respected_end_to_end() {
    let model = keyword_model().with_latency(Duration::from_millis(100));
    let (sentinel, stats) = sentinel(model).await;

    let segments: Vec<Segment> = (0..40).map(|i| paragraph("gardening", i)).collect();
    let outcomes = sentinel.run_batch(segments).collect().await;

    assert_eq!(outcomes.len(), 40);
    assert_eq!(stats.max_in_flight(), 8);
    // one primary session, every segment on its own fork
    assert_eq!(stats.sessions_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabling_analysis_halts_dispatch() {
    let model = keyword_model().with_latency(Duration::from_millis(100));
    let (sentinel, stats) = sentinel(model).await;

    let segments: Vec<Segment> = (0..20).map(|i| paragraph("gardening", i)).collect();
    let mut run = sentinel.run_batch(segments);

    let first = run.next().await;
    assert!(first.is_some());
    sentinel.settings().set_enabled(false).await.unwrap();

    let mut delivered = 1;
    while run.next().await.is_some() {
        delivered += 1;
    }

    assert!(run.is_halted());
    // only the first wave of 8 was ever dispatched
    assert_eq!(delivered, 8);
    assert_eq!(stats.prompts(), delivered);
    assert_eq!(run.pending(), 12);
}

#[tokio::test]
async fn test_runs_started_while_disabled_send_nothing() {
    let (sentinel, stats) = sentinel(keyword_model()).await;
    sentinel.settings().set_enabled(false).await.unwrap();

    let segments: Vec<Segment> = (0..5).map(|i| paragraph("gardening", i)).collect();
    let outcomes = sentinel.run_batch(segments.clone()).collect().await;
    assert!(outcomes.is_empty());

    let run = sentinel.analyze_page(segments);
    assert!(run.is_halted());
    assert!(run.collect().await.is_empty());
    assert_eq!(stats.prompts(), 0);
    assert_eq!(stats.sessions_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_become_permanent_failures() {
    let model = ScriptedModel::constant("Rating: 1").with_latency(Duration::from_secs(45));
    let (sentinel, stats) = sentinel(model).await;

    let outcomes = sentinel.run_batch(vec![paragraph("gardening", 0)]).collect().await;
    match &outcomes[..] {
        [BatchOutcome::PermanentFailure { attempts, error, .. }] => {
            assert_eq!(*attempts, 5);
            assert!(error.contains("timed out"));
        }
        other => panic!("expected one permanent failure, got {:?}", other),
    }
    assert_eq!(stats.prompts(), 5);
}

#[tokio::test]
async fn test_settings_survive_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.json");

    let mut config = Config::default();
    config.store.path = Some(path.clone());

    let first = Sentinel::builder(config.clone())
        .build(Arc::new(ScriptedModel::constant("Rating: 0")))
        .await
        .unwrap();
    first.settings().set_strictness(Strictness::High).await.unwrap();
    drop(first);

    let store = FileStore::open(&path).await.unwrap();
    assert!(store.get("settings").await.unwrap().is_some());

    let second = Sentinel::builder(config)
        .build(Arc::new(ScriptedModel::constant("Rating: 0")))
        .await
        .unwrap();
    assert_eq!(second.settings().snapshot().await.strictness, Strictness::High);
    assert_eq!(second.profiles().list().await, vec!["nsfw"]);
}

#[tokio::test]
async fn test_shutdown_destroys_sessions() {
    let (sentinel, stats) = sentinel(keyword_model()).await;
    sentinel.run_batch(vec![paragraph("gardening", 0)]).collect().await;

    sentinel.shutdown().await;
    sentinel.shutdown().await;
    // the fork released after its turn plus the primary
    assert_eq!(stats.sessions_destroyed(), 2);
}
