//! Example: Analyse a page of text read from stdin
//!
//! Paragraphs are separated by blank lines. The model endpoint and key come
//! from `SENTINEL__MODEL__*` environment variables (or a `.env` file).
//!
//! ```text
//! cat article.txt | cargo run --example analyze_page
//! cat review.txt | cargo run --example analyze_page -- "story spoilers"
//! ```

use content_sentinel::{
    config::Config,
    logging,
    metrics::METRICS,
    model::ChatCompletionModel,
    scheduler::Segment,
    signals::PageSummary,
    Sentinel,
};
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.logging);

    let mut page = String::new();
    std::io::stdin().read_to_string(&mut page)?;
    let segments: Vec<Segment> = page
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .enumerate()
        .map(|(i, p)| Segment::new(i as u64, p))
        .collect();

    let model = Arc::new(ChatCompletionModel::new(&config.model)?);
    let sentinel = Sentinel::builder(config).build(model).await?;

    // An optional description generates and activates a custom profile
    if let Some(description) = std::env::args().nth(1) {
        let profile = sentinel.generate_and_activate(&description).await?;
        println!("Using generated profile {:?}", profile.name);
    }

    let mut run = sentinel.analyze_page(segments);
    let mut summary = PageSummary::new(run.run_id());
    while let Some(outcome) = run.next().await {
        if let Some(signal) = summary.record(&outcome) {
            println!("{}", serde_json::to_string(&signal)?);
        }
    }

    println!("{}", serde_json::to_string(&summary.completion_toast())?);
    if let Some(banner) = summary.banner() {
        println!("{}", banner);
    }

    sentinel.shutdown().await;

    if std::env::var_os("SENTINEL_PRINT_METRICS").is_some() {
        println!("{}", METRICS.export_prometheus());
    }
    Ok(())
}
