//! Page text sensitivity analysis
//!
//! Segments of page text are rendered into a profile's rating prompt, sent to
//! a generative model through one managed session, and bucketed into safety
//! levels under the user's strictness. Profiles (system prompt plus rating
//! rubric) can be stored, switched and generated from a description.
//!
//! ```no_run
//! use content_sentinel::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> content_sentinel::Result<()> {
//! let config = Config::from_env()?;
//! let model = Arc::new(ChatCompletionModel::new(&config.model)?);
//! let sentinel = Sentinel::builder(config).build(model).await?;
//!
//! let segments = vec![Segment::new(0, "A long paragraph of page text...")];
//! let mut run = sentinel.run_batch(segments);
//! while let Some(outcome) = run.next().await {
//!     println!("{:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod profile;
pub mod retry;
pub mod scheduler;
pub mod sentinel;
pub mod session;
pub mod settings;
pub mod signals;
pub mod store;

pub use error::{Result, SentinelError};
pub use sentinel::{Sentinel, SentinelBuilder};

pub mod prelude {
    pub use crate::classify::{classify, Classification, SafetyLevel, Strictness, UnparsablePolicy};
    pub use crate::config::Config;
    pub use crate::error::{Result, SentinelError};
    pub use crate::model::{ChatCompletionModel, LanguageModel, ScriptedModel};
    pub use crate::profile::{Profile, ProfileGenerator, ProfileManager};
    pub use crate::scheduler::{AnalysisResult, BatchOutcome, BatchRun, Segment, SegmentId};
    pub use crate::sentinel::Sentinel;
    pub use crate::signals::{PageSummary, UiSignal};
}
