#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use prograde::fetch::RetryPolicy;
use prograde::pipeline::GradingPipeline;
use prograde_test_utils::fakes::{ScriptedFetcher, ScriptedRunner};

pub use prograde_test_utils::builders;
pub use prograde_test_utils::fakes;
pub use prograde_test_utils::scripts;
pub use prograde_test_utils::{init_tracing, with_timeout};

/// Retry policy with millisecond backoff so retry tests stay fast.
pub fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
}

/// Fake fetcher and runner are shared with the test through `Arc`s so their
/// instrumentation stays readable after the pipeline takes ownership.
pub fn fake_pipeline(
    fetcher: ScriptedFetcher,
    runner: ScriptedRunner,
    retry: RetryPolicy,
) -> (
    GradingPipeline<Arc<ScriptedFetcher>, Arc<ScriptedRunner>>,
    Arc<ScriptedFetcher>,
    Arc<ScriptedRunner>,
) {
    let fetcher = Arc::new(fetcher);
    let runner = Arc::new(runner);
    let pipeline = GradingPipeline::new(Arc::clone(&fetcher), Arc::clone(&runner), retry);
    (pipeline, fetcher, runner)
}

/// Number of entries directly under `dir` (0 if it does not exist).
pub fn entries_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}
