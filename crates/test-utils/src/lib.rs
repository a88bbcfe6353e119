//! Shared fixtures and helpers for caseflow tests.

pub mod db;
pub mod fixtures;

use std::future::Future;
use std::time::Duration;

/// Initialize tracing for tests. Safe to call multiple times.
///
/// Uses a standard filter for caseflow debugging. The `try_init()` call
/// is idempotent - subsequent calls are no-ops if already initialized.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("caseflow=debug")
        .try_init();
}

/// Poll `check` every 25ms until it returns `true` or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
