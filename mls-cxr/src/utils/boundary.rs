//! Boundary wrappers applied at every handler and pipeline entry point
//!
//! Plain function composition: `guarded(name, fallback, timed(name, body))`.

use crate::error::StudyError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::{error, info};

/// Log entry and exit of `fut`, with elapsed wall time on exit
pub async fn timed<F, T>(name: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    info!("{} -->", name);
    let start = Instant::now();

    let output = fut.await;

    info!("[{:.3} s] --> {}", start.elapsed().as_secs_f64(), name);
    output
}

/// Run `fut`, converting any error or panic into a logged numeric code
///
/// Errors map to [`StudyError::code`]; a panic maps to `fallback_code`.
/// Nothing escapes: the caller always gets `Ok(value)` or `Err(code)`.
pub async fn guarded<F, T>(name: &str, fallback_code: u16, fut: F) -> Result<T, u16>
where
    F: Future<Output = Result<T, StudyError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let code = err.code();
            error!(
                handler = name,
                code = code,
                kind = err.kind(),
                "{} failed with {} ({:#06X}): {}",
                name,
                err.kind(),
                code,
                err
            );
            Err(code)
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                handler = name,
                code = fallback_code,
                "{} panicked ({:#06X}): {}",
                name,
                fallback_code,
                reason
            );
            Err(fallback_code)
        }
    }
}
