//! Retry utility with a fixed delay between attempts

use std::time::Duration;
use tracing::warn;

/// Retry an async operation with a fixed delay between attempts.
///
/// `extra_attempts > 0` allows that many additional tries after the first
/// failure; `extra_attempts <= 0` retries forever. Returns `Ok` on the
/// first success, or the last `Err` once the budget is spent.
pub async fn retry_fixed<F, Fut, T, E>(
    operation_name: &str,
    extra_attempts: i32,
    delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if extra_attempts > 0 && attempt > extra_attempts as u32 {
                    warn!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                }
                warn!(
                    "{} failed (attempt {}): {}, retrying in {:?}",
                    operation_name, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
