//! Retry with exponential backoff, shared by every backend call site.
//!
//! The structure call and the chunk calls differ only in their policy and
//! their log label; the loop itself lives here once.

use crate::config::RetryPolicy;
use std::fmt::Display;
use std::future::Future;
use tokio::time::sleep;
use tracing::warn;

/// A value together with the number of retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `op` until it succeeds or `policy.max_retries` retries are spent.
///
/// `op` receives the 0-indexed attempt number. On success the value comes
/// back with the retries used; on exhaustion the last error comes back with
/// `retries == policy.max_retries`.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<Attempted<T>, Attempted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    retries: attempt,
                })
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                warn!(
                    "{}: attempt {} failed: {}; retry {}/{} after {}ms",
                    label,
                    attempt,
                    e,
                    attempt,
                    policy.max_retries,
                    delay.as_millis()
                );
                sleep(delay).await;
            }
            Err(e) => {
                return Err(Attempted {
                    value: e,
                    retries: attempt,
                })
            }
        }
    }
}
