//! Runtime-agnostic timer primitives (§5, §9): the 500ms
//! `Fetch.getResponseBody` bound, the per-event `ProcessTimeoutMS`
//! deadline, and the 30s/60s sweep and monitor intervals. Built on
//! `futures-timer` (already a teacher dependency) rather than
//! `tokio::time`, so these hold under either the `tokio-runtime` or
//! `async-std-runtime` feature, matching [`crate::spawn`]'s own
//! runtime-agnostic discipline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};
use futures_timer::Delay;

pub async fn sleep(duration: Duration) {
    Delay::new(duration).await;
}

/// Returned by [`timeout`] when `duration` elapsed before `fut` resolved.
#[derive(Debug)]
pub struct Elapsed;

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline elapsed")
    }
}

impl std::error::Error for Elapsed {}

/// Race `fut` against a `duration` timer. On timeout, `fut` is dropped
/// before returning — callers that embed a must-run cleanup guard (e.g.
/// `handler::ContinueGuard`) inside `fut` rely on this drop to fire that
/// cleanup (§5 "per-event timeout... the deferred safety continue fires").
pub async fn timeout<F>(duration: Duration, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    futures::pin_mut!(fut);
    match select(fut, Delay::new(duration)).await {
        Either::Left((output, _timer)) => Ok(output),
        Either::Right((_elapsed, _fut)) => Err(Elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_returns_ok_when_future_wins() {
        let result = timeout(Duration::from_millis(200), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_elapses_when_future_is_slower() {
        let result = timeout(Duration::from_millis(10), async {
            sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
