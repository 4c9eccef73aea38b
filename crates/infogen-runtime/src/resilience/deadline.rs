//! Deadline race for a single provider call.
//!
//! The call, its deadline and the caller's cancellation token are raced with
//! `tokio::select!`. Whichever branch loses is dropped, so a timed-out or
//! cancelled call has its future (and the HTTP request inside it) released
//! immediately instead of running on in the background.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How a raced operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    /// The operation finished first; its output is returned untouched.
    Completed(T),

    /// The deadline fired first.
    TimedOut(Duration),

    /// The caller cancelled before either finished.
    Cancelled,
}

/// The enclosing request was cancelled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Race `future` against `deadline` and `cancel`.
///
/// Cancellation is checked first, then completion, so an operation that is
/// already done is never reported as timed out.
pub async fn race_deadline<F>(
    future: F,
    deadline: Duration,
    cancel: &CancellationToken,
) -> RaceOutcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => RaceOutcome::Cancelled,
        output = future => RaceOutcome::Completed(output),
        _ = tokio::time::sleep(deadline) => RaceOutcome::TimedOut(deadline),
    }
}

/// Sleep for `duration` unless cancelled first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_deadline() {
        let cancel = CancellationToken::new();
        let outcome = race_deadline(
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                42
            },
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert_eq!(outcome, RaceOutcome::Completed(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_resolving_call_times_out_on_schedule() {
        let cancel = CancellationToken::new();
        let deadline = Duration::from_secs(3);
        let start = Instant::now();

        let outcome = race_deadline(std::future::pending::<()>(), deadline, &cancel).await;

        let elapsed = start.elapsed();
        assert_eq!(outcome, RaceOutcome::TimedOut(deadline));
        assert!(elapsed >= deadline);
        assert!(elapsed < deadline + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_future_is_dropped() {
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        let outcome = race_deadline(
            async move {
                let _flag = flag;
                std::future::pending::<()>().await;
            },
            Duration::from_secs(1),
            &cancel,
        )
        .await;

        assert!(matches!(outcome, RaceOutcome::TimedOut(_)));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_race() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome =
            race_deadline(std::future::pending::<()>(), Duration::from_secs(60), &cancel).await;

        assert_eq!(outcome, RaceOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_future_beats_zero_deadline() {
        let cancel = CancellationToken::new();
        let outcome = race_deadline(async { "done" }, Duration::ZERO, &cancel).await;
        assert_eq!(outcome, RaceOutcome::Completed("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits_full_duration() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        assert_eq!(pause(Duration::from_secs(2), &cancel).await, Ok(()));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(pause(Duration::from_secs(2), &cancel).await, Err(Cancelled));
        assert_eq!(pause(Duration::ZERO, &cancel).await, Err(Cancelled));
    }
}
