//! Racing primitives and the sticky terminal-error latch behind the crash race.

use std::{future::Future, pin::pin, time::Duration};

use futures::future::{self, Either};
use tokio::sync::watch;

use crate::GatherError;

/// Run two futures concurrently and return whichever settles first.
///
/// The loser is dropped, which cancels it. If both are ready on the same
/// poll, `a` wins.
pub async fn first_settled<A, B>(a: A, b: B) -> Either<A::Output, B::Output>
where
    A: Future,
    B: Future,
{
    match future::select(pin!(a), pin!(b)).await {
        Either::Left((out, _)) => Either::Left(out),
        Either::Right((out, _)) => Either::Right(out),
    }
}

/// Race `fut` against a timer of length `timeout`.
///
/// When the timer wins, `on_timeout` is evaluated at that moment to build
/// the error, so it can observe state that changed while waiting.
///
/// # Errors
/// Returns `fut`'s error, or the `on_timeout` error if the timer fired first.
pub async fn with_timeout<F, T, E, G>(fut: F, timeout: Duration, on_timeout: G) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    G: FnOnce() -> E,
{
    match first_settled(fut, tokio::time::sleep(timeout)).await {
        Either::Left(res) => res,
        Either::Right(()) => Err(on_timeout()),
    }
}

/// First-cause-wins holder for the error that ends a session.
///
/// Once set the value never changes, and every [`CrashSignal`] derived
/// from the latch fires with it.
#[derive(Debug)]
pub struct TerminalLatch {
    tx: watch::Sender<Option<GatherError>>,
}

impl Default for TerminalLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalLatch {
    /// Create an unset latch.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Record `error` unless a cause is already recorded.
    ///
    /// Returns whether this call set the latch.
    pub fn set_if_absent(&self, error: GatherError) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(error);
            true
        })
    }

    /// The recorded cause, if any.
    #[must_use]
    pub fn get(&self) -> Option<GatherError> {
        self.tx.borrow().clone()
    }

    /// Whether a cause is recorded.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// A future-backed signal that fires once a cause is recorded.
    #[must_use]
    pub fn signal(&self) -> CrashSignal {
        CrashSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Fires with the terminal cause recorded on a [`TerminalLatch`].
#[derive(Debug, Clone)]
pub struct CrashSignal {
    rx: watch::Receiver<Option<GatherError>>,
}

impl CrashSignal {
    /// Wait until a terminal cause is recorded and return it.
    ///
    /// Resolves immediately if one is already recorded. If the latch is
    /// dropped without ever being set, this never resolves.
    pub async fn fired(mut self) -> GatherError {
        let cause = match self.rx.wait_for(Option::is_some).await {
            Ok(cause) => cause.clone(),
            Err(_) => None,
        };
        match cause {
            Some(cause) => cause,
            None => future::pending().await,
        }
    }

    /// Race `fut` against this signal; the signal wins ties.
    ///
    /// # Errors
    /// Returns the terminal cause if it fires first, else `fut`'s error.
    pub async fn race<F, T>(self, fut: F) -> Result<T, GatherError>
    where
        F: Future<Output = Result<T, GatherError>>,
    {
        match first_settled(self.fired(), fut).await {
            Either::Left(cause) => Err(cause),
            Either::Right(res) => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_latch_first_cause_wins() {
        let latch = TerminalLatch::new();
        assert!(!latch.is_set());
        assert!(latch.set_if_absent(GatherError::TargetCrashed));
        assert!(!latch.set_if_absent(GatherError::TargetDetached));
        assert_eq!(latch.get(), Some(GatherError::TargetCrashed));
    }

    #[tokio::test]
    async fn test_signal_fires_for_existing_cause() {
        let latch = TerminalLatch::new();
        latch.set_if_absent(GatherError::TargetDetached);
        assert_eq!(latch.signal().fired().await, GatherError::TargetDetached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_beats_pending_work() {
        let latch = std::sync::Arc::new(TerminalLatch::new());
        let signal = latch.signal();

        let setter = std::sync::Arc::clone(&latch);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            setter.set_if_absent(GatherError::TargetCrashed);
        });

        let res: Result<(), GatherError> = signal.race(future::pending()).await;
        assert_eq!(assert_err!(res), GatherError::TargetCrashed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let fast = with_timeout(async { Ok::<_, &str>(7) }, Duration::from_secs(1), || "late");
        assert_eq!(assert_ok!(fast.await), 7);

        let start = tokio::time::Instant::now();
        let slow = with_timeout(
            future::pending::<Result<(), &str>>(),
            Duration::from_secs(5),
            || "late",
        );
        assert_eq!(assert_err!(slow.await), "late");
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_first_settled_prefers_left_on_tie() {
        let out = first_settled(async { 1 }, async { 2 }).await;
        assert!(matches!(out, Either::Left(1)));
    }
}
