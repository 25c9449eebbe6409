//! Single-slot operation gate.
//!
//! At most one BLE operation may be outstanding on the peripheral. The gate
//! hands out a ticket per operation, rejects callers that arrive while a
//! ticket is live, and races the operation against its deadline and the loss
//! of the link.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default operation timeout (10 seconds).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Enforces a single outstanding operation.
#[derive(Debug, Default)]
pub struct OperationGate {
    occupied: AtomicBool,
}

/// Proof of holding the operation slot. Releases it when dropped.
#[derive(Debug)]
pub struct Ticket<'a> {
    gate: &'a OperationGate,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.gate.occupied.store(false, Ordering::Release);
        trace!("Operation slot released");
    }
}

impl OperationGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a ticket is currently outstanding.
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    /// Take the slot without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another ticket is outstanding.
    pub fn try_acquire(&self) -> Result<Ticket<'_>> {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;

        trace!("Operation slot acquired");
        Ok(Ticket { gate: self })
    }

    /// Run `body` while holding the slot.
    ///
    /// The outcome is whichever happens first: `body` settles, `disconnected`
    /// completes, or `timeout` elapses. The losing futures are dropped and the
    /// slot is released before this returns, on every path, including when
    /// the returned future itself is dropped.
    ///
    /// `disconnected` must already be observing the link when it is passed in.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if another operation is outstanding; nothing is queued.
    /// - [`Error::Disconnected`] if the link went down first.
    /// - [`Error::Timeout`] if the deadline passed first.
    /// - Whatever `body` failed with, if it settled first.
    pub async fn run_exclusive<T, F, D>(
        &self,
        timeout: Duration,
        disconnected: D,
        body: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        D: Future<Output = ()>,
    {
        let _ticket = self.try_acquire()?;

        tokio::select! {
            biased;

            result = body => result,
            _ = disconnected => {
                debug!("Operation cancelled by disconnect");
                Err(Error::Disconnected)
            }
            _ = tokio::time::sleep(timeout) => {
                debug!("Operation timed out after {:?}", timeout);
                Err(Error::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use tokio::sync::oneshot;
    use tokio_test::assert_pending;

    fn never() -> future::Pending<()> {
        future::pending()
    }

    #[tokio::test]
    async fn test_body_result_wins() {
        let gate = OperationGate::new();
        let result = gate
            .run_exclusive(DEFAULT_OPERATION_TIMEOUT, never(), async { Ok(7u8) })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!gate.is_occupied());
    }

    #[tokio::test]
    async fn test_body_error_passes_through() {
        let gate = OperationGate::new();
        let result: Result<()> = gate
            .run_exclusive(DEFAULT_OPERATION_TIMEOUT, never(), async {
                Err(Error::protocol("write rejected"))
            })
            .await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert!(!gate.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let gate = OperationGate::new();
        let started = tokio::time::Instant::now();

        let result: Result<()> = gate
            .run_exclusive(Duration::from_millis(5000), never(), future::pending())
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert!(!gate.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels() {
        let gate = OperationGate::new();
        let (tx, rx) = oneshot::channel::<()>();

        let lost = async move {
            let _ = rx.await;
        };
        let op = gate.run_exclusive::<(), _, _>(
            DEFAULT_OPERATION_TIMEOUT,
            lost,
            future::pending(),
        );
        tokio::pin!(op);

        assert_pending!(futures::poll!(&mut op));
        assert!(gate.is_occupied());

        tx.send(()).unwrap();
        assert!(matches!(op.await, Err(Error::Disconnected)));
        assert!(!gate.is_occupied());
    }

    #[tokio::test]
    async fn test_busy_does_not_disturb_outstanding_ticket() {
        let gate = OperationGate::new();
        let (tx, rx) = oneshot::channel::<u8>();

        let first = gate.run_exclusive(DEFAULT_OPERATION_TIMEOUT, never(), async move {
            rx.await.map_err(|_| Error::protocol("dropped"))
        });
        tokio::pin!(first);
        assert_pending!(futures::poll!(&mut first));

        let second = gate
            .run_exclusive(DEFAULT_OPERATION_TIMEOUT, never(), async { Ok(1u8) })
            .await;
        assert!(matches!(second, Err(Error::Busy)));
        assert!(gate.is_occupied());

        tx.send(42).unwrap();
        assert_eq!(first.await.unwrap(), 42);
        assert!(!gate.is_occupied());
    }

    #[tokio::test]
    async fn test_dropping_operation_releases_slot() {
        let gate = OperationGate::new();
        {
            let op = gate.run_exclusive::<(), _, _>(
                DEFAULT_OPERATION_TIMEOUT,
                never(),
                future::pending(),
            );
            tokio::pin!(op);
            assert_pending!(futures::poll!(&mut op));
            assert!(gate.is_occupied());
        }
        assert!(!gate.is_occupied());
    }

    #[test]
    fn test_try_acquire() {
        let gate = OperationGate::new();
        let ticket = gate.try_acquire().unwrap();
        assert!(matches!(gate.try_acquire(), Err(Error::Busy)));
        drop(ticket);
        assert!(gate.try_acquire().is_ok());
    }
}
