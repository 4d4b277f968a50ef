use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kiln_error::KilnError;
use tokio::sync::{OwnedSemaphorePermit, broadcast};
use tokio_util::sync::CancellationToken;

/// A lifecycle event a [`Semaphore`] publishes to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreEvent {
    /// A waiter started waiting for a permit.
    Queued,
    /// A waiter was granted a permit.
    Acquired,
    /// A held permit was released.
    Released,
    /// A waiter's acquire timed out.
    Timeout,
    /// A waiter's acquire was cancelled via its signal.
    Aborted,
    /// The semaphore was disposed.
    Disposed,
}

/// Options controlling a single [`Semaphore::acquire`] call.
#[derive(Default, Clone)]
pub struct AcquireOptions {
    /// Fail the acquire with [`KilnError::SemaphoreAcquireTimeout`] after this long.
    pub timeout: Option<Duration>,
    /// Fail the acquire with [`KilnError::Cancellation`] if this token fires first.
    pub signal: Option<CancellationToken>,
}

/// A counting semaphore with cooperative cancellation, a configurable
/// timeout, and lifecycle events for observability.
///
/// Waiters queue FIFO: the *i*th permit released is granted to the *i*th
/// waiter still waiting, because this wraps `tokio::sync::Semaphore`, whose
/// internal intrusive waiter list already provides that guarantee — there is
/// no reason to hand-roll a second one alongside it.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
    events: broadcast::Sender<SemaphoreEvent>,
    disposed: Arc<AtomicBool>,
}

/// A held permit. Releasing is automatic on drop; [`SemaphorePermit::release`]
/// exists for callers that want to release early and keep the rest of their
/// scope running without the permit.
pub struct SemaphorePermit {
    permit: Option<OwnedSemaphorePermit>,
    events: broadcast::Sender<SemaphoreEvent>,
}

impl Semaphore {
    /// Constructs a semaphore with `max_permits` permits.
    ///
    /// `max_permits` is taken as `f64` (rather than `u32`) so that callers
    /// porting configuration from a dynamically-typed source preserve the
    /// original boundary behavior: a zero or negative count is
    /// [`KilnError::SemaphoreInvalidPermits`], and a fractional count is
    /// [`KilnError::SemaphoreNonIntegerPermits`].
    pub fn new(max_permits: f64) -> Result<Self, KilnError> {
        if max_permits <= 0.0 {
            return Err(KilnError::SemaphoreInvalidPermits);
        }
        if max_permits.fract() != 0.0 {
            return Err(KilnError::SemaphoreNonIntegerPermits);
        }
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(tokio::sync::Semaphore::new(max_permits as usize)),
            events,
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribes to this semaphore's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SemaphoreEvent> {
        self.events.subscribe()
    }

    /// The number of permits currently available.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    fn emit(&self, event: SemaphoreEvent) {
        let _ = self.events.send(event);
    }

    /// Acquires a permit, honoring `options.timeout` and `options.signal`.
    pub async fn acquire(&self, options: AcquireOptions) -> Result<SemaphorePermit, KilnError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(KilnError::SemaphoreDisposed);
        }

        self.emit(SemaphoreEvent::Queued);
        let acquire_fut = Arc::clone(&self.inner).acquire_owned();

        let signal = options.signal.clone();
        let result = match (options.timeout, signal) {
            (Some(dur), Some(token)) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(KilnError::Cancellation),
                    _ = tokio::time::sleep(dur) => Err(KilnError::SemaphoreAcquireTimeout),
                    permit = acquire_fut => permit.map_err(|_| KilnError::SemaphoreDisposed),
                }
            }
            (Some(dur), None) => match tokio::time::timeout(dur, acquire_fut).await {
                Ok(permit) => permit.map_err(|_| KilnError::SemaphoreDisposed),
                Err(_) => Err(KilnError::SemaphoreAcquireTimeout),
            },
            (None, Some(token)) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(KilnError::Cancellation),
                    permit = acquire_fut => permit.map_err(|_| KilnError::SemaphoreDisposed),
                }
            }
            (None, None) => acquire_fut.await.map_err(|_| KilnError::SemaphoreDisposed),
        };

        match result {
            Ok(permit) => {
                self.emit(SemaphoreEvent::Acquired);
                Ok(SemaphorePermit {
                    permit: Some(permit),
                    events: self.events.clone(),
                })
            }
            Err(KilnError::SemaphoreAcquireTimeout) => {
                self.emit(SemaphoreEvent::Timeout);
                Err(KilnError::SemaphoreAcquireTimeout)
            }
            Err(KilnError::Cancellation) => {
                self.emit(SemaphoreEvent::Aborted);
                Err(KilnError::Cancellation)
            }
            Err(other) => Err(other),
        }
    }

    /// Acquires a permit, runs `f` with it held, then releases it — whether
    /// `f` succeeds or not.
    pub async fn with_permit<F, Fut, T>(&self, options: AcquireOptions, f: F) -> Result<T, KilnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire(options).await?;
        let result = f().await;
        drop(permit);
        Ok(result)
    }

    /// Closes the semaphore: every pending and future `acquire` fails with
    /// [`KilnError::SemaphoreDisposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.inner.close();
        self.emit(SemaphoreEvent::Disposed);
    }
}

impl SemaphorePermit {
    /// Releases the permit early.
    pub fn release(mut self) {
        self.permit.take();
        let _ = self.events.send(SemaphoreEvent::Released);
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            let _ = self.events.send(SemaphoreEvent::Released);
        }
    }
}

use std::future::Future;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_fractional_permits() {
        assert!(matches!(
            Semaphore::new(0.0),
            Err(KilnError::SemaphoreInvalidPermits)
        ));
        assert!(matches!(
            Semaphore::new(1.5),
            Err(KilnError::SemaphoreNonIntegerPermits)
        ));
    }

    #[tokio::test]
    async fn fifo_waiters_granted_in_release_order() {
        let sem = Semaphore::new(1.0).unwrap();
        let first = sem.acquire(AcquireOptions::default()).await.unwrap();

        let sem2 = sem.clone();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let order2 = order.clone();
        let waiter_a = tokio::spawn({
            let sem2 = sem2.clone();
            let order = order.clone();
            async move {
                let _p = sem2.acquire(AcquireOptions::default()).await.unwrap();
                order.lock().push("a");
            }
        });
        tokio::task::yield_now().await;
        let waiter_b = tokio::spawn(async move {
            let _p = sem2.acquire(AcquireOptions::default()).await.unwrap();
            order2.lock().push("b");
        });
        tokio::task::yield_now().await;

        drop(first);
        waiter_a.await.unwrap();
        waiter_b.await.unwrap();
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dispose_rejects_pending_and_future_acquires() {
        let sem = Semaphore::new(1.0).unwrap();
        let _held = sem.acquire(AcquireOptions::default()).await.unwrap();
        sem.dispose();
        let result = sem.acquire(AcquireOptions::default()).await;
        assert!(matches!(result, Err(KilnError::SemaphoreDisposed)));
    }

    #[tokio::test]
    async fn acquire_times_out() {
        let sem = Semaphore::new(1.0).unwrap();
        let _held = sem.acquire(AcquireOptions::default()).await.unwrap();
        let result = sem
            .acquire(AcquireOptions {
                timeout: Some(Duration::from_millis(10)),
                signal: None,
            })
            .await;
        assert!(matches!(result, Err(KilnError::SemaphoreAcquireTimeout)));
    }
}
