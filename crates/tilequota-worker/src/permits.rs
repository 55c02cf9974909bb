//! Concurrency cap for eviction cycles that can be resized while cycles
//! hold permits.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// A single semaphore whose size follows the configured cap.
///
/// Shrinking forgets idle permits right away. Permits still held by running
/// cycles are owed and get forgotten as those cycles release them.
#[derive(Debug)]
pub(crate) struct CleanupPermits {
    semaphore: Arc<Semaphore>,
    cap: AtomicUsize,
    owed: Arc<AtomicUsize>,
}

/// Held for the duration of one cycle.
#[derive(Debug)]
pub(crate) struct CleanupPermit {
    permit: Option<OwnedSemaphorePermit>,
    owed: Arc<AtomicUsize>,
}

impl Drop for CleanupPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if take_one(&self.owed) {
            permit.forget();
        }
    }
}

/// Decrement `counter` unless it is zero.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl CleanupPermits {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cap)),
            cap: AtomicUsize::new(cap),
            owed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub(crate) async fn acquire(&self) -> Result<CleanupPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(CleanupPermit {
            permit: Some(permit),
            owed: self.owed.clone(),
        })
    }

    /// Change the cap. Callers serialize resizes.
    pub(crate) fn resize(&self, cap: usize) {
        let current = self.cap.swap(cap, Ordering::SeqCst);
        if cap > current {
            let mut grow = cap - current;
            // Cancel debts before handing out new permits.
            while grow > 0 && take_one(&self.owed) {
                grow -= 1;
            }
            self.semaphore.add_permits(grow);
        } else if cap < current {
            let shrink = current - cap;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.owed.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[cfg(test)]
    fn owed(&self) -> usize {
        self.owed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shrink_forgets_idle_permits() {
        let permits = CleanupPermits::new(3);
        permits.resize(1);
        assert_eq!(permits.cap(), 1);
        assert_eq!(permits.available(), 1);
        assert_eq!(permits.owed(), 0);
    }

    #[tokio::test]
    async fn test_shrink_below_held_permits_is_paid_on_release() {
        let permits = CleanupPermits::new(2);
        let first = permits.acquire().await.unwrap();
        let second = permits.acquire().await.unwrap();

        permits.resize(1);
        assert_eq!(permits.owed(), 1);

        drop(first);
        assert_eq!(permits.available(), 0);
        assert_eq!(permits.owed(), 0);

        drop(second);
        assert_eq!(permits.available(), 1);
    }

    #[tokio::test]
    async fn test_grow_cancels_debt_first() {
        let permits = CleanupPermits::new(2);
        let first = permits.acquire().await.unwrap();
        let second = permits.acquire().await.unwrap();

        permits.resize(1);
        permits.resize(3);
        assert_eq!(permits.owed(), 0);
        assert_eq!(permits.available(), 1);

        drop(first);
        drop(second);
        assert_eq!(permits.available(), 3);
    }

    #[tokio::test]
    async fn test_grow_wakes_waiters() {
        let permits = Arc::new(CleanupPermits::new(1));
        let held = permits.acquire().await.unwrap();

        let waiter = tokio::spawn({
            let permits = permits.clone();
            async move { permits.acquire().await.map(drop).is_ok() }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        permits.resize(2);
        assert!(waiter.await.unwrap());
        drop(held);
    }
}
