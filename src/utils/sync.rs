//! Counting semaphore and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How often a blocked acquire re-checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared flag for cooperative cancellation.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A counting semaphore handing out RAII permits.
///
/// Dropping a [`Permit`] returns it, including when the holder unwinds.
#[derive(Debug)]
pub struct Semaphore {
    available: Mutex<usize>,
    changed: Condvar,
    capacity: usize,
}

impl Semaphore {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(capacity),
            changed: Condvar::new(),
            capacity,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Block until a permit is available.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut available = self.available.lock();
        while *available == 0 {
            self.changed.wait(&mut available);
        }
        *available -= 1;
        Permit {
            semaphore: Arc::clone(self),
        }
    }

    /// Block until a permit is available or `cancel` fires.
    ///
    /// Returns `None` if cancelled before a permit was obtained.
    #[must_use]
    pub fn acquire_unless_cancelled(self: &Arc<Self>, cancel: &CancellationToken) -> Option<Permit> {
        let mut available = self.available.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if *available > 0 {
                break;
            }
            self.changed.wait_for(&mut available, CANCEL_POLL_INTERVAL);
        }
        *available -= 1;
        Some(Permit {
            semaphore: Arc::clone(self),
        })
    }

    /// Wait until every permit has been returned.
    ///
    /// Returns `false` if `timeout` elapsed first.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut available = self.available.lock();
        while *available < self.capacity {
            match deadline {
                Some(deadline) => {
                    if self
                        .changed
                        .wait_until(&mut available, deadline)
                        .timed_out()
                    {
                        return *available == self.capacity;
                    }
                }
                None => self.changed.wait(&mut available),
            }
        }
        true
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        drop(available);
        self.changed.notify_all();
    }
}

/// A permit from a [`Semaphore`], returned on drop.
#[derive(Debug)]
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
