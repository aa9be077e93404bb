use crate::CoreError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Caller-held counter of outstanding "instance fully terminated" obligations.
///
/// The caller adds one obligation per start cycle; the `Notifier` settles it
/// exactly once. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self) -> MutexGuard<'_, usize> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, n: usize) {
        *self.count() += n;
    }

    /// Settle one obligation. Settling more than were added is an error.
    pub fn done(&self) -> Result<(), CoreError> {
        let mut count = self.count();
        if *count == 0 {
            return Err(CoreError::InvalidCompletion(
                "done() called with no pending obligations".to_owned(),
            ));
        }
        *count -= 1;
        if *count == 0 {
            self.inner.1.notify_all();
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        *self.count()
    }

    /// Block until every obligation is settled.
    pub fn wait(&self) {
        let mut count = self.count();
        while *count > 0 {
            count = self
                .inner
                .1
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) but bounded. Returns true if settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .inner
                .1
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
