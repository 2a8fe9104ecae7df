//! Process-wide stop signal for the background loops

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Cloneable cancellation token
///
/// All clones share one flag. Loops either poll [`is_triggered`](Self::is_triggered)
/// after a bounded blocking call, or sleep in [`wait_timeout`](Self::wait_timeout),
/// which returns early as soon as the token is triggered.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl Shutdown {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop
    pub fn trigger(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cv.notify_all();
    }

    /// Whether stop has been signalled
    pub fn is_triggered(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep for up to `timeout`; returns `true` if stop was signalled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.inner.stopped.lock();
        if !*stopped {
            let _ = self.inner.cv.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
