//! Cancellation tokens for blocked calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A condition a fired token must wake so its waiter rechecks the token.
pub(crate) trait Wake: Send + Sync {
    /// Wakes every thread blocked on the condition.
    fn wake(&self);
}

#[derive(Debug, Default)]
struct InterruptInner {
    fired: AtomicBool,
    guarded: Mutex<Option<Weak<dyn Wake>>>,
}

/// Cloneable token that cancels the call it is attached to.
///
/// Firing the token wakes a caller blocked in
/// [`Session::dispatch_sync`](crate::Session::dispatch_sync); the call returns
/// [`DispatchError::Interrupted`](crate::DispatchError::Interrupted) unless the
/// reply had already landed. A caller still waiting for the handshake is woken
/// as well, and the session is killed. A token stays fired once triggered.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

impl Interrupt {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token and wakes the guarded waiter, if any.
    pub fn interrupt(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        let guarded = self
            .inner
            .guarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(target) = guarded {
            target.wake();
        }
    }

    /// Returns `true` once the token has been triggered.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    pub(crate) fn attach<W: Wake + 'static>(&self, target: &Arc<W>) {
        let weak: Weak<dyn Wake> = Arc::<W>::downgrade(target);
        *self
            .inner
            .guarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(weak);
    }

    pub(crate) fn detach(&self) {
        self.inner
            .guarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
