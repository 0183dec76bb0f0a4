//! The user-visible timer value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use log::trace;

use crate::{clock, timers};

/// A deadline timer.
///
/// A `Timer` is a plain value: create one with a timeout and it joins the
/// timer set of the thread that called [`init`]; drop it and it has left the
/// set before the drop returns, guaranteed not to fire. When the deadline is
/// reached the scheduler dispatches the timer at the host's next poll point:
/// [`has_expired`] starts returning true and the callback, if any, runs.
///
/// [`init`]: crate::init
/// [`has_expired`]: Timer::has_expired
///
/// # Notes
///
/// [`init`] must have been called on this thread before the first non-inert
/// `Timer` is constructed.
///
/// Cloning an armed timer registers the clone as an independent member of
/// the set: both fire at the same deadline and dropping one does not affect
/// the other. [`clone_from`] instead has assignment semantics: the
/// destination's own registration is cancelled first, then it adopts the
/// source's deadline (and expired state) and re-registers if there is
/// anything left to fire. The source keeps its own registration either way.
///
/// [`clone_from`]: Clone::clone_from
#[must_use = "dropping a `Timer` cancels it"]
pub struct Timer {
    inner: Rc<RefCell<Inner>>,
}

/// Shared state of a [`Timer`], also referenced (weakly) by the timer set.
pub(crate) struct Inner {
    /// Absolute deadline in microseconds, zero means never fires.
    pub(crate) expires_at: u64,
    /// Set by the scheduler when the timer is dispatched.
    pub(crate) expired: bool,
    /// Ran when the timer is dispatched. Shared between clones.
    pub(crate) callback: Option<Rc<dyn Fn()>>,
}

/// Identity of a timer, used by the set's back-references and in logging.
pub(crate) fn id(inner: &Rc<RefCell<Inner>>) -> usize {
    Rc::as_ptr(inner) as *const () as usize
}

impl Timer {
    /// Create a new `Timer` that expires `timeout` from now.
    ///
    /// A zero `timeout` creates an inert timer: it never fires, never joins
    /// the set and needs no initialised facility.
    pub fn new(timeout: Duration) -> Timer {
        Timer::create(timeout, None)
    }

    /// Create a new `Timer` that runs `callback` when it expires.
    ///
    /// The callback runs inside [`poll_if_needed`], after [`has_expired`]
    /// already returns true. It may create and drop other timers, but it
    /// must not try to cancel the timer it belongs to: the scheduler has
    /// already detached that timer when the callback runs.
    ///
    /// [`poll_if_needed`]: crate::poll_if_needed
    /// [`has_expired`]: Timer::has_expired
    pub fn with_callback<F>(timeout: Duration, callback: F) -> Timer
    where
        F: Fn() + 'static,
    {
        Timer::create(timeout, Some(Rc::new(callback)))
    }

    fn create(timeout: Duration, callback: Option<Rc<dyn Fn()>>) -> Timer {
        let expires_at = if timeout.is_zero() {
            0
        } else {
            clock::now().saturating_add(clock::from_duration(timeout))
        };
        let inner = Rc::new(RefCell::new(Inner {
            expires_at,
            expired: false,
            callback,
        }));
        if expires_at == 0 {
            trace!(timer = id(&inner); "created inert timer, will not fire");
        } else {
            trace!(timer = id(&inner), deadline = expires_at; "created timer");
            timers::add(&inner);
        }
        Timer { inner }
    }

    /// Returns true once the timer has been dispatched.
    pub fn has_expired(&self) -> bool {
        self.inner.borrow().expired
    }

    /// Returns the absolute deadline in microseconds on the [`clock`], or
    /// `None` for an inert timer.
    ///
    /// The deadline remains readable after the timer expired.
    ///
    /// [`clock`]: crate::clock
    pub fn deadline(&self) -> Option<u64> {
        match self.inner.borrow().expires_at {
            0 => None,
            expires_at => Some(expires_at),
        }
    }

    /// Shared state of this timer, for the set's back-references.
    pub(crate) const fn inner(&self) -> &Rc<RefCell<Inner>> {
        &self.inner
    }

    /// Whether this timer belongs in the set: armed, not yet dispatched.
    fn is_eligible(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.expired && inner.expires_at != 0
    }
}

impl Clone for Timer {
    fn clone(&self) -> Timer {
        let inner = {
            let source = self.inner.borrow();
            Rc::new(RefCell::new(Inner {
                expires_at: source.expires_at,
                expired: source.expired,
                callback: source.callback.clone(),
            }))
        };
        let timer = Timer { inner };
        if timer.is_eligible() {
            trace!(
                timer = id(&timer.inner), source = id(&self.inner);
                "cloned timer"
            );
            timers::add(&timer.inner);
        } else {
            trace!(
                timer = id(&timer.inner), source = id(&self.inner);
                "cloned timer, will not fire"
            );
        }
        timer
    }

    /// Assignment: cancel our own registration, adopt the source's state and
    /// re-register if there is anything left to fire. The source's
    /// registration is untouched.
    fn clone_from(&mut self, source: &Timer) {
        timers::remove(&self.inner);
        // Both borrows must end before the add below: re-registering runs
        // the scheduler, which may need to dispatch the source.
        let (expires_at, expired) = {
            let from = source.inner.borrow();
            let mut inner = self.inner.borrow_mut();
            inner.expires_at = from.expires_at;
            inner.expired = from.expired;
            inner.callback = from.callback.clone();
            (from.expires_at, from.expired)
        };
        trace!(
            timer = id(&self.inner), source = id(&source.inner);
            "overwrote timer"
        );
        if !expired && expires_at != 0 {
            timers::add(&self.inner);
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        trace!(timer = id(&self.inner); "dropping timer, will not fire");
        timers::remove(&self.inner);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Timer")
            .field("deadline", &self.deadline())
            .field("expired", &inner.expired)
            .finish()
    }
}
