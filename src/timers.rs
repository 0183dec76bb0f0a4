//! The timer set and its scheduler.
//!
//! This module holds the collection of live [`Timer`] values and keeps the
//! platform's interval timer programmed with the earliest deadline across
//! all of them. The notification the interval timer delivers runs almost
//! nothing: it sets the reschedule-requested flag and returns, see
//! [`request_reschedule`]. All real work happens at the host's next poll
//! point, in [`poll_if_needed`].
//!
//! The set is confined to the thread that called [`init`]. That confinement
//! is the locking discipline: the reschedule-requested flag is the only
//! state shared with the notification context, and it is a single atomic
//! bool. There are no mutexes because there is no second thread touching
//! the set.
//!
//! [`Timer`]: crate::Timer

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};

use crate::clock;
use crate::error::Error;
use crate::sys::{Alarm, IntervalTimer};
use crate::timer::{self, Inner};

#[cfg(test)]
#[path = "timers_tests.rs"]
mod timers_tests;

/// Set from notification context, drained at poll points.
static RESCHEDULE_NEEDED: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// The timer set, owned by the thread that called [`init`].
    static TIMERS: RefCell<Option<TimerSet>> = const { RefCell::new(None) };
}

/// Collection of live timers plus the interval timer armed for the earliest
/// of their deadlines.
struct TimerSet {
    /// Back-references to the live timers. Unordered: the earliest deadline
    /// is selected by linear scan, the set is expected to hold tens of
    /// timers at most.
    timers: Vec<Weak<RefCell<Inner>>>,
    /// The platform's interval-timer primitive.
    alarm: Box<dyn IntervalTimer>,
    /// Set while a reschedule pass runs, to absorb re-entrant reschedules
    /// from expiry callbacks.
    rescheduling: bool,
    /// Whether a fatal adapter error occurred. Once set the scheduler
    /// refuses further operation, until `cleanup` and a fresh `init`.
    failed: bool,
    /// First fatal adapter error, handed to the host by [`poll_if_needed`].
    error: Option<Error>,
}

impl TimerSet {
    fn new(alarm: Box<dyn IntervalTimer>) -> TimerSet {
        TimerSet {
            timers: Vec::new(),
            alarm,
            rescheduling: false,
            failed: false,
            error: None,
        }
    }

    /// Record a fatal adapter error.
    fn set_err(&mut self, err: Error) {
        self.failed = true;
        // We always keep the first error.
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Initialise the timer facility on the calling thread.
///
/// This creates the empty timer set and installs the wakeup notification
/// handler, leaving the interval timer disarmed. It must be called exactly
/// once, by the thread that runs the host's main loop, before the first
/// non-inert [`Timer`] is constructed.
///
/// [`Timer`]: crate::Timer
///
/// # Panics
///
/// Panics if the facility is already initialised on this thread.
pub fn init() -> Result<(), Error> {
    init_with(Box::new(Alarm::new()))
}

pub(crate) fn init_with(mut alarm: Box<dyn IntervalTimer>) -> Result<(), Error> {
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        assert!(timers.is_none(), "timer facility already initialised");
        alarm.install().map_err(Error::install_handler)?;
        *timers = Some(TimerSet::new(alarm));
        Ok(())
    })?;
    debug!("timer facility initialised");
    Ok(())
}

/// Tear the timer facility down.
///
/// Disarms the interval timer, uninstalls the notification handler and
/// discards the set. [`Timer`] values that outlive the cleanup behave as if
/// they never fire and dropping them is a no-op towards the set.
///
/// [`Timer`]: crate::Timer
///
/// # Panics
///
/// Panics if the facility is not initialised on this thread.
pub fn cleanup() {
    let mut set = TIMERS.with(|timers| {
        timers
            .borrow_mut()
            .take()
            .expect("timer facility not initialised")
    });
    if let Err(err) = set.alarm.disarm() {
        // Already tearing down, nothing better to do than report it.
        warn!(err:% = err; "failed to disarm interval timer during cleanup");
    }
    set.alarm.uninstall();
    RESCHEDULE_NEEDED.store(false, Ordering::Relaxed);
    debug!(remaining = set.timers.len(); "timer facility cleaned up");
}

/// Run the scheduler if a notification requested it.
///
/// The host must call this from its main loop, at any convenient point. All
/// expiry dispatch and rearming happens here, never in the notification
/// context, so a host that stops polling stops dispatching.
///
/// Does nothing if the facility is not initialised on this thread.
///
/// # Errors
///
/// Returns an error if programming the interval timer failed since the last
/// poll. Such an error is fatal: the facility refuses further operation (no
/// timer fires any more) and the host is expected to terminate, or to
/// [`cleanup`] and start over.
pub fn poll_if_needed() -> Result<(), Error> {
    if RESCHEDULE_NEEDED.load(Ordering::Relaxed) {
        reschedule();
    }
    match take_err() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Request that the scheduler runs at the host's next poll point.
///
/// This is the only operation permitted in asynchronous notification
/// context: a single relaxed store. No allocation, no logging, no set
/// traversal, no adapter call.
pub(crate) fn request_reschedule() {
    RESCHEDULE_NEEDED.store(true, Ordering::Relaxed);
}

/// Add `timer` to the set and reschedule.
///
/// Part of [`Timer`]'s lifecycle, see that type.
///
/// [`Timer`]: crate::Timer
///
/// # Panics
///
/// Panics if the facility is not initialised on this thread.
pub(crate) fn add(timer: &Rc<RefCell<Inner>>) {
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        let set = timers
            .as_mut()
            .expect("timer facility not initialised");
        set.timers.push(Rc::downgrade(timer));
    });
    reschedule();
}

/// Remove every back-reference to `timer` from the set and reschedule.
///
/// It is not an error to remove a timer that is not a member, or to remove
/// after [`cleanup`]: dropping timer values must always be safe.
pub(crate) fn remove(timer: &Rc<RefCell<Inner>>) {
    let removed = TIMERS
        .try_with(|timers| {
            let mut timers = timers.borrow_mut();
            let Some(set) = timers.as_mut() else {
                return false;
            };
            let ptr = Rc::as_ptr(timer);
            let before = set.timers.len();
            set.timers.retain(|entry| entry.as_ptr() != ptr);
            before != set.timers.len()
        })
        // The thread-local is gone during thread teardown, then there is no
        // set left to remove from.
        .unwrap_or(false);
    if removed {
        reschedule();
    }
}

/// Returns the number of timers in the set.
///
/// # Notes
///
/// This is only used for debugging & testing purposes.
#[cfg(any(test, feature = "test"))]
pub(crate) fn len() -> usize {
    TIMERS.with(|timers| timers.borrow().as_ref().map_or(0, |set| set.timers.len()))
}

/// Tear down regardless of state, used by the test facilities so that a
/// failing test cannot leave the thread's facility behind.
#[cfg(any(test, feature = "test"))]
pub(crate) fn teardown() {
    let set = TIMERS.with(|timers| timers.borrow_mut().take());
    if let Some(mut set) = set {
        _ = set.alarm.disarm();
        set.alarm.uninstall();
    }
    RESCHEDULE_NEEDED.store(false, Ordering::Relaxed);
}

/// Run the scheduler: dispatch expired timers and reprogram the interval
/// timer for the earliest remaining deadline.
///
/// Callable only from normal context. Does nothing if the facility is not
/// initialised, refused operation after a fatal error, or a pass is already
/// running: a reschedule triggered from within an expiry callback (by a
/// callback constructing or dropping timers) is absorbed by the running
/// pass, whose scan restarts after every dispatch and whose selection runs
/// last.
fn reschedule() {
    let in_progress = TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        match timers.as_mut() {
            Some(set) if !set.failed && !set.rescheduling => {
                set.rescheduling = true;
                true
            }
            _ => false,
        }
    });
    if !in_progress {
        return;
    }
    let guard = RescheduleGuard;

    // Clear the request flag before reading the clock or scanning. A
    // notification delivered from here on may be for a deadline this pass
    // will not observe, so it must force another pass.
    RESCHEDULE_NEEDED.store(false, Ordering::Relaxed);
    let now = clock::now();

    // Expiry pass. Dispatch runs arbitrary callbacks which may mutate the
    // set, so the set is not borrowed during dispatch and the scan restarts
    // from the beginning after every dispatch.
    while let Some(timer) = take_due_timer(now) {
        dispatch(&timer, now);
    }

    // Selection pass: earliest remaining deadline, clamped to at least one
    // microsecond so that a deadline that arrived since `now` was read still
    // makes progress (and so that a zero delay, which some platforms treat
    // as a disarm, never reaches the adapter).
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        let Some(set) = timers.as_mut() else {
            // A callback tore the facility down mid-pass.
            return;
        };
        let mut next: Option<u64> = None;
        for entry in &set.timers {
            let Some(timer) = entry.upgrade() else {
                continue;
            };
            let delay = timer.borrow().expires_at.saturating_sub(now).max(1);
            next = Some(match next {
                Some(current) => current.min(delay),
                None => delay,
            });
        }
        let result = match next {
            Some(delay) => {
                trace!(delay = delay, timers = set.timers.len(); "arming interval timer");
                set.alarm.arm(delay).map_err(Error::arm)
            }
            None => {
                trace!("timer set empty, disarming interval timer");
                set.alarm.disarm().map_err(Error::disarm)
            }
        };
        if let Err(err) = result {
            set.set_err(err);
        }
    });

    drop(guard);
}

/// Clears [`TimerSet::rescheduling`] when the pass ends, also when it ends
/// early because a callback panic unwinds through [`reschedule`]. On unwind
/// it also re-requests a reschedule: the request flag was cleared at the
/// start of the pass and the abandoned scan may have left dispatchable
/// timers behind, re-requesting lets the host's next poll recover.
struct RescheduleGuard;

impl Drop for RescheduleGuard {
    fn drop(&mut self) {
        _ = TIMERS.try_with(|timers| {
            if let Some(set) = timers.borrow_mut().as_mut() {
                set.rescheduling = false;
            }
        });
        if std::thread::panicking() {
            request_reschedule();
        }
    }
}

/// Remove and return a timer from the set that is due at `now`, if any.
///
/// Members that already expired, members without a deadline and
/// back-references to timers that no longer exist all violate the set's
/// invariants; encountering one here is repaired by removal.
fn take_due_timer(now: u64) -> Option<Rc<RefCell<Inner>>> {
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        let set = timers.as_mut()?;
        let mut index = 0;
        while index < set.timers.len() {
            let Some(timer) = set.timers[index].upgrade() else {
                trace!("removing dangling back-reference from timer set");
                _ = set.timers.swap_remove(index);
                continue;
            };
            let (expires_at, expired) = {
                let inner = timer.borrow();
                (inner.expires_at, inner.expired)
            };
            if expired || expires_at == 0 {
                // Expired and inert timers are never members, they should
                // not have been here in the first place.
                trace!(timer = timer::id(&timer); "removing stale timer from set");
                _ = set.timers.swap_remove(index);
                continue;
            }
            if expires_at <= now {
                _ = set.timers.swap_remove(index);
                return Some(timer);
            }
            index += 1;
        }
        None
    })
}

/// Dispatch `timer`: mark it expired and run its callback.
///
/// The timer is already removed from the set, so a panicking callback
/// leaves the set consistent and a callback can never observe the timer it
/// belongs to as a member.
fn dispatch(timer: &Rc<RefCell<Inner>>, now: u64) {
    trace!(timer = timer::id(timer), now = now; "timer expired, dispatching");
    let callback = {
        let mut inner = timer.borrow_mut();
        inner.expired = true;
        inner.callback.clone()
    };
    if let Some(callback) = callback {
        callback();
    }
}

/// Take the recorded fatal adapter error, if any.
fn take_err() -> Option<Error> {
    TIMERS.with(|timers| {
        timers
            .borrow_mut()
            .as_mut()
            .and_then(|set| set.error.take())
    })
}
