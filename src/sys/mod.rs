//! Interface to the OS interval-timer primitive.
//!
//! A single interval timer drives the whole facility: it is armed with the
//! delay to the earliest deadline in the set and delivers exactly one
//! asynchronous notification when that delay elapses. On Unix this is
//! `setitimer(2)` delivering `SIGALRM`; platforms without signal-driven
//! interval timers get the same contract from a dedicated wakeup thread.
//! Both deliver their notification through [`request_reschedule`], never
//! directly into the timer set.
//!
//! [`request_reschedule`]: crate::timers::request_reschedule

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::Alarm;

#[cfg(not(unix))]
mod thread;
#[cfg(not(unix))]
pub(crate) use thread::Alarm;

/// OS interval-timer primitive.
///
/// Implementations deliver at most one outstanding notification per [`arm`],
/// by calling [`request_reschedule`] from whatever context the platform
/// delivers wakeups in.
///
/// [`arm`]: IntervalTimer::arm
/// [`request_reschedule`]: crate::timers::request_reschedule
pub(crate) trait IntervalTimer {
    /// Install the notification handler. Called once, during `init`.
    fn install(&mut self) -> io::Result<()>;

    /// Program a single notification to fire no earlier than `delay`
    /// microseconds from now, replacing any pending program.
    ///
    /// `delay` must not be zero, callers clamp to one microsecond. Some
    /// platform primitives treat a zero delay as a disarm.
    fn arm(&mut self, delay: u64) -> io::Result<()>;

    /// Cancel any pending notification.
    fn disarm(&mut self) -> io::Result<()>;

    /// Uninstall the notification handler. Called once, during `cleanup`.
    fn uninstall(&mut self);
}
