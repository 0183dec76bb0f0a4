//! Monotonic microsecond clock.
//!
//! Every deadline in this crate is an absolute instant on this clock: a
//! 64-bit count of microseconds since an arbitrary, process-private anchor.
//! The anchor is taken from [`Instant`], so wall-clock jumps are never
//! observable and reading the clock cannot fail. Instant zero is reserved: a
//! deadline of `0` means "never fires".

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Number of microseconds in a second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Returns the current instant in microseconds.
pub fn now() -> u64 {
    #[cfg(any(test, feature = "test"))]
    if let Some(now) = test_override::get() {
        return now;
    }

    u64::try_from(anchor().elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Anchor instant the clock counts from, set on the first read.
fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Converts `duration` to a whole number of microseconds, saturating.
pub fn from_duration(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Returns the whole seconds in the instant or duration `t`, truncating.
pub const fn as_secs(t: u64) -> u64 {
    t / MICROS_PER_SEC
}

#[cfg(any(test, feature = "test"))]
pub(crate) mod test_override {
    //! Thread-local clock override, driven by the [`test`] module.
    //!
    //! [`test`]: crate::test

    use std::cell::Cell;

    thread_local! {
        static NOW: Cell<Option<u64>> = const { Cell::new(None) };
    }

    pub(crate) fn get() -> Option<u64> {
        NOW.get()
    }

    pub(crate) fn set(now: u64) {
        NOW.set(Some(now));
    }

    pub(crate) fn clear() {
        NOW.set(None);
    }
}
