//! Unix implementation of the interval timer: `setitimer(2)` and `SIGALRM`.

use std::{fmt, io, mem, ptr};

use log::warn;

use crate::clock::MICROS_PER_SEC;
use crate::sys::IntervalTimer;
use crate::timers;

/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)? ) ) => {{
        let res = unsafe { libc::$fn($( $arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// `SIGALRM` driven interval timer.
///
/// Keeps the previous `SIGALRM` disposition around so that
/// [`IntervalTimer::uninstall`] can restore it.
pub(crate) struct Alarm {
    previous: Option<libc::sigaction>,
}

impl Alarm {
    pub(crate) const fn new() -> Alarm {
        Alarm { previous: None }
    }
}

/// Signal handler, runs in asynchronous signal-delivery context.
///
/// Nothing is safe here, not even traversing the set of timers, so the
/// handler does the single thing that is: requesting a reschedule, which the
/// host's next poll point acts on.
extern "C" fn alarm_handler(_: libc::c_int) {
    timers::request_reschedule();
}

impl IntervalTimer for Alarm {
    fn install(&mut self) -> io::Result<()> {
        // SAFETY: an all-zeroes `sigaction` is valid, all fields are
        // overwritten below.
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = alarm_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        // SAFETY: `sa_mask` is a valid signal set for the calling process.
        _ = syscall!(sigemptyset(&mut action.sa_mask))?;

        // SAFETY: `action` is fully initialised and `previous` is valid to
        // write a `sigaction` into.
        let mut previous: libc::sigaction = unsafe { mem::zeroed() };
        _ = syscall!(sigaction(libc::SIGALRM, &action, &mut previous))?;
        self.previous = Some(previous);
        Ok(())
    }

    fn arm(&mut self, delay: u64) -> io::Result<()> {
        debug_assert!(delay != 0, "arming interval timer with zero delay");
        let timer = libc::itimerval {
            it_interval: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            it_value: libc::timeval {
                tv_sec: (delay / MICROS_PER_SEC) as libc::time_t,
                tv_usec: (delay % MICROS_PER_SEC) as libc::suseconds_t,
            },
        };
        // SAFETY: `timer` is initialised, the old-value pointer may be null.
        syscall!(setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut())).map(|_| ())
    }

    fn disarm(&mut self) -> io::Result<()> {
        // SAFETY: an all-zeroes `itimerval` is valid and means disarm.
        let timer: libc::itimerval = unsafe { mem::zeroed() };
        syscall!(setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut())).map(|_| ())
    }

    fn uninstall(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Failing to restore the old disposition leaves our handler in
            // place, which only ever sets a flag, so this is best-effort.
            // SAFETY: `previous` came out of the `sigaction` call in
            // `install`.
            if let Err(err) = syscall!(sigaction(libc::SIGALRM, &previous, ptr::null_mut())) {
                warn!(err:% = err; "failed to restore SIGALRM disposition");
            }
        }
    }
}

impl fmt::Debug for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("installed", &self.previous.is_some())
            .finish()
    }
}
