//! Module containing the error type.

use std::{fmt, io};

/// Error returned by the timer facility.
///
/// Every variant wraps an operating system error from programming the
/// interval timer, the facility's only fallible collaborator. Errors arming
/// or disarming the wakeup are fatal: the facility refuses further operation
/// once one occurred, see [`poll_if_needed`].
///
/// [`poll_if_needed`]: crate::poll_if_needed
pub struct Error {
    inner: ErrorInner,
}

/// Inside of `Error` error.
enum ErrorInner {
    /// Error installing the wakeup notification handler.
    InstallHandler(io::Error),
    /// Error arming the OS interval timer.
    Arm(io::Error),
    /// Error disarming the OS interval timer.
    Disarm(io::Error),
}

impl Error {
    pub(crate) const fn install_handler(err: io::Error) -> Error {
        Error {
            inner: ErrorInner::InstallHandler(err),
        }
    }

    pub(crate) const fn arm(err: io::Error) -> Error {
        Error {
            inner: ErrorInner::Arm(err),
        }
    }

    pub(crate) const fn disarm(err: io::Error) -> Error {
        Error {
            inner: ErrorInner::Disarm(err),
        }
    }
}

/// We implement [`Debug`] by using [`Display`] implementation because the
/// [`Termination`] trait uses `Debug` rather then `Display` when returning an
/// `Result`.
///
/// [`Termination`]: std::process::Termination
/// [`Debug`]: std::fmt::Debug
/// [`Display`]: std::fmt::Display
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const DESC: &str = "error in timer facility";
        match self.inner {
            ErrorInner::InstallHandler(ref err) => {
                write!(f, "{DESC}: error installing wakeup handler: {err}")
            }
            ErrorInner::Arm(ref err) => {
                write!(f, "{DESC}: error arming interval timer: {err}")
            }
            ErrorInner::Disarm(ref err) => {
                write!(f, "{DESC}: error disarming interval timer: {err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.inner {
            ErrorInner::InstallHandler(ref err)
            | ErrorInner::Arm(ref err)
            | ErrorInner::Disarm(ref err) => Some(err),
        }
    }
}
