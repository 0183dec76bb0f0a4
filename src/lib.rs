//! Deadline timers dispatched from a single OS interval-timer wakeup.
//!
//! This crate provides [`Timer`]: a plain value carrying a deadline. All live
//! timers on the host's main-loop thread form a single set, and the earliest
//! deadline across that set is programmed into the platform's interval timer.
//! When the deadline elapses the kernel delivers one asynchronous
//! notification whose handler does exactly one thing: set a flag. The host
//! drains the flag from its main loop by calling [`poll_if_needed`], which
//! dispatches every expired timer and reprograms the wakeup for the next
//! deadline. No threads are spawned (on platforms with signal-driven interval
//! timers) and nothing polls the clock in between.
//!
//! ## Usage
//!
//! Call [`init`] once, on the thread that runs the main loop, before creating
//! the first `Timer`. After that timers are plain values: create them with a
//! timeout, check [`Timer::has_expired`], or attach behaviour with
//! [`Timer::with_callback`]. Dropping a timer cancels it.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use eggtimer::Timer;
//!
//! fn main() -> Result<(), eggtimer::Error> {
//!     eggtimer::init()?;
//!
//!     let timeout = Timer::new(Duration::from_secs(10));
//!     while !timeout.has_expired() {
//!         // Do a slice of work, then reach a poll point. A real host blocks
//!         // in its event loop here instead of spinning.
//!         eggtimer::poll_if_needed()?;
//!     }
//!
//!     eggtimer::cleanup();
//!     Ok(())
//! }
//! ```
//!
//! ## The cooperative contract
//!
//! The facility is single threaded by design. The set lives on the thread
//! that called [`init`]; timers must be created, polled and dropped on that
//! thread. The only thing that happens outside of it is the notification
//! itself, which is confined to a single atomic flag store. All expiry
//! callbacks therefore run sequentially, inside [`poll_if_needed`], on the
//! host's own thread. A callback that blocks delays every later timer, which
//! is accepted: deadlines are a "not before" promise, never an "exactly at".
//!
//! ## Logging
//!
//! Logging is done via the [`log`] crate, which only defines the logging
//! macros. This crate ships no logging implementation; `std-logger` works
//! well. Per-timer lifecycle events are logged at trace level.
//!
//! [`log`]: https://crates.io/crates/log
//!
//! ## Platform support
//!
//! On Unix the wakeup is `setitimer(2)` delivering `SIGALRM`. Other platforms
//! get the same contract from a dedicated wakeup thread. Both funnel their
//! notification through the same flag, so host code is identical everywhere.
//!
//! ## Features
//!
//! This crate has one optional feature: `test`. The `test` feature will
//! enable the `test` module which adds testing facilities.

#![warn(
    anonymous_parameters,
    bare_trait_objects,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results,
    variant_size_differences
)]
// Disallow warnings when running tests.
#![cfg_attr(test, deny(warnings))]
// Disallow warnings in examples, we want to set a good example after all.
#![doc(test(attr(deny(warnings))))]

pub mod clock;
mod error;
mod sys;
mod timer;
mod timers;

pub use error::Error;
pub use timer::Timer;
pub use timers::{cleanup, init, poll_if_needed};
