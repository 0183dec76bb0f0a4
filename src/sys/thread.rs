//! Fallback implementation of the interval timer: a dedicated wakeup thread.
//!
//! Platforms without signal-driven interval timers get the same contract
//! from a worker thread. The worker sleeps until the programmed deadline and
//! then delivers a single notification through the shared trampoline. Arming
//! and disarming are messages on a channel, so re-arming replaces any
//! pending program just like `setitimer(2)` does.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::sys::IntervalTimer;
use crate::timers;

/// Interval timer driven by a wakeup thread.
#[derive(Debug)]
pub(crate) struct Alarm {
    worker: Option<Worker>,
}

#[derive(Debug)]
struct Worker {
    commands: Sender<Command>,
    handle: thread::JoinHandle<()>,
}

#[derive(Copy, Clone, Debug)]
enum Command {
    /// Program a notification `Duration` from now.
    Arm(Duration),
    /// Cancel the pending notification, if any.
    Disarm,
    /// Stop the wakeup thread.
    Shutdown,
}

impl Alarm {
    pub(crate) const fn new() -> Alarm {
        Alarm { worker: None }
    }

    fn send(&mut self, command: Command) -> io::Result<()> {
        match &self.worker {
            Some(worker) => worker
                .commands
                .send(command)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "wakeup thread died")),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "wakeup thread not running",
            )),
        }
    }
}

impl IntervalTimer for Alarm {
    fn install(&mut self) -> io::Result<()> {
        let (commands, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name("timer wakeup".to_owned())
            .spawn(move || run_worker(&receiver))?;
        self.worker = Some(Worker { commands, handle });
        Ok(())
    }

    fn arm(&mut self, delay: u64) -> io::Result<()> {
        debug_assert!(delay != 0, "arming interval timer with zero delay");
        self.send(Command::Arm(Duration::from_micros(delay)))
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.send(Command::Disarm)
    }

    fn uninstall(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The thread may have died already, then there is nothing left
            // to stop.
            _ = worker.commands.send(Command::Shutdown);
            _ = worker.handle.join();
        }
    }
}

/// Wakeup thread: wait for the programmed deadline or the next command.
fn run_worker(commands: &Receiver<Command>) {
    let mut deadline: Option<Instant> = None;
    loop {
        let command = match deadline {
            Some(when) => {
                let timeout = when.saturating_duration_since(Instant::now());
                match commands.recv_timeout(timeout) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        // At most one notification per program.
                        deadline = None;
                        timers::request_reschedule();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };
        match command {
            Command::Arm(delay) => deadline = Some(Instant::now() + delay),
            Command::Disarm => deadline = None,
            Command::Shutdown => return,
        }
    }
}
