//! Level-triggered readiness signals used by the blocking channel.
//!
//! A [`Signal`] records that something has happened since it was last
//! cleared. Waiters re-check their own predicate after every wake, so a raise
//! that lands between the check and the wait is never lost as long as nobody
//! clears the signal in between. This holds with one waiter per signal, which
//! is the single-producer/single-consumer contract of the channel.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Result of waiting on a [`Signal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The signal was raised.
    Ok,
    /// The deadline passed before the signal was raised.
    TimedOut,
}

#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal and wakes every waiter.
    pub fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.raised.lock() = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Blocks until the signal is raised or `deadline` passes. `None` waits
    /// without a deadline.
    pub fn wait_until(&self, deadline: Option<Instant>) -> WaitResult {
        let mut raised = self.raised.lock();
        while !*raised {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut raised, deadline).timed_out() {
                        return if *raised {
                            WaitResult::Ok
                        } else {
                            WaitResult::TimedOut
                        };
                    }
                }
                None => self.cond.wait(&mut raised),
            }
        }
        WaitResult::Ok
    }

    pub fn wait_for(&self, timeout: Duration) -> WaitResult {
        self.wait_until(deadline_after(timeout))
    }
}

/// Converts a relative timeout into a deadline; `None` when it does not fit
/// in an `Instant` (effectively forever).
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn raised_signal_returns_immediately() {
        let signal = Signal::new();
        signal.raise();
        assert!(signal.is_raised());
        assert_eq!(signal.wait_for(Duration::ZERO), WaitResult::Ok);
        signal.clear();
        assert!(!signal.is_raised());
    }

    #[test]
    fn cleared_signal_times_out() {
        let signal = Signal::new();
        let start = Instant::now();
        assert_eq!(
            signal.wait_for(Duration::from_millis(20)),
            WaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn raise_from_another_thread_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let raiser = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            raiser.raise();
        });
        assert_eq!(signal.wait_until(None), WaitResult::Ok);
        handle.join().unwrap();
    }

    #[test]
    fn huge_timeout_has_no_deadline() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_secs(1)).is_some());
    }
}
