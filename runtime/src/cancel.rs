//! Cooperative cancellation and deadline-bounded blocking calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared flag checked by long-running stages between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Runs `f` on a dedicated thread named `name` and waits at most `timeout`,
/// polling `token` while waiting. On timeout or cancellation the thread is
/// left to finish on its own and its result is dropped.
pub fn run_with_deadline<F, T>(
    name: &str,
    timeout: Duration,
    token: &CancellationToken,
    f: F,
) -> Result<DeadlineOutcome<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("pano-{name}"))
        .spawn(move || {
            // receiver may be gone after a timeout
            let _ = tx.send(f());
        })
        .map_err(|e| Error::Spawn(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    loop {
        if token.is_cancelled() {
            debug!(worker = name, "cancelled while waiting");
            return Ok(DeadlineOutcome::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(worker = name, ?timeout, "deadline exceeded, result discarded");
            return Ok(DeadlineOutcome::TimedOut);
        }
        match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(value) => return Ok(DeadlineOutcome::Completed(value)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(Error::WorkerLost(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_work_completes() {
        let token = CancellationToken::new();
        let out = run_with_deadline("unit", Duration::from_secs(5), &token, || 21 * 2).unwrap();
        assert_eq!(out, DeadlineOutcome::Completed(42));
    }

    #[test]
    fn slow_work_times_out() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let out = run_with_deadline("slow", Duration::from_millis(30), &token, || {
            thread::sleep(Duration::from_millis(500));
            1
        })
        .unwrap();
        assert_eq!(out, DeadlineOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn cancellation_is_observed_while_waiting() {
        let token = CancellationToken::new();
        let remote = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let out = run_with_deadline("cancel", Duration::from_secs(5), &token, || {
            thread::sleep(Duration::from_millis(500));
        })
        .unwrap();
        assert_eq!(out, DeadlineOutcome::Cancelled);
        assert!(token.is_cancelled());
    }

    #[test]
    fn panicking_worker_is_reported() {
        let token = CancellationToken::new();
        let out = run_with_deadline::<_, ()>("boom", Duration::from_secs(5), &token, || panic!("boom"));
        assert_eq!(out, Err(Error::WorkerLost("boom".into())));
    }
}
