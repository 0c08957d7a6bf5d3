//! Cancellable periodic timer thread for look-ahead schedulers

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::debug;

/// Runs `tick` every `interval` until cancelled
pub struct LookAheadTimer {
    name: String,
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LookAheadTimer {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                tick();
                match cancel_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Cancelled or the handle was dropped
                    _ => break,
                }
            }
        })?;

        debug!(timer = name, ?interval, "Look-ahead timer started");
        Ok(Self {
            name: name.to_string(),
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the timer and wait for an in-flight tick to finish
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(timer = %self.name, "Look-ahead timer cancelled");
        }
    }
}

impl Drop for LookAheadTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_no_ticks_after_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut timer = LookAheadTimer::spawn("test-timer", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        timer.cancel();
        assert!(!timer.is_active());

        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 1);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);

        timer.cancel();
    }
}
