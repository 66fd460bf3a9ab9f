use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BUDGET: Duration = Duration::from_secs(60);

/// Shared "out of time" flag. Set once, never cleared.
#[derive(Debug, Clone, Default)]
pub struct DeadlineFlag(Arc<AtomicBool>);

impl DeadlineFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// One-shot background timer that trips a [`DeadlineFlag`] when the budget
/// runs out. It never interrupts work in progress; the coordinator polls the
/// flag between records.
pub struct DeadlineGuard {
    flag: DeadlineFlag,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    pub fn arm(budget: Duration) -> Self {
        let flag = DeadlineFlag::new();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let timer_flag = flag.clone();
        let handle = thread::spawn(move || match stop_rx.recv_timeout(budget) {
            Ok(_) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(budget_ms = budget.as_millis() as u64, "batch deadline reached");
                timer_flag.trip();
            }
        });
        Self {
            flag,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn flag(&self) -> DeadlineFlag {
        self.flag.clone()
    }

    pub fn expired(&self) -> bool {
        self.flag.expired()
    }

    /// Stops the timer without tripping the flag.
    pub fn disarm(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
