use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Elapsed connected time, counted in whole ticks.
pub struct CallDurationTimer {
    seconds: Arc<AtomicU64>,
    tick: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallDurationTimer {
    pub fn new(tick: Duration) -> Self {
        CallDurationTimer {
            seconds: Arc::new(AtomicU64::new(0)),
            tick,
            task: Mutex::new(None),
        }
    }

    /// Start counting. Returns `false` if the timer is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let seconds = self.seconds.clone();
        let tick = self.tick;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                seconds.fetch_add(1, Ordering::SeqCst);
            }
        }));
        true
    }

    /// Stop counting and return the value reached before the reset.
    pub fn reset(&self) -> u64 {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.seconds.swap(0, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }

    pub fn formatted(&self) -> String {
        format_duration(self.elapsed_seconds())
    }
}

impl Drop for CallDurationTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// `mm:ss`; minutes keep growing past 99.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
