//! Burst flush timers.
//!
//! The `FlushScheduler` runs one background task per burst-mode group.
//! Each task calls its tick callback once per interval until the group's
//! timer is replaced, removed, or the scheduler shuts down.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  FlushScheduler                                                 │
//! │  ├── runtime: tokio Handle captured when the session opened     │
//! │  ├── timers: HashMap<group, BurstTimer>                         │
//! │  │   └── interval task per burst group, own CancellationToken   │
//! │  └── shutdown: CancellationToken (parent of every timer token)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Continuous writes never go through the scheduler; they happen inline on
//! the submitting thread.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GroupSettings;

struct BurstTimer {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BurstTimer {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Owner of the per-group burst timers.
pub struct FlushScheduler {
    runtime: Handle,
    shutdown: CancellationToken,
    timers: Mutex<HashMap<String, BurstTimer>>,
}

impl FlushScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            shutdown: CancellationToken::new(),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Make the group's timer match `settings`.
    ///
    /// Starts a timer when burst mode is active, restarts it when the
    /// interval changed, stops it when burst mode is off. Returns whether a
    /// timer is running afterwards.
    pub fn schedule<F>(&self, group: &str, settings: &GroupSettings, tick: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        if !settings.burst_active() || self.shutdown.is_cancelled() {
            self.unschedule(group);
            return false;
        }

        let interval = settings.burst_interval();
        let mut timers = self.timers.lock();
        if let Some(existing) = timers.get(group) {
            if existing.interval == interval && !existing.handle.is_finished() {
                return true;
            }
        }

        let cancel = self.shutdown.child_token();
        let task_cancel = cancel.clone();
        let name = group.to_string();
        let handle = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => tick(),
                }
            }
            debug!(group = %name, "Burst timer stopped");
        });

        debug!(group, ?interval, "Burst timer started");
        if let Some(previous) = timers.insert(
            group.to_string(),
            BurstTimer {
                interval,
                cancel,
                handle,
            },
        ) {
            previous.stop();
        }
        true
    }

    /// Stop the group's timer. Returns `false` if it had none.
    pub fn unschedule(&self, group: &str) -> bool {
        let timer = self.timers.lock().remove(group);
        match timer {
            Some(timer) => {
                timer.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, group: &str) -> bool {
        self.timers.lock().contains_key(group)
    }

    pub fn scheduled_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// Stop every timer; later `schedule` calls are refused.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let timers: Vec<_> = self.timers.lock().drain().collect();
        for (_, timer) in timers {
            timer.stop();
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
