//! # Liveness Monitor
//!
//! A periodic task that asks the coordinator to sweep for stale heartbeats.
//! The task itself holds no state: every tick is turned into a
//! `CoordRequest::Sweep` and queued behind the other requests, so expiry is
//! serialized with attach, departure and publish like any other event.
//!
//! Two states, STOPPED and RUNNING. The coordinator starts the task on the
//! first attach and cancels it as soon as the registry is empty. The task
//! holds only a weak sender so it never keeps the request loop alive.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::handle::CoordRequest;

/// Handle on the sweep task; at most one task runs at a time.
#[derive(Debug)]
pub struct LivenessMonitor {
    interval: Duration,
    task: Option<CancellationToken>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// STOPPED -> RUNNING. Spawns the ticking task unless one is already
    /// running; returns whether a task was started. Must be called from
    /// within a tokio runtime.
    pub fn ensure_running(&mut self, requests: &WeakUnboundedSender<CoordRequest>) -> bool {
        if self.task.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let requests = requests.clone();
        let period = self.interval;

        tokio::spawn(async move {
            // First sweep one full period after start, not immediately.
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        log::debug!("Liveness monitor cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(tx) = requests.upgrade() else {
                            break;
                        };
                        if tx.send(CoordRequest::Sweep).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.task = Some(token);
        log::info!(
            "Liveness monitor started (every {} ms)",
            self.interval.as_millis()
        );
        true
    }

    /// RUNNING -> STOPPED. Returns whether a running task was cancelled.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(token) => {
                token.cancel();
                log::info!("Liveness monitor stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.task.take() {
            token.cancel();
        }
    }
}
