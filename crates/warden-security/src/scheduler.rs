// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background schedules — fixed-interval tokio tasks sharing one
// cancellation token.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest period a schedule will tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owns a set of interval tasks. Dropping the scheduler cancels them.
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// An empty scheduler with a fresh cancellation token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    ///
    /// A zero period is raised to one millisecond. Must be called from
    /// within a tokio runtime.
    pub fn spawn_every<F>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        if period < MIN_PERIOD {
            warn!(task = name, "schedule period below minimum; clamped");
        }
        let period = period.max(MIN_PERIOD);
        let token = self.token.child_token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(task = name, "schedule cancelled");
                        break;
                    }
                    _ = interval.tick() => tick(),
                }
            }
        });
        debug!(task = name, period_secs = period.as_secs(), "schedule started");
        self.tasks.push(handle);
    }

    /// Number of tasks started and not yet shut down.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True once [`shutdown`](Self::shutdown) has drained the tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether the tasks have been told to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal every task to stop without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for every task to finish.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        for handle in self.tasks.drain(..) {
            let _ = handle.await;
        }
        info!("background schedules stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
