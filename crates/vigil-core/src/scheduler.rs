// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process periodic job scheduler.
//!
//! Each job is a tokio task driven by an interval timer. Jobs are local to
//! one instance and carry no durable state; the task store is the source of
//! truth and jobs are rebuilt from it at startup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tick outcome for a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    /// Keep the job scheduled.
    Continue,
    /// Retire the job after this tick.
    Stop,
}

struct JobEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Periodic job scheduler.
///
/// One job per id; scheduling an id again replaces the previous job. Slow
/// ticks never overlap and missed ticks are skipped, so a tick that takes
/// longer than the period does not produce a burst afterwards.
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    generation: AtomicU64,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Schedule a periodic job, replacing any job with the same id.
    ///
    /// The first tick fires one period after scheduling. The job retires
    /// itself when a tick returns [`JobControl::Stop`].
    pub async fn schedule<F, Fut>(&self, job_id: &str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = JobControl> + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let jobs = self.jobs.clone();
        let id = job_id.to_string();

        let handle = {
            let jobs = jobs.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut timer = tokio::time::interval_at(start, period);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    timer.tick().await;
                    if tick().await == JobControl::Stop {
                        break;
                    }
                }

                let mut jobs = jobs.lock().await;
                // Only remove our own entry; the id may have been rescheduled
                if jobs.get(&id).is_some_and(|e| e.generation == generation) {
                    jobs.remove(&id);
                }
                debug!(job_id = %id, "Job retired");
            })
        };

        let previous = self
            .jobs
            .lock()
            .await
            .insert(id, JobEntry { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Cancel a job. Returns false when no such job is scheduled.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.lock().await.remove(job_id) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every scheduled job.
    pub async fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, entry) in jobs.drain() {
            entry.handle.abort();
        }
    }

    /// True when a job with this id is scheduled.
    pub async fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    /// Number of scheduled jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
