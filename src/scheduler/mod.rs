//! Cron-driven recurring job registry.
//!
//! Every job gets its own timer task. Ticks are always computed forward from
//! the current wall-clock time, so ticks missed while the process stalled
//! collapse into a single late firing. Callbacks are spawned, so a slow
//! callback never delays the timer; serializing the actual work is left to
//! the queue's dedup gate.

pub mod schedule;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::metrics::{JobRun, SchedulerMetrics, SchedulerStats};
use crate::telemetry::work::start_tick_span;

pub use schedule::Schedule;

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased job callback.
pub type JobFn = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Wall-clock source used to compute ticks. Defaults to [`Utc::now`].
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A registered job and the token that stops its timer.
struct Job {
    schedule: Schedule,
    token: CancellationToken,
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, Job>>,
    metrics: SchedulerMetrics,
    cancel: CancellationToken,
    clock: Clock,
}

impl Scheduler {
    /// Create a scheduler whose jobs stop when `parent` is cancelled.
    pub fn new(parent: &CancellationToken, metrics: SchedulerMetrics) -> Self {
        Self::with_clock(parent, metrics, Arc::new(Utc::now))
    }

    /// Like [`Scheduler::new`], reading wall-clock time from `clock`.
    pub fn with_clock(parent: &CancellationToken, metrics: SchedulerMetrics, clock: Clock) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            metrics,
            cancel: parent.child_token(),
            clock,
        }
    }

    /// Register `callback` to run on every tick of `cron_expr`.
    ///
    /// Re-using a name replaces the previous job; its timer is cancelled
    /// first. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCron`] if the expression does not parse, and
    /// [`Error::SchedulerStopped`] once the scheduler or its parent token has
    /// been cancelled. Nothing is registered in either case.
    pub fn add_job<F, Fut>(&self, name: impl Into<String>, cron_expr: &str, callback: F) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let schedule = Schedule::parse(cron_expr)?;
        let callback: JobFn =
            Arc::new(move |token: CancellationToken| -> JobFuture { Box::pin(callback(token)) });
        let token = self.cancel.child_token();

        let replaced = {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            // Checked under the lock so a concurrent stop() drains what we insert.
            if self.cancel.is_cancelled() {
                return Err(Error::SchedulerStopped(name));
            }
            let previous = jobs.insert(
                name.clone(),
                Job {
                    schedule: schedule.clone(),
                    token: token.clone(),
                },
            );
            if let Some(previous) = &previous {
                previous.token.cancel();
            }
            previous.is_some()
        };

        self.metrics.job_registered(schedule.as_str(), replaced);
        info!(job = %name, schedule = %schedule, replaced, "job registered");

        tokio::spawn(run_timer(
            name,
            schedule,
            callback,
            token,
            self.metrics.clone(),
            Arc::clone(&self.clock),
        ));
        Ok(())
    }

    /// Cancel a job's future ticks. Unknown names are ignored.
    pub fn remove_job(&self, name: &str) {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        if let Some(job) = removed {
            job.token.cancel();
            self.metrics.job_removed();
            info!(job = %name, "job removed");
        }
    }

    /// Cancel every job.
    pub fn stop(&self) {
        self.cancel.cancel();
        let drained: Vec<_> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for _ in &drained {
            self.metrics.job_removed();
        }
        info!(jobs = drained.len(), "scheduler stopped");
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Next time the named job will fire, if it is registered.
    pub fn next_fire(&self, name: &str) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(name)?.schedule.next_after(&(self.clock)())
    }

    /// Cron expression the named job runs on.
    pub fn schedule_of(&self, name: &str) -> Option<String> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(name).map(|job| job.schedule.as_str().to_string())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.metrics.snapshot()
    }

    /// Most recent firing of the named job.
    pub fn last_run(&self, name: &str) -> Option<JobRun> {
        self.metrics.last_run(name)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_timer(
    name: String,
    schedule: Schedule,
    callback: JobFn,
    token: CancellationToken,
    metrics: SchedulerMetrics,
    clock: Clock,
) {
    let mut from = clock();

    loop {
        let Some(next) = schedule.next_after(&from) else {
            warn!(job = %name, schedule = %schedule, "schedule has no future ticks");
            break;
        };
        let wait = (next - clock()).to_std().unwrap_or(Duration::ZERO);
        debug!(job = %name, next = %next, "waiting for next tick");

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // After a stall `now` is past `next`; every tick in between is skipped.
        from = next.max(clock());
        tokio::spawn(fire(
            name.clone(),
            schedule.as_str().to_string(),
            next,
            Arc::clone(&callback),
            token.clone(),
            metrics.clone(),
            Arc::clone(&clock),
        ));
    }

    debug!(job = %name, "job timer stopped");
}

async fn fire(
    name: String,
    schedule: String,
    tick: DateTime<Utc>,
    callback: JobFn,
    token: CancellationToken,
    metrics: SchedulerMetrics,
    clock: Clock,
) {
    let span = start_tick_span(&name, &schedule);
    let started_at = clock();
    let started = Instant::now();
    let task = tokio::spawn(async move { callback(token).await }.instrument(span.clone()));
    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("job task ended abnormally: {e}")),
    };
    let elapsed = started.elapsed();

    metrics.job_executed(&name, &schedule, tick, started_at, elapsed, result.is_err());
    if let Err(e) = result {
        let message = format!("{e:#}");
        span.in_scope(|| error!(job = %name, error = %message, "job failed"));
    }
}
