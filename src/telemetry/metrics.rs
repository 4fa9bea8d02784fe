//! Metric recorders for the queue and the scheduler.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Instruments are named `{namespace}.queue.*` / `{namespace}.scheduler.*`.
//! Each recorder also keeps process-local totals readable via `snapshot()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};

use crate::model::Outcome;

/// Returns the shared meter for pulse-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("pulse-rs")
}

const QUEUE_DURATION_BUCKETS: [f64; 7] = [1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];
const JOB_DURATION_BUCKETS: [f64; 7] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Point-in-time copy of the queue totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub soft_failures: u64,
    pub hard_errors: u64,
    pub queue_length: i64,
}

impl QueueStats {
    /// Items that reached the worker, whatever the outcome.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.soft_failures + self.hard_errors
    }
}

#[derive(Debug, Default)]
struct QueueTotals {
    queued: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    soft_failures: AtomicU64,
    hard_errors: AtomicU64,
    queue_length: AtomicI64,
}

/// Instruments for queue admission and processing.
#[derive(Clone)]
pub struct QueueMetrics {
    queued_total: Counter<u64>,
    processed_total: Counter<u64>,
    failures_total: Counter<u64>,
    skipped_total: Counter<u64>,
    queue_length: UpDownCounter<i64>,
    processing_duration: Histogram<f64>,
    totals: Arc<QueueTotals>,
}

impl QueueMetrics {
    pub fn new(namespace: &str) -> Self {
        let meter = meter();
        Self {
            queued_total: meter
                .u64_counter(format!("{namespace}.queue.checks_queued_total"))
                .with_description("Total number of checks queued")
                .build(),
            processed_total: meter
                .u64_counter(format!("{namespace}.queue.checks_processed_total"))
                .with_description("Total number of checks processed")
                .build(),
            failures_total: meter
                .u64_counter(format!("{namespace}.queue.checks_failures_total"))
                .with_description("Total number of check failures")
                .build(),
            skipped_total: meter
                .u64_counter(format!("{namespace}.queue.checks_skipped_total"))
                .with_description("Number of checks skipped because one was already in flight")
                .build(),
            queue_length: meter
                .i64_up_down_counter(format!("{namespace}.queue.length_current"))
                .with_description("Current number of checks in queue")
                .build(),
            processing_duration: meter
                .f64_histogram(format!("{namespace}.queue.check_processing_duration_seconds"))
                .with_description("Time taken to process checks")
                .with_unit("s")
                .with_boundaries(QUEUE_DURATION_BUCKETS.to_vec())
                .build(),
            totals: Arc::new(QueueTotals::default()),
        }
    }

    /// Counts an item toward the queue length before it is pushed, so the
    /// consumer's decrement can never run first.
    pub fn item_pending(&self) {
        self.queue_length.add(1, &[]);
        self.totals.queue_length.fetch_add(1, Ordering::Relaxed);
    }

    pub fn item_queued(&self, labels: &[KeyValue]) {
        self.queued_total.add(1, labels);
        self.totals.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn item_skipped(&self, labels: &[KeyValue]) {
        self.skipped_total.add(1, labels);
        self.totals.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Pending item that never made it onto the channel.
    pub fn item_dropped(&self, labels: &[KeyValue], reason: &'static str) {
        self.queue_length.add(-1, &[]);
        self.totals.queue_length.fetch_sub(1, Ordering::Relaxed);
        self.failures_total.add(1, &with_label(labels, KeyValue::new("error_type", reason)));
        self.totals.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn item_dequeued(&self) {
        self.queue_length.add(-1, &[]);
        self.totals.queue_length.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn item_processed(&self, labels: &[KeyValue], outcome: &Outcome, elapsed: Duration) {
        self.processing_duration.record(elapsed.as_secs_f64(), labels);
        self.processed_total.add(1, &with_label(labels, KeyValue::new("status", outcome.status())));

        let counter = match outcome {
            Outcome::Succeeded => &self.totals.succeeded,
            Outcome::SoftFailure => &self.totals.soft_failures,
            Outcome::HardError { error_type, .. } => {
                let labels = with_label(labels, KeyValue::new("error_type", *error_type));
                self.failures_total.add(1, &labels);
                &self.totals.hard_errors
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStats {
        let t = &self.totals;
        QueueStats {
            queued: t.queued.load(Ordering::Relaxed),
            skipped: t.skipped.load(Ordering::Relaxed),
            dropped: t.dropped.load(Ordering::Relaxed),
            succeeded: t.succeeded.load(Ordering::Relaxed),
            soft_failures: t.soft_failures.load(Ordering::Relaxed),
            hard_errors: t.hard_errors.load(Ordering::Relaxed),
            queue_length: t.queue_length.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Point-in-time copy of the scheduler totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub registered: u64,
    pub active_jobs: i64,
    pub executions: u64,
    pub failures: u64,
}

/// What was recorded for a job's most recent firing.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub schedule: String,
    /// Cron tick the firing was for.
    pub tick: DateTime<Utc>,
    /// Wall-clock time the callback started; exported as the last-execution timestamp.
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub failed: bool,
    /// Attributes attached to the execution and failure counters.
    pub labels: Vec<KeyValue>,
}

#[derive(Debug, Default)]
struct SchedulerTotals {
    registered: AtomicU64,
    active_jobs: AtomicI64,
    executions: AtomicU64,
    failures: AtomicU64,
    last_runs: Mutex<HashMap<String, JobRun>>,
}

/// Instruments for job registration and execution.
#[derive(Clone)]
pub struct SchedulerMetrics {
    jobs_total: Counter<u64>,
    job_executions: Counter<u64>,
    job_failures: Counter<u64>,
    active_jobs: UpDownCounter<i64>,
    execution_duration: Histogram<f64>,
    last_execution: Gauge<f64>,
    totals: Arc<SchedulerTotals>,
}

impl SchedulerMetrics {
    pub fn new(namespace: &str) -> Self {
        let meter = meter();
        Self {
            jobs_total: meter
                .u64_counter(format!("{namespace}.scheduler.jobs_total"))
                .with_description("Total number of jobs registered")
                .build(),
            job_executions: meter
                .u64_counter(format!("{namespace}.scheduler.job_executions_total"))
                .with_description("Total number of job executions")
                .build(),
            job_failures: meter
                .u64_counter(format!("{namespace}.scheduler.job_failures_total"))
                .with_description("Total number of job failures")
                .build(),
            active_jobs: meter
                .i64_up_down_counter(format!("{namespace}.scheduler.active_jobs"))
                .with_description("Current number of active jobs")
                .build(),
            execution_duration: meter
                .f64_histogram(format!("{namespace}.scheduler.job_execution_duration_seconds"))
                .with_description("Time taken to execute jobs")
                .with_unit("s")
                .with_boundaries(JOB_DURATION_BUCKETS.to_vec())
                .build(),
            last_execution: meter
                .f64_gauge(format!("{namespace}.scheduler.job_last_execution_timestamp"))
                .with_description("Unix timestamp of the last job execution")
                .build(),
            totals: Arc::new(SchedulerTotals::default()),
        }
    }

    /// A job was added. `replaced` is true when an existing name was overwritten.
    pub fn job_registered(&self, schedule: &str, replaced: bool) {
        self.jobs_total.add(1, &[KeyValue::new("schedule", schedule.to_string())]);
        self.totals.registered.fetch_add(1, Ordering::Relaxed);
        if !replaced {
            self.active_jobs.add(1, &[]);
            self.totals.active_jobs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn job_removed(&self) {
        self.active_jobs.add(-1, &[]);
        self.totals.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one firing of `name`.
    pub fn job_executed(
        &self,
        name: &str,
        schedule: &str,
        tick: DateTime<Utc>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        failed: bool,
    ) {
        let labels = vec![
            KeyValue::new("name", name.to_string()),
            KeyValue::new("schedule", schedule.to_string()),
        ];
        self.job_executions.add(1, &labels);
        self.execution_duration.record(elapsed.as_secs_f64(), &labels[..1]);
        self.last_execution.record(started_at.timestamp() as f64, &labels);
        self.totals.executions.fetch_add(1, Ordering::Relaxed);

        if failed {
            self.job_failures.add(1, &labels);
            self.totals.failures.fetch_add(1, Ordering::Relaxed);
        }

        let run = JobRun {
            schedule: schedule.to_string(),
            tick,
            started_at,
            elapsed,
            failed,
            labels,
        };
        self.totals
            .last_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), run);
    }

    /// Most recent firing of `name`, if it has fired.
    pub fn last_run(&self, name: &str) -> Option<JobRun> {
        let runs = self.totals.last_runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(name).cloned()
    }

    pub fn snapshot(&self) -> SchedulerStats {
        let t = &self.totals;
        SchedulerStats {
            registered: t.registered.load(Ordering::Relaxed),
            active_jobs: t.active_jobs.load(Ordering::Relaxed),
            executions: t.executions.load(Ordering::Relaxed),
            failures: t.failures.load(Ordering::Relaxed),
        }
    }
}

fn with_label(labels: &[KeyValue], extra: KeyValue) -> Vec<KeyValue> {
    let mut all = Vec::with_capacity(labels.len() + 1);
    all.extend_from_slice(labels);
    all.push(extra);
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<KeyValue> {
        vec![
            KeyValue::new("network", "net1"),
            KeyValue::new("client", "client1"),
        ]
    }

    #[test]
    fn queue_totals_follow_recorded_events() {
        let metrics = QueueMetrics::new("test");
        metrics.item_pending();
        metrics.item_queued(&labels());
        metrics.item_pending();
        metrics.item_queued(&labels());
        metrics.item_skipped(&labels());
        metrics.item_dequeued();
        metrics.item_processed(&labels(), &Outcome::Succeeded, Duration::from_millis(5));
        metrics.item_dequeued();
        metrics.item_processed(
            &labels(),
            &Outcome::HardError {
                error_type: "worker_error",
                message: "boom".into(),
            },
            Duration::from_millis(5),
        );
        metrics.item_pending();
        metrics.item_dropped(&labels(), "queue_full");

        let stats = metrics.snapshot();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.hard_errors, 1);
        assert_eq!(stats.processed(), 2);
        assert_eq!(stats.queue_length, 0);
    }

    #[test]
    fn queue_length_never_goes_negative_when_consumer_wins() {
        let metrics = QueueMetrics::new("test");
        metrics.item_pending();
        // Consumer dequeues before the producer records the push.
        metrics.item_dequeued();
        assert_eq!(metrics.snapshot().queue_length, 0);
        metrics.item_queued(&labels());
        assert_eq!(metrics.snapshot().queue_length, 0);
        assert_eq!(metrics.snapshot().queued, 1);
    }

    #[test]
    fn dropped_item_gives_back_its_length_slot() {
        let metrics = QueueMetrics::new("test");
        metrics.item_pending();
        assert_eq!(metrics.snapshot().queue_length, 1);
        metrics.item_dropped(&labels(), "queue_closed");
        assert_eq!(metrics.snapshot().queue_length, 0);
        assert_eq!(metrics.snapshot().dropped, 1);
    }

    #[test]
    fn replacing_a_job_does_not_grow_active_jobs() {
        let metrics = SchedulerMetrics::new("test");
        metrics.job_registered("* * * * *", false);
        metrics.job_registered("*/5 * * * *", true);
        assert_eq!(metrics.snapshot().active_jobs, 1);
        assert_eq!(metrics.snapshot().registered, 2);

        metrics.job_removed();
        assert_eq!(metrics.snapshot().active_jobs, 0);
    }

    #[test]
    fn job_failures_are_counted_with_executions() {
        let metrics = SchedulerMetrics::new("test");
        let now = Utc::now();
        metrics.job_executed("a", "* * * * *", now, now, Duration::from_millis(1), false);
        metrics.job_executed("a", "* * * * *", now, now, Duration::from_millis(1), true);
        let stats = metrics.snapshot();
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.failures, 1);
        assert!(metrics.last_run("a").unwrap().failed);
    }

    #[test]
    fn last_run_keeps_the_latest_firing_per_job() {
        let metrics = SchedulerMetrics::new("test");
        let first = Utc::now();
        let second = first + chrono::Duration::minutes(1);
        metrics.job_executed("a", "* * * * *", first, first, Duration::from_millis(3), false);
        metrics.job_executed("a", "* * * * *", second, second, Duration::from_millis(7), false);

        let run = metrics.last_run("a").unwrap();
        assert_eq!(run.tick, second);
        assert_eq!(run.elapsed, Duration::from_millis(7));
        assert!(metrics.last_run("b").is_none());
    }
}
