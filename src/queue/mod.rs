//! Deduplicating, serialized work queue.
//!
//! Producers call [`Queue::enqueue`] from anywhere; a single consumer task
//! started by [`Queue::start`] hands items to the worker one at a time,
//! pausing `item_delay` between items to stay under downstream rate limits.
//! At most one item per dedup key is admitted at any moment.

pub mod inflight;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::model::{EnqueueOutcome, Outcome, WorkItem};
use crate::telemetry::metrics::{QueueMetrics, QueueStats};
use crate::telemetry::work::{record_outcome, start_item_span};

pub use inflight::InFlightSet;

/// Boxed future returned by a worker: `Ok(true)` success, `Ok(false)` soft
/// failure, `Err` hard error.
pub type WorkerFuture = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>;

/// Type-erased worker function.
pub type WorkerFn<T> = Arc<dyn Fn(CancellationToken, T) -> WorkerFuture + Send + Sync>;

/// Box an async closure into a [`WorkerFn`].
pub fn worker_fn<T, F, Fut>(f: F) -> WorkerFn<T>
where
    T: 'static,
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(move |cancel: CancellationToken, item: T| -> WorkerFuture {
        Box::pin(f(cancel, item))
    })
}

/// An admitted item on its way to the worker.
struct Queued<T> {
    key: String,
    labels: Vec<KeyValue>,
    item: T,
}

struct Inner<T: WorkItem> {
    sender: mpsc::Sender<Queued<T>>,
    receiver: Mutex<Option<mpsc::Receiver<Queued<T>>>>,
    in_flight: InFlightSet,
    worker: RwLock<WorkerFn<T>>,
    metrics: QueueMetrics,
    item_delay: Duration,
}

/// Handle to the queue. Cheap to clone; all clones share one queue.
pub struct Queue<T: WorkItem> {
    inner: Arc<Inner<T>>,
}

impl<T: WorkItem> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: WorkItem> Queue<T> {
    pub fn new<F, Fut>(worker: F, metrics: QueueMetrics, config: &QueueConfig) -> Self
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::with_worker_fn(worker_fn(worker), metrics, config)
    }

    pub fn with_worker_fn(worker: WorkerFn<T>, metrics: QueueMetrics, config: &QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: Mutex::new(Some(receiver)),
                in_flight: InFlightSet::new(),
                worker: RwLock::new(worker),
                metrics,
                item_delay: config.item_delay,
            }),
        }
    }

    /// Replace the worker used for items dequeued from now on.
    pub fn set_worker<F, Fut>(&self, worker: F)
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        *self
            .inner
            .worker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = worker_fn(worker);
    }

    /// Spawn the single consumer task. It runs until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on any call after the first.
    pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyStarted)?;

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move { inner.consume(receiver, cancel).await }))
    }

    /// Admit and queue an item. Never blocks and never fails.
    ///
    /// Duplicates of an in-flight key are skipped; if the channel is full
    /// the admission is released and the item dropped.
    pub fn enqueue(&self, item: T) -> EnqueueOutcome {
        let inner = &self.inner;
        let key = item.key();
        let labels = item.labels();

        if !inner.in_flight.try_admit(&key) {
            inner.metrics.item_skipped(&labels);
            debug!(%key, "check already in progress, skipping");
            return EnqueueOutcome::Skipped;
        }

        inner.metrics.item_pending();
        match inner.sender.try_send(Queued {
            key,
            labels: labels.clone(),
            item,
        }) {
            Ok(()) => {
                inner.metrics.item_queued(&labels);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(queued)) => {
                inner.in_flight.release(&queued.key);
                inner.metrics.item_dropped(&labels, "queue_full");
                warn!(key = %queued.key, "queue full, dropping check");
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(queued)) => {
                inner.in_flight.release(&queued.key);
                inner.metrics.item_dropped(&labels, "queue_closed");
                debug!(key = %queued.key, "queue stopped, dropping check");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Number of items waiting on the channel.
    pub fn len(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of admitted keys not yet released.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.in_flight.contains(key)
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.metrics.snapshot()
    }
}

impl<T: WorkItem> Inner<T> {
    async fn consume(&self, mut receiver: mpsc::Receiver<Queued<T>>, cancel: CancellationToken) {
        info!(delay_ms = self.item_delay.as_millis() as u64, "queue consumer started");

        loop {
            let queued = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };

            self.process(queued, &cancel).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.item_delay) => {}
            }
        }

        // Stragglers are discarded, never processed.
        receiver.close();
        let mut discarded = 0usize;
        while let Ok(queued) = receiver.try_recv() {
            self.metrics.item_dequeued();
            self.in_flight.release(&queued.key);
            discarded += 1;
        }

        info!(discarded, "queue consumer stopped");
    }

    async fn process(&self, queued: Queued<T>, cancel: &CancellationToken) {
        let Queued { key, labels, item } = queued;
        self.metrics.item_dequeued();

        let run_id = Uuid::new_v4();
        let span = start_item_span(&key, &run_id);
        let worker = self.worker.read().unwrap_or_else(PoisonError::into_inner).clone();

        let started = Instant::now();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { worker(token, item).await }.instrument(span.clone()));

        let outcome = match handle.await {
            Ok(Ok(true)) => Outcome::Succeeded,
            Ok(Ok(false)) => Outcome::SoftFailure,
            Ok(Err(e)) => Outcome::HardError {
                error_type: "worker_error",
                message: format!("{e:#}"),
            },
            Err(e) if e.is_panic() => Outcome::HardError {
                error_type: "worker_panic",
                message: panic_message(e.into_panic()),
            },
            Err(e) => Outcome::HardError {
                error_type: "worker_aborted",
                message: e.to_string(),
            },
        };
        let elapsed = started.elapsed();

        self.metrics.item_processed(&labels, &outcome, elapsed);
        record_outcome(&span, &outcome);

        span.in_scope(|| match &outcome {
            Outcome::Succeeded => {
                debug!(%key, elapsed_ms = elapsed.as_millis() as u64, "check processed");
            }
            Outcome::SoftFailure => {
                info!(%key, elapsed_ms = elapsed.as_millis() as u64, "check had nothing to report");
            }
            Outcome::HardError { error_type, message } => {
                error!(
                    %key,
                    error_type,
                    error = %message,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "failed to process check"
                );
            }
        });

        self.in_flight.release(&key);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
