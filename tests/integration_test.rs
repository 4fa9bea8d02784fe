//! End-to-end: scheduled jobs feeding the deduplicating queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pulse_rs::checks::CheckRegistry;
use pulse_rs::config::QueueConfig;
use pulse_rs::model::{CheckAlert, WorkItem};
use pulse_rs::queue::Queue;
use pulse_rs::scheduler::Scheduler;
use pulse_rs::telemetry::metrics::{QueueMetrics, SchedulerMetrics};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn scheduled_checks_flow_through_the_queue() {
    let registry = CheckRegistry::from_checks([
        CheckAlert::new("hoodi", "geth", "* * * * *"),
        CheckAlert::new("hoodi", "besu", "* * * * *"),
        CheckAlert {
            enabled: false,
            ..CheckAlert::new("hoodi", "erigon", "* * * * *")
        },
    ])
    .unwrap();

    let config = QueueConfig {
        item_delay: Duration::from_secs(1),
        namespace: "e2e".to_string(),
        ..Default::default()
    };
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let queue = Queue::new(
        move |_, _: CheckAlert| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(true)
            }
        },
        QueueMetrics::new(&config.namespace),
        &config,
    );

    let cancel = CancellationToken::new();
    let consumer = queue.start(cancel.clone()).unwrap();
    let scheduler = Scheduler::new(&cancel, SchedulerMetrics::new("e2e"));
    for check in registry.enabled() {
        let queue = queue.clone();
        let alert = check.clone();
        scheduler
            .add_job(format!("check-{}", check.key()), &check.schedule, move |_| {
                queue.enqueue(alert.clone());
                async move { anyhow::Ok(()) }
            })
            .unwrap();
    }
    assert_eq!(scheduler.job_names(), vec!["check-hoodi-besu", "check-hoodi-geth"]);

    // One minute tick plus the inter-item delay for both checks.
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(processed.load(Ordering::SeqCst) >= 2);
    assert!(!queue.is_in_flight("hoodi-erigon"));

    cancel.cancel();
    consumer.await.unwrap();
    assert_eq!(scheduler.stats().failures, 0);
    assert_eq!(queue.stats().hard_errors, 0);
}
