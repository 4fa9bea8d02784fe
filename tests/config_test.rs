use std::time::Duration;

use pulse_rs::config::Config;
use secrecy::ExposeSecret;

const VARS: [&str; 4] = [
    "PULSE_QUEUE_CAPACITY",
    "PULSE_QUEUE_DELAY_MS",
    "PULSE_METRICS_NAMESPACE",
    "PULSE_WEBHOOK_URL",
];

fn clear() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

// Env vars are process-global, so every case runs in one test.
#[test]
fn config_from_env() {
    clear();
    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_capacity, 100);
    assert_eq!(config.item_delay, Duration::from_secs(2));
    assert_eq!(config.metrics_namespace, "pulse");
    assert!(config.webhook_url.is_none());
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("PULSE_QUEUE_CAPACITY", "10");
        std::env::set_var("PULSE_QUEUE_DELAY_MS", "250");
        std::env::set_var("PULSE_METRICS_NAMESPACE", "panda");
        std::env::set_var("PULSE_WEBHOOK_URL", "https://hooks.example/abc");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_capacity, 10);
    assert_eq!(config.item_delay, Duration::from_millis(250));
    assert_eq!(
        config.webhook_url.as_ref().unwrap().expose_secret(),
        "https://hooks.example/abc"
    );
    assert!(!format!("{config:?}").contains("hooks.example"));

    let queue = config.queue_config();
    assert_eq!(queue.capacity, 10);
    assert_eq!(queue.item_delay, Duration::from_millis(250));
    assert_eq!(queue.namespace, "panda");

    unsafe { std::env::set_var("PULSE_QUEUE_CAPACITY", "lots") };
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("PULSE_QUEUE_CAPACITY"));

    clear();
}
