use std::io::Write;
use std::time::Duration;

use patient_events_notifications::NotificationChannel;
use patient_events_worker::config::loader::{load_config, load_config_with_default_path};

const FULL_CONFIG: &str = r#"
[logging]
level = "debug"

[bus]
topic = "patient-events"
audit_subscription = "audit-logs"
notification_subscription = "email-notifications"
pool_size = 4
max_delivery_count = 5
lock_duration_ms = 2000

[consumers]
concurrency = 2
idle_backoff_ms = 50

[outbox]
base_backoff_ms = 250
max_attempts = 3

[notifications]
channel = "webhook"

[notifications.provider]
webhook_url = "https://hooks.example.nhs.uk/patients"
webhook_secret = "s3cret"

[notifications.directory]
default_mailbox = "records@example.nhs.uk"

[notifications.directory.practice_mailboxes]
"North Medical Centre" = "north@example.nhs.uk"
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// Environment overrides are process-wide, so every load that could observe
// one lives in this test.
#[test]
fn test_load_file_then_env_override() {
    let file = write_config(FULL_CONFIG);
    let path = file.path().to_str().unwrap();

    let cfg = load_config(Some(path)).unwrap();
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.bus.pool_size, 4);
    assert_eq!(cfg.bus.lock_duration(), Duration::from_secs(2));
    assert_eq!(cfg.bus.subscription_options().max_delivery_count, 5);
    assert_eq!(cfg.consumers.concurrency, 2);
    assert_eq!(cfg.consumers.idle_backoff(), Duration::from_millis(50));
    assert_eq!(cfg.outbox.base_backoff(), Duration::from_millis(250));
    assert_eq!(cfg.outbox.max_attempts, 3);
    // Unset keys keep their defaults.
    assert_eq!(cfg.outbox.batch_size, 32);
    assert_eq!(cfg.processor.feed_capacity, 64);
    assert_eq!(cfg.notifications.channel, NotificationChannel::Webhook);
    assert_eq!(cfg.notifications.directory.practice_mailboxes.len(), 1);
    assert_eq!(
        cfg.notifications.directory.mailbox_for("Riverside Surgery"),
        Some("records@example.nhs.uk")
    );

    unsafe {
        std::env::set_var("PATIENT_EVENTS__CONSUMERS__CONCURRENCY", "8");
        std::env::set_var("PATIENT_EVENTS__BUS__TOPIC", "patient-events-staging");
    }
    let overridden = load_config_with_default_path(Some(file.path()));
    unsafe {
        std::env::remove_var("PATIENT_EVENTS__CONSUMERS__CONCURRENCY");
        std::env::remove_var("PATIENT_EVENTS__BUS__TOPIC");
    }

    let cfg = overridden.unwrap();
    assert_eq!(cfg.consumers.concurrency, 8);
    assert_eq!(cfg.bus.topic, "patient-events-staging");
    assert_eq!(cfg.bus.pool_size, 4);

    // A missing file falls back to defaults.
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let cfg = load_config(missing.to_str()).unwrap();
    assert_eq!(cfg.bus.topic, "patient-events");
    assert_eq!(cfg.notifications.channel, NotificationChannel::Simulated);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let cfg = patient_events_worker::AppConfig::default();

    let mut zero_concurrency = cfg.clone();
    zero_concurrency.consumers.concurrency = 0;
    assert_eq!(
        zero_concurrency.validate().unwrap_err(),
        "consumers.concurrency must be > 0"
    );

    let mut bad_level = cfg.clone();
    bad_level.logging.level = "loud".into();
    assert!(bad_level.validate().unwrap_err().starts_with("logging.level"));

    let mut empty_topic = cfg.clone();
    empty_topic.bus.topic = "  ".into();
    assert_eq!(empty_topic.validate().unwrap_err(), "bus.topic must not be empty");

    let mut email = cfg;
    email.notifications.channel = NotificationChannel::Email;
    email.notifications.provider.from = Some("noreply@example.nhs.uk".into());
    assert_eq!(
        email.validate().unwrap_err(),
        "notifications.channel=email requires notifications.provider.smtp_host"
    );
}

#[test]
fn test_invalid_file_value_is_a_load_error() {
    let file = write_config("[bus]\npool_size = 0\n");
    let err = load_config(file.path().to_str()).unwrap_err();
    assert_eq!(err, "bus.pool_size must be > 0");

    let file = write_config("[outbox]\nmax_attempts = \"many\"\n");
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.starts_with("config deserialize error"));
}
