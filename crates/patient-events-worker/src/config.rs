use std::time::Duration;

use patient_events_bus::{SubscriptionFilter, SubscriptionOptions};
use patient_events_db_memory::StorageBackend;
use patient_events_notifications::{NotificationChannel, ProviderConfig, RecipientDirectory};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "patient-events.toml";

/// Upper bound for `outbox.max_attempts`.
pub const MAX_OUTBOX_ATTEMPTS: u32 = 64;
/// Upper bound for `outbox.max_backoff_ms` (one day).
pub const MAX_OUTBOX_BACKOFF_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub consumers: ConsumersConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Bus validations
        if self.bus.topic.trim().is_empty() {
            return Err("bus.topic must not be empty".into());
        }
        if self.bus.audit_subscription.trim().is_empty()
            || self.bus.notification_subscription.trim().is_empty()
        {
            return Err("bus subscription names must not be empty".into());
        }
        if self.bus.audit_subscription == self.bus.notification_subscription {
            return Err("bus.audit_subscription and bus.notification_subscription must differ".into());
        }
        if self.bus.pool_size == 0 {
            return Err("bus.pool_size must be > 0".into());
        }
        if self.bus.max_delivery_count == 0 {
            return Err("bus.max_delivery_count must be > 0".into());
        }
        if self.bus.lock_duration_ms == 0 {
            return Err("bus.lock_duration_ms must be > 0".into());
        }
        if self.bus.broadcast_capacity == 0 {
            return Err("bus.broadcast_capacity must be > 0".into());
        }
        // Consumer and processor validations
        if self.consumers.concurrency == 0 {
            return Err("consumers.concurrency must be > 0".into());
        }
        if self.processor.feed_capacity == 0 || self.processor.partition_queue_depth == 0 {
            return Err("processor queue sizes must be > 0".into());
        }
        // Outbox validation
        if self.outbox.batch_size == 0 {
            return Err("outbox.batch_size must be > 0".into());
        }
        if self.outbox.max_attempts == 0 {
            return Err("outbox.max_attempts must be > 0".into());
        }
        if self.outbox.max_attempts > MAX_OUTBOX_ATTEMPTS {
            return Err(format!("outbox.max_attempts must be <= {MAX_OUTBOX_ATTEMPTS}"));
        }
        if self.outbox.max_backoff_ms == 0 || self.outbox.max_backoff_ms > MAX_OUTBOX_BACKOFF_MS {
            return Err(format!(
                "outbox.max_backoff_ms must be between 1 and {MAX_OUTBOX_BACKOFF_MS}"
            ));
        }
        if self.outbox.base_backoff_ms > self.outbox.max_backoff_ms {
            return Err("outbox.base_backoff_ms must not exceed outbox.max_backoff_ms".into());
        }
        if self.outbox.poll_interval_ms == 0 {
            return Err("outbox.poll_interval_ms must be > 0".into());
        }
        // Notification channel requirements
        let provider = &self.notifications.provider;
        match self.notifications.channel {
            NotificationChannel::Simulated => {}
            NotificationChannel::Email => {
                if provider.from.as_deref().unwrap_or("").is_empty() {
                    return Err("notifications.channel=email requires notifications.provider.from".into());
                }
                if provider.smtp_host.as_deref().unwrap_or("").is_empty() {
                    return Err(
                        "notifications.channel=email requires notifications.provider.smtp_host".into(),
                    );
                }
            }
            NotificationChannel::Webhook => {
                if provider.webhook_url.as_deref().unwrap_or("").is_empty() {
                    return Err(
                        "notifications.channel=webhook requires notifications.provider.webhook_url"
                            .into(),
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_audit_subscription")]
    pub audit_subscription: String,
    #[serde(default = "default_notification_subscription")]
    pub notification_subscription: String,
    /// Maximum number of pooled transport connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Deliveries before the broker dead-letters a message
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_topic() -> String {
    "patient-events".into()
}
fn default_audit_subscription() -> String {
    "audit-logs".into()
}
fn default_notification_subscription() -> String {
    "email-notifications".into()
}
fn default_pool_size() -> usize {
    16
}
fn default_max_delivery_count() -> u32 {
    10
}
fn default_lock_duration_ms() -> u64 {
    30_000
}
fn default_broadcast_capacity() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            audit_subscription: default_audit_subscription(),
            notification_subscription: default_notification_subscription(),
            pool_size: default_pool_size(),
            max_delivery_count: default_max_delivery_count(),
            lock_duration_ms: default_lock_duration_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl BusConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    /// Options applied to both subscriptions; each receives every event type.
    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            max_delivery_count: self.max_delivery_count,
            lock_duration: self.lock_duration(),
            filter: SubscriptionFilter::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumersConfig {
    /// Receive loops per subscription
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Wait after finding a subscription empty
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

fn default_concurrency() -> usize {
    4
}
fn default_idle_backoff_ms() -> u64 {
    250
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl ConsumersConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Buffered batches in the in-memory change feed
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Batches queued per partition worker
    #[serde(default = "default_partition_queue_depth")]
    pub partition_queue_depth: usize,
    /// Wait before re-processing a batch that could not be made durable
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_feed_capacity() -> usize {
    64
}
fn default_partition_queue_depth() -> usize {
    8
}
fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            feed_capacity: default_feed_capacity(),
            partition_queue_depth: default_partition_queue_depth(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ProcessorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Ceiling for the doubling retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_outbox_batch_size")]
    pub batch_size: usize,
}

fn default_base_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    300_000
}
fn default_max_attempts() -> u32 {
    8
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_outbox_batch_size() -> usize {
    32
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_outbox_batch_size(),
        }
    }
}

impl OutboxConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub channel: NotificationChannel,
    /// Delay applied by the simulated channel
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub directory: RecipientDirectory,
}

fn default_simulated_latency_ms() -> u64 {
    100
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channel: NotificationChannel::default(),
            simulated_latency_ms: default_simulated_latency_ms(),
            provider: ProviderConfig::default(),
            directory: RecipientDirectory::default(),
        }
    }
}

impl NotificationsConfig {
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

pub mod loader {
    use super::{AppConfig, DEFAULT_CONFIG_PATH};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., PATIENT_EVENTS__CONSUMERS__CONCURRENCY=8
        builder = builder.add_source(
            Environment::with_prefix("PATIENT_EVENTS")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
