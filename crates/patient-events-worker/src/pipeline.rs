//! Wiring of the broker, pool, stores, processor, relay and consumers.

use std::sync::Arc;

use anyhow::Context;
use patient_events_bus::{
    BusClients, BusPool, InMemoryBroker, LocalBroadcastPublisher, TopicSender, build_pool,
};
use patient_events_core::EventBroadcaster;
use patient_events_db_memory::{Stores, create_stores};
use patient_events_notifications::{
    EmailAdapter, NotificationAdapter, NotificationChannel, NotificationSink, SimulatedAdapter,
    ProviderConfig, WebhookAdapter, mask_secrets,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audit::AuditSink;
use crate::config::{AppConfig, NotificationsConfig};
use crate::consumers::{AuditHandler, ConsumerSettings, NotificationHandler, SubscriptionConsumer};
use crate::feed::{ChangeFeed, DeletionQueue};
use crate::outbox::OutboxRelay;
use crate::processor::ChangeProcessor;
use crate::publisher::EventPublisher;

/// A fully wired pipeline instance.
pub struct Pipeline {
    pub config: AppConfig,
    pub broker: Arc<InMemoryBroker>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub pool: BusPool,
    pub stores: Stores,
    pub publisher: Arc<EventPublisher>,
    pub processor: Arc<ChangeProcessor>,
    pub relay: Arc<OutboxRelay>,
    pub audit_consumer: Arc<SubscriptionConsumer<AuditHandler>>,
    pub notification_consumer: Arc<SubscriptionConsumer<NotificationHandler>>,
}

impl Pipeline {
    /// Spawn the processor, the outbox relay and both consumers.
    ///
    /// The processor reads `feed` and `deletions`. Every task stops once
    /// `cancel` fires; join the returned set to wait for them.
    pub fn spawn(
        &self,
        feed: Arc<dyn ChangeFeed>,
        deletions: DeletionQueue,
        cancel: CancellationToken,
    ) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        tasks.spawn(self.processor.clone().run(feed, deletions, cancel.clone()));

        let relay = self.relay.clone();
        let relay_cancel = cancel.clone();
        tasks.spawn(async move { relay.run(relay_cancel).await });

        tasks.spawn(self.audit_consumer.clone().run(cancel.clone()));
        tasks.spawn(self.notification_consumer.clone().run(cancel));

        info!(
            topic = %self.config.bus.topic,
            audit_subscription = %self.config.bus.audit_subscription,
            notification_subscription = %self.config.bus.notification_subscription,
            "Pipeline tasks started"
        );
        tasks
    }
}

pub struct PipelineBuilder {
    config: AppConfig,
    broker: Option<Arc<InMemoryBroker>>,
    topic_sender: Option<Arc<dyn TopicSender>>,
    adapter: Option<Arc<dyn NotificationAdapter>>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            broker: None,
            topic_sender: None,
            adapter: None,
        }
    }

    /// Use an existing broker instead of creating one.
    pub fn with_broker(mut self, broker: Arc<InMemoryBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Route topic sends through `sender` instead of the broker directly.
    pub fn with_topic_sender(mut self, sender: Arc<dyn TopicSender>) -> Self {
        self.topic_sender = Some(sender);
        self
    }

    /// Override the adapter chosen from `notifications.channel`.
    pub fn with_notification_adapter(mut self, adapter: Arc<dyn NotificationAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn build(self) -> anyhow::Result<Pipeline> {
        let config = self.config;
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid pipeline configuration")?;

        let bus = &config.bus;
        let broker = self
            .broker
            .unwrap_or_else(|| Arc::new(InMemoryBroker::new()));
        broker.create_topic(&bus.topic);
        for subscription in [&bus.audit_subscription, &bus.notification_subscription] {
            broker.create_subscription(&bus.topic, subscription, bus.subscription_options());
        }

        let broadcaster = Arc::new(EventBroadcaster::with_capacity(bus.broadcast_capacity));
        let sender: Arc<dyn TopicSender> = match self.topic_sender {
            Some(sender) => sender,
            None => broker.clone(),
        };
        let clients = BusClients {
            broadcast: Arc::new(LocalBroadcastPublisher::new(broadcaster.clone())),
            sender,
            receiver: broker.clone(),
        };
        let pool =
            build_pool(clients, bus.pool_size).context("failed to build bus connection pool")?;

        let stores = create_stores(config.storage.backend);

        let publisher = Arc::new(EventPublisher::new(pool.clone(), bus.topic.clone()));
        let processor = Arc::new(ChangeProcessor::new(
            publisher.clone(),
            stores.outbox.clone(),
            &config.processor,
            &config.outbox,
        ));
        let relay = Arc::new(OutboxRelay::new(
            stores.outbox.clone(),
            publisher.clone(),
            &config.outbox,
        ));

        let notifications = &config.notifications;
        let adapter = self
            .adapter
            .unwrap_or_else(|| default_adapter(notifications));
        let notification_sink = NotificationSink::new(
            adapter,
            notifications.channel,
            notifications.provider.clone(),
        )
        .context("failed to set up notification sink")?
        .with_directory(notifications.directory.clone());

        let settings = |subscription: &str| ConsumerSettings {
            topic: bus.topic.clone(),
            subscription: subscription.to_string(),
            concurrency: config.consumers.concurrency,
            idle_backoff: config.consumers.idle_backoff(),
        };
        let audit_consumer = Arc::new(SubscriptionConsumer::new(
            pool.clone(),
            AuditHandler::new(AuditSink::new(stores.audit.clone())),
            settings(&bus.audit_subscription),
        ));
        let notification_consumer = Arc::new(SubscriptionConsumer::new(
            pool.clone(),
            NotificationHandler::new(notification_sink),
            settings(&bus.notification_subscription),
        ));

        info!(
            channel = %notifications.channel,
            provider = ?loggable_provider(notifications),
            pool_size = bus.pool_size,
            storage = ?config.storage.backend,
            "Pipeline built"
        );

        Ok(Pipeline {
            broker,
            broadcaster,
            pool,
            stores,
            publisher,
            processor,
            relay,
            audit_consumer,
            notification_consumer,
            config,
        })
    }
}

/// Provider settings with credentials masked.
fn loggable_provider(notifications: &NotificationsConfig) -> ProviderConfig {
    mask_secrets(notifications.provider.clone())
}

fn default_adapter(notifications: &NotificationsConfig) -> Arc<dyn NotificationAdapter> {
    match notifications.channel {
        NotificationChannel::Simulated => {
            Arc::new(SimulatedAdapter::with_latency(notifications.simulated_latency()))
        }
        NotificationChannel::Email => Arc::new(EmailAdapter::new()),
        NotificationChannel::Webhook => Arc::new(WebhookAdapter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_provider_hides_credentials() {
        let mut notifications = NotificationsConfig::default();
        notifications.channel = NotificationChannel::Webhook;
        notifications.provider.webhook_url = Some("https://hooks.example.nhs.uk/patients".into());
        notifications.provider.webhook_secret = Some("s3cret".into());
        notifications.provider.smtp_password = Some("hunter2".into());

        let logged = format!("{:?}", loggable_provider(&notifications));
        assert!(!logged.contains("s3cret"));
        assert!(!logged.contains("hunter2"));
        assert!(logged.contains("hooks.example.nhs.uk"));
    }

    #[test]
    fn test_build_wires_both_subscriptions() {
        let mut config = AppConfig::default();
        config.notifications.simulated_latency_ms = 0;
        let pipeline = PipelineBuilder::new(config).build().unwrap();

        assert_eq!(pipeline.audit_consumer.subscription(), "audit-logs");
        assert_eq!(pipeline.notification_consumer.subscription(), "email-notifications");
        for subscription in ["audit-logs", "email-notifications"] {
            let stats = pipeline.broker.stats("patient-events", subscription).unwrap();
            assert_eq!(stats.active, 0);
        }
    }
}
