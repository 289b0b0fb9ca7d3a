pub mod audit;
pub mod config;
pub mod consumers;
pub mod feed;
pub mod metrics;
pub mod observability;
pub mod outbox;
pub mod pipeline;
pub mod processor;
pub mod publisher;

pub use audit::{AuditSink, action_for, unknown_action};
pub use config::{
    AppConfig, BusConfig, ConsumersConfig, LoggingConfig, NotificationsConfig, OutboxConfig,
    ProcessorConfig, StorageConfig,
};
pub use consumers::{
    AuditHandler, ConsumerSettings, ConsumerStats, Handled, HandlerError, MessageHandler,
    MessageOutcome, NotificationHandler, SubscriptionConsumer,
};
pub use feed::{
    ChangeBatch, ChangeFeed, ChangeFeedSender, DeletionQueue, DeletionSender, FeedClosed,
    InMemoryChangeFeed,
};
pub use observability::{apply_logging_level, init_tracing};
pub use outbox::{Backoff, OutboxRelay, RelayReport};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use processor::{BatchProgress, BatchReport, ChangeProcessor, Disposition, ProcessorError};
pub use publisher::{EventPublisher, PublishError, SinkFailure};
