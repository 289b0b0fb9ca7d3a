//! # patient-events-bus
//!
//! Message transport for the patient event pipeline.
//!
//! - [`broker`]: in-memory topic/subscription broker with peek-lock delivery
//! - [`message`]: topic messages, lock tokens, dead-lettered messages
//! - [`transport`]: `BroadcastPublisher`, `TopicSender`, `SubscriptionReceiver`
//! - [`pool`]: the deadpool-managed connection pool shared by all workers

pub mod broker;
mod error;
pub mod message;
pub mod pool;
pub mod transport;

pub use broker::{InMemoryBroker, SubscriptionFilter, SubscriptionOptions, SubscriptionStats};
pub use error::{ErrorCategory, TransportError};
pub use message::{
    DeadLetteredMessage, EVENT_TYPE_PROPERTY, JSON_CONTENT_TYPE, LockToken,
    MAX_DELIVERY_COUNT_EXCEEDED, PATIENT_ID_PROPERTY, PropertyValue, ReceivedMessage,
    TopicMessage,
};
pub use pool::{BusClients, BusConnection, BusManager, BusPool, PooledConnection, build_pool};
pub use transport::{
    BroadcastPublisher, LocalBroadcastPublisher, SubscriptionReceiver, TopicSender,
};
