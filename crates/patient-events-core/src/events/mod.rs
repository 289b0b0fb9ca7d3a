//! Patient domain events and the broadcast channel they are announced on.
//!
//! # Module Structure
//!
//! - [`types`]: `DomainEvent` and its variants
//! - [`envelope`]: `BroadcastEvent`, the broadcast wire form
//! - [`broadcaster`]: in-process broadcast channel
//! - [`sink`]: the delivery channels an event is published to

pub mod broadcaster;
pub mod envelope;
pub mod sink;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use envelope::{BroadcastEvent, DATA_VERSION, patient_subject};
pub use sink::PublishSink;
pub use types::{DomainEvent, PatientCreated, PatientDeleted, PatientEventType, PatientUpdated};
