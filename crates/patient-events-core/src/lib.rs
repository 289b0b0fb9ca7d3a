pub mod datetime;
pub mod error;
pub mod events;
pub mod id;
pub mod mutation;

pub use datetime::{now_utc, parse_date, parse_datetime};
pub use error::{CoreError, DecodeError, ErrorCategory, Result};
pub use events::{BroadcastEvent, DomainEvent, EventBroadcaster, PatientEventType, PublishSink};
pub use id::{IdError, generate_id, validate_id};
pub use mutation::{ChangeKind, DeletionNotice, MutationRecord};
