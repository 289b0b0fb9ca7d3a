pub mod adapters;
pub mod error;
pub mod provider;
pub mod sink;
pub mod templates;
pub mod types;

pub use adapters::{
    EmailAdapter, NotificationAdapter, RenderedContent, SendResult, SimulatedAdapter,
    WebhookAdapter,
};
pub use error::NotificationError;
pub use provider::{ProviderConfig, mask_secrets};
pub use sink::{NotificationSink, RecipientDirectory};
pub use templates::{Template, TemplateRenderer};
pub use types::*;
