use serde::{Deserialize, Serialize};

/// Delivery channel a domain event is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishSink {
    /// Best-effort broadcast channel
    Broadcast,
    /// Durable multi-subscriber topic
    Topic,
}

impl PublishSink {
    pub const ALL: [PublishSink; 2] = [Self::Broadcast, Self::Topic];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSink::Broadcast => "broadcast",
            PublishSink::Topic => "topic",
        }
    }
}

impl std::fmt::Display for PublishSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
