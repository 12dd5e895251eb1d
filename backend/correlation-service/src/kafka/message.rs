//! Broker-agnostic message types

use std::fmt;

/// Which input stream a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Customer,
    Inventory,
    Unknown,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Customer => "customer",
            Topic::Inventory => "inventory",
            Topic::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps configured topic names onto [`Topic`]
#[derive(Debug, Clone)]
pub struct TopicRouter {
    customer_topic: String,
    inventory_topic: String,
}

impl TopicRouter {
    pub fn new(customer_topic: impl Into<String>, inventory_topic: impl Into<String>) -> Self {
        Self {
            customer_topic: customer_topic.into(),
            inventory_topic: inventory_topic.into(),
        }
    }

    pub fn classify(&self, topic_name: &str) -> Topic {
        if topic_name == self.customer_topic {
            Topic::Customer
        } else if topic_name == self.inventory_topic {
            Topic::Inventory
        } else {
            Topic::Unknown
        }
    }

    pub fn topics(&self) -> [&str; 2] {
        [&self.customer_topic, &self.inventory_topic]
    }
}

/// Position of a message in the broker, used only to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    topic: String,
    partition: i32,
    offset: i64,
}

impl MessageHandle {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Offset to commit so the group resumes after this message
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A message pulled from the broker, owned for one loop iteration
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub handle: MessageHandle,
}

impl InboundMessage {
    /// Key decoded as UTF-8 (lossy)
    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}
