use chrono::{DateTime, Utc};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message as _;

/// A transient client-side copy of a record. Partition and offset are
/// assigned by the broker (or the balancer) and stay `None` until then.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub topic: String,
    /// Routing key. An empty key is sent as a null key.
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl Message {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Message {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Pin the message to a partition, bypassing the balancer.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Bytes this message adds to a partition's backlog.
    pub fn size(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }

    /// True once the broker has acknowledged the message and assigned an offset.
    pub fn is_delivered(&self) -> bool {
        self.offset.is_some()
    }

    pub fn position(&self) -> Option<Position> {
        Some(Position {
            topic: self.topic.clone(),
            partition: self.partition?,
            offset: self.offset?,
        })
    }

    pub(crate) fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        Message {
            topic: message.topic().to_owned(),
            key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            partition: Some(message.partition()),
            offset: Some(message.offset()),
        }
    }
}

/// Where a message sits in the log: the unit of offset commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}
