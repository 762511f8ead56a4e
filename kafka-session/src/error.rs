use rdkafka::error::KafkaError;
use thiserror::Error;

/// Invalid or missing session options, reported by `SessionOptions::build`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one broker address is required")]
    NoBrokers,
    #[error("broker address at position {0} is empty")]
    EmptyBroker(usize),
    #[error("a topic name is required")]
    MissingTopic,
    #[error("a consumer group id is required to consume")]
    MissingGroupId,
    #[error("{field} is {value}, the largest allowed value is {max}")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("fetch_min_bytes ({min}) must not exceed fetch_max_bytes ({max})")]
    FetchBounds { min: u32, max: u32 },
    #[error("{value} is not a valid offset reset policy, expected earliest or latest")]
    OffsetReset { value: String },
}

/// Failure to derive a SASL/SCRAM mechanism from the configured credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("a SASL password was given without a username")]
    MissingUsername,
    #[error("a SASL username was given without a password")]
    MissingPassword,
    #[error("{0} is not a supported SCRAM mechanism")]
    UnsupportedMechanism(String),
}

/// Failure to check or provision a topic. The benign creation race is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("none of the brokers {brokers:?} could be reached: {error}")]
    ConnectFailed {
        brokers: Vec<String>,
        error: KafkaError,
    },
    #[error("failed to read metadata for topic {topic}: {error}")]
    MetadataFailed { topic: String, error: KafkaError },
    #[error("failed to create topic {topic}: {error}")]
    CreateFailed { topic: String, error: KafkaError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build the SASL mechanism: {0}")]
    Auth(#[from] AuthError),
    #[error("failed to connect to the brokers: {0}")]
    Connect(KafkaError),
    #[error("topic bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("{failed} of {total} messages in the batch were not acknowledged: {error}")]
    DeliveryFailed {
        failed: usize,
        total: usize,
        error: KafkaError,
    },
    #[error("failed to commit consumer offsets: {0}")]
    CommitFailed(KafkaError),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("the session handle has been closed")]
    Closed,
}
