use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;

use crate::auth::{self, ScramHash, ScramMechanism};
use crate::error::{ConfigError, SessionError};
use crate::message::Message;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TOPIC_PARTITIONS: usize = 3;
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;
pub const DEFAULT_MAX_IN_FLIGHT_BATCHES: usize = 5;
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_MIN_BYTES: u32 = 1;
pub const DEFAULT_FETCH_MAX_BYTES: u32 = 10 * 1024 * 1024;

/// librdkafka's ceiling for both `batch.num.messages` and
/// `max.in.flight.requests.per.connection`.
pub const MAX_BATCH_SIZE: usize = 1_000_000;
pub const MAX_IN_FLIGHT_BATCHES: usize = 1_000_000;
/// Partition counts and replication factors travel as `i32` on the wire.
pub const MAX_TOPIC_DIMENSION: usize = i32::MAX as usize;

/// Called once per flushed batch with the batch and the delivery error, if any.
/// Runs on a delivery task, possibly concurrently with itself.
pub type CompletionFn = Arc<dyn Fn(&[Message], Option<&SessionError>) + Send + Sync>;

/// Receives one log line.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            _ => Err(ConfigError::OffsetReset {
                value: s.to_owned(),
            }),
        }
    }
}

/// Everything a session can be configured with. Fill in the fields you need
/// and call [`SessionOptions::build`]; unset or zero tunables take defaults.
#[derive(Clone)]
pub struct SessionOptions {
    pub brokers: Vec<String>,
    pub topic: String,
    /// Only required to consume.
    pub group_id: Option<String>,
    pub username: String,
    pub password: String,
    pub sasl_mechanism: ScramHash,
    pub tls: bool,

    /// Messages per batch.
    pub batch_size: Option<usize>,
    /// Longest a partial batch waits before it is flushed.
    pub batch_timeout: Option<Duration>,
    /// Longest a fetch blocks waiting for a message.
    pub max_wait: Option<Duration>,
    pub commit_interval: Option<Duration>,
    pub allow_auto_topic_creation: bool,
    /// When false, `send` waits for the broker acknowledgement.
    pub async_delivery: bool,

    pub topic_partitions: Option<usize>,
    pub replication_factor: Option<usize>,
    pub max_in_flight_batches: Option<usize>,
    /// Broker-side retry budget for a single message.
    pub message_timeout: Option<Duration>,
    pub dial_timeout: Option<Duration>,
    pub offset_reset: OffsetReset,
    pub fetch_min_bytes: Option<u32>,
    pub fetch_max_bytes: Option<u32>,

    pub completion: Option<CompletionFn>,
    pub log_std: Option<LogFn>,
    pub log_err: Option<LogFn>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            brokers: Vec::new(),
            topic: String::new(),
            group_id: None,
            username: String::new(),
            password: String::new(),
            sasl_mechanism: ScramHash::default(),
            tls: false,
            batch_size: None,
            batch_timeout: None,
            max_wait: None,
            commit_interval: None,
            allow_auto_topic_creation: false,
            async_delivery: true,
            topic_partitions: None,
            replication_factor: None,
            max_in_flight_batches: None,
            message_timeout: None,
            dial_timeout: None,
            offset_reset: OffsetReset::default(),
            fetch_min_bytes: None,
            fetch_max_bytes: None,
            completion: None,
            log_std: None,
            log_err: None,
        }
    }
}

fn or_default<T: PartialEq + Default>(value: Option<T>, default: T) -> T {
    match value {
        Some(v) if v != T::default() => v,
        _ => default,
    }
}

fn at_most(field: &'static str, value: usize, max: usize) -> Result<usize, ConfigError> {
    if value > max {
        return Err(ConfigError::TooLarge { field, value, max });
    }
    Ok(value)
}

impl SessionOptions {
    /// Validate and default every field at once, producing an immutable config.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        if self.brokers.is_empty() {
            return Err(ConfigError::NoBrokers.into());
        }
        let mut brokers = Vec::with_capacity(self.brokers.len());
        for (index, broker) in self.brokers.iter().enumerate() {
            let broker = broker.trim();
            if broker.is_empty() {
                return Err(ConfigError::EmptyBroker(index).into());
            }
            brokers.push(broker.to_owned());
        }

        let topic = self.topic.trim().to_owned();
        if topic.is_empty() {
            return Err(ConfigError::MissingTopic.into());
        }

        let group_id = self
            .group_id
            .map(|g| g.trim().to_owned())
            .filter(|g| !g.is_empty());

        let fetch_min_bytes = or_default(self.fetch_min_bytes, DEFAULT_FETCH_MIN_BYTES);
        let fetch_max_bytes = or_default(self.fetch_max_bytes, DEFAULT_FETCH_MAX_BYTES);
        if fetch_min_bytes > fetch_max_bytes {
            return Err(ConfigError::FetchBounds {
                min: fetch_min_bytes,
                max: fetch_max_bytes,
            }
            .into());
        }

        let batch_size = at_most(
            "batch_size",
            or_default(self.batch_size, DEFAULT_BATCH_SIZE),
            MAX_BATCH_SIZE,
        )?;
        let max_in_flight_batches = at_most(
            "max_in_flight_batches",
            or_default(self.max_in_flight_batches, DEFAULT_MAX_IN_FLIGHT_BATCHES),
            MAX_IN_FLIGHT_BATCHES,
        )?;
        let topic_partitions = at_most(
            "topic_partitions",
            or_default(self.topic_partitions, DEFAULT_TOPIC_PARTITIONS),
            MAX_TOPIC_DIMENSION,
        )?;
        let replication_factor = at_most(
            "replication_factor",
            or_default(self.replication_factor, DEFAULT_REPLICATION_FACTOR),
            MAX_TOPIC_DIMENSION,
        )?;

        let mechanism = auth::mechanism(self.sasl_mechanism, &self.username, &self.password)?;

        Ok(SessionConfig {
            brokers,
            topic,
            group_id,
            mechanism,
            sasl_mechanism: self.sasl_mechanism,
            tls: self.tls,
            batch_size,
            batch_timeout: or_default(self.batch_timeout, DEFAULT_BATCH_TIMEOUT),
            max_wait: or_default(self.max_wait, DEFAULT_MAX_WAIT),
            commit_interval: or_default(self.commit_interval, DEFAULT_COMMIT_INTERVAL),
            allow_auto_topic_creation: self.allow_auto_topic_creation,
            async_delivery: self.async_delivery,
            topic_partitions,
            replication_factor,
            max_in_flight_batches,
            message_timeout: or_default(self.message_timeout, DEFAULT_MESSAGE_TIMEOUT),
            dial_timeout: or_default(self.dial_timeout, DEFAULT_DIAL_TIMEOUT),
            offset_reset: self.offset_reset,
            fetch_min_bytes,
            fetch_max_bytes,
            completion: self.completion,
            log_std: self.log_std,
            log_err: self.log_err,
        })
    }
}

/// Validated, fully defaulted session parameters. Read-only once built.
#[derive(Clone)]
pub struct SessionConfig {
    brokers: Vec<String>,
    topic: String,
    group_id: Option<String>,
    mechanism: Option<ScramMechanism>,
    sasl_mechanism: ScramHash,
    tls: bool,
    batch_size: usize,
    batch_timeout: Duration,
    max_wait: Duration,
    commit_interval: Duration,
    allow_auto_topic_creation: bool,
    async_delivery: bool,
    topic_partitions: usize,
    replication_factor: usize,
    max_in_flight_batches: usize,
    message_timeout: Duration,
    dial_timeout: Duration,
    offset_reset: OffsetReset,
    fetch_min_bytes: u32,
    fetch_max_bytes: u32,
    completion: Option<CompletionFn>,
    log_std: Option<LogFn>,
    log_err: Option<LogFn>,
}

impl SessionConfig {
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Comma-joined broker list, the form librdkafka takes.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> Result<&str, ConfigError> {
        self.group_id.as_deref().ok_or(ConfigError::MissingGroupId)
    }

    pub fn mechanism(&self) -> Option<&ScramMechanism> {
        self.mechanism.as_ref()
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn commit_interval(&self) -> Duration {
        self.commit_interval
    }

    pub fn allow_auto_topic_creation(&self) -> bool {
        self.allow_auto_topic_creation
    }

    pub fn async_delivery(&self) -> bool {
        self.async_delivery
    }

    pub fn topic_partitions(&self) -> usize {
        self.topic_partitions
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn max_in_flight_batches(&self) -> usize {
        self.max_in_flight_batches
    }

    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn offset_reset(&self) -> OffsetReset {
        self.offset_reset
    }

    pub fn fetch_min_bytes(&self) -> u32 {
        self.fetch_min_bytes
    }

    pub fn fetch_max_bytes(&self) -> u32 {
        self.fetch_max_bytes
    }

    pub fn completion(&self) -> Option<&CompletionFn> {
        self.completion.as_ref()
    }

    pub fn log_std(&self) -> Option<&LogFn> {
        self.log_std.as_ref()
    }

    pub fn log_err(&self) -> Option<&LogFn> {
        self.log_err.as_ref()
    }

    /// The options this config was built from, with every default filled in.
    /// Building them again yields an identical config.
    pub fn options(&self) -> SessionOptions {
        let (username, password) = match &self.mechanism {
            Some(m) => (m.username().to_owned(), m.password().to_owned()),
            None => (String::new(), String::new()),
        };
        SessionOptions {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            username,
            password,
            sasl_mechanism: self.sasl_mechanism,
            tls: self.tls,
            batch_size: Some(self.batch_size),
            batch_timeout: Some(self.batch_timeout),
            max_wait: Some(self.max_wait),
            commit_interval: Some(self.commit_interval),
            allow_auto_topic_creation: self.allow_auto_topic_creation,
            async_delivery: self.async_delivery,
            topic_partitions: Some(self.topic_partitions),
            replication_factor: Some(self.replication_factor),
            max_in_flight_batches: Some(self.max_in_flight_batches),
            message_timeout: Some(self.message_timeout),
            dial_timeout: Some(self.dial_timeout),
            offset_reset: self.offset_reset,
            fetch_min_bytes: Some(self.fetch_min_bytes),
            fetch_max_bytes: Some(self.fetch_max_bytes),
            completion: self.completion.clone(),
            log_std: self.log_std.clone(),
            log_err: self.log_err.clone(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("mechanism", &self.mechanism)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("tls", &self.tls)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout", &self.batch_timeout)
            .field("max_wait", &self.max_wait)
            .field("commit_interval", &self.commit_interval)
            .field("allow_auto_topic_creation", &self.allow_auto_topic_creation)
            .field("async_delivery", &self.async_delivery)
            .field("topic_partitions", &self.topic_partitions)
            .field("replication_factor", &self.replication_factor)
            .field("max_in_flight_batches", &self.max_in_flight_batches)
            .field("message_timeout", &self.message_timeout)
            .field("dial_timeout", &self.dial_timeout)
            .field("offset_reset", &self.offset_reset)
            .field("fetch_min_bytes", &self.fetch_min_bytes)
            .field("fetch_max_bytes", &self.fetch_max_bytes)
            .field("completion", &self.completion.is_some())
            .field("log_std", &self.log_std.is_some())
            .field("log_err", &self.log_err.is_some())
            .finish()
    }
}

/// Split a comma-separated broker list, trimming whitespace and dropping blanks.
pub fn parse_brokers(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

/// The session surface as environment variables, for services that configure
/// themselves from the process environment. Callbacks can only be set in code.
#[derive(Envconfig, Clone)]
pub struct KafkaEnvConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    pub kafka_topic: String,

    pub kafka_consumer_group: Option<String>,

    #[envconfig(default = "")]
    pub kafka_sasl_username: String,

    #[envconfig(default = "")]
    pub kafka_sasl_password: String,

    #[envconfig(default = "SCRAM-SHA-256")]
    pub kafka_sasl_mechanism: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "100")]
    pub kafka_batch_size: usize,

    #[envconfig(default = "1000")]
    pub kafka_batch_timeout_ms: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub kafka_max_wait_ms: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub kafka_commit_interval_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub kafka_allow_auto_topic_creation: bool,

    #[envconfig(default = "true")]
    pub kafka_async: bool,

    #[envconfig(default = "3")]
    pub kafka_topic_partitions: usize,

    #[envconfig(default = "2")]
    pub kafka_topic_replication_factor: usize,

    #[envconfig(default = "5")]
    pub kafka_max_in_flight_batches: usize,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: EnvMsDuration, // Time before we stop retrying producing a message

    #[envconfig(default = "10000")]
    pub kafka_dial_timeout_ms: EnvMsDuration,

    // earliest, latest
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "1")]
    pub kafka_fetch_min_bytes: u32,

    #[envconfig(default = "10485760")]
    pub kafka_fetch_max_bytes: u32,
}

impl KafkaEnvConfig {
    pub fn into_options(self) -> Result<SessionOptions, SessionError> {
        Ok(SessionOptions {
            brokers: parse_brokers(&self.kafka_hosts),
            topic: self.kafka_topic,
            group_id: self.kafka_consumer_group,
            username: self.kafka_sasl_username,
            password: self.kafka_sasl_password,
            sasl_mechanism: self.kafka_sasl_mechanism.parse()?,
            tls: self.kafka_tls,
            batch_size: Some(self.kafka_batch_size),
            batch_timeout: Some(self.kafka_batch_timeout_ms.0),
            max_wait: Some(self.kafka_max_wait_ms.0),
            commit_interval: Some(self.kafka_commit_interval_ms.0),
            allow_auto_topic_creation: self.kafka_allow_auto_topic_creation,
            async_delivery: self.kafka_async,
            topic_partitions: Some(self.kafka_topic_partitions),
            replication_factor: Some(self.kafka_topic_replication_factor),
            max_in_flight_batches: Some(self.kafka_max_in_flight_batches),
            message_timeout: Some(self.kafka_message_timeout_ms.0),
            dial_timeout: Some(self.kafka_dial_timeout_ms.0),
            offset_reset: self.kafka_consumer_offset_reset.parse()?,
            fetch_min_bytes: Some(self.kafka_fetch_min_bytes),
            fetch_max_bytes: Some(self.kafka_fetch_max_bytes),
            ..Default::default()
        })
    }
}
