use std::time::Duration;

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer as _};
use rdkafka::{ClientConfig, ClientContext};
use tracing::{debug, error, info, warn};

use crate::auth::ScramMechanism;
use crate::config::{LogFn, SessionConfig};
use crate::error::SessionError;

/// Client context shared by every handle the session opens. Routes
/// librdkafka's log lines and client errors to the configured sinks.
#[derive(Clone, Default)]
pub struct SessionContext {
    log_std: Option<LogFn>,
    log_err: Option<LogFn>,
}

impl SessionContext {
    pub fn new(log_std: Option<LogFn>, log_err: Option<LogFn>) -> Self {
        SessionContext { log_std, log_err }
    }

    pub fn log_std(&self, line: &str) {
        if let Some(sink) = &self.log_std {
            sink(line);
        }
    }

    pub fn log_err(&self, line: &str) {
        if let Some(sink) = &self.log_err {
            sink(line);
        }
    }
}

impl ClientContext for SessionContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        let line = format!("rdkafka {fac}: {log_message}");
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                error!(facility = fac, "{}", log_message);
                self.log_err(&line);
            }
            RDKafkaLogLevel::Warning => {
                warn!(facility = fac, "{}", log_message);
                self.log_err(&line);
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(facility = fac, "{}", log_message);
                self.log_std(&line);
            }
            RDKafkaLogLevel::Debug => {
                debug!(facility = fac, "{}", log_message);
                self.log_std(&line);
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(error = %error, "kafka client error: {}", reason);
        self.log_err(&format!("kafka client error: {error}: {reason}"));
    }
}

impl ConsumerContext for SessionContext {}

/// Opens authenticated clients against the configured brokers. Holds no
/// connections itself; each handle it creates owns its own.
#[derive(Clone)]
pub struct ConnectionFactory {
    brokers: Vec<String>,
    mechanism: Option<ScramMechanism>,
    tls: bool,
    dial_timeout: Duration,
    context: SessionContext,
}

impl ConnectionFactory {
    pub fn new(config: &SessionConfig) -> Self {
        ConnectionFactory {
            brokers: config.brokers().to_vec(),
            mechanism: config.mechanism().cloned(),
            tls: config.tls(),
            dial_timeout: config.dial_timeout(),
            context: SessionContext::new(config.log_std().cloned(), config.log_err().cloned()),
        }
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn context(&self) -> SessionContext {
        self.context.clone()
    }

    /// Base client settings for the full broker list.
    pub fn client_config(&self) -> ClientConfig {
        self.client_config_for(&self.brokers.join(","))
    }

    /// Base client settings for an explicit bootstrap list, with security applied.
    pub fn client_config_for(&self, bootstrap_servers: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", bootstrap_servers)
            .set("socket.connection.setup.timeout.ms", self.dial_timeout.as_millis().to_string());

        match &self.mechanism {
            Some(mechanism) => mechanism.apply(&mut client_config, self.tls),
            None if self.tls => {
                client_config
                    .set("security.protocol", "ssl")
                    .set("enable.ssl.certificate.verification", "false");
            }
            None => {}
        }

        client_config
    }

    /// A metadata-only client bound to one broker, used to check reachability
    /// and topic existence without ever auto-creating a topic.
    pub fn metadata_client(&self, broker: &str) -> Result<BaseConsumer<SessionContext>, KafkaError> {
        self.client_config_for(broker)
            .set("allow.auto.create.topics", "false")
            .create_with_context(self.context())
    }

    pub fn create_producer(
        &self,
        config: &SessionConfig,
    ) -> Result<FutureProducer<SessionContext>, SessionError> {
        let mut client_config = self.client_config();
        client_config
            .set("acks", "1")
            .set("linger.ms", "0")
            .set("batch.num.messages", config.batch_size().to_string())
            .set(
                "message.timeout.ms",
                config.message_timeout().as_millis().to_string(),
            )
            .set(
                "max.in.flight.requests.per.connection",
                config.max_in_flight_batches().to_string(),
            );

        debug!("rdkafka producer configuration: {:?}", redacted(&client_config));
        let api: FutureProducer<SessionContext> = client_config
            .create_with_context(self.context())
            .map_err(SessionError::Connect)?;

        // "Ping" the Kafka brokers by requesting metadata
        match api.client().fetch_metadata(None, self.dial_timeout) {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                self.context
                    .log_err(&format!("failed to reach kafka brokers: {error}"));
                return Err(SessionError::Connect(error));
            }
        }

        Ok(api)
    }

    pub fn create_consumer(
        &self,
        config: &SessionConfig,
    ) -> Result<StreamConsumer<SessionContext>, SessionError> {
        let group_id = config.group_id()?;

        let mut client_config = self.client_config();
        client_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", config.offset_reset().as_str())
            .set("fetch.min.bytes", config.fetch_min_bytes().to_string())
            .set("fetch.max.bytes", config.fetch_max_bytes().to_string())
            .set(
                "fetch.wait.max.ms",
                config.max_wait().as_millis().min(500).to_string(),
            );

        debug!("rdkafka consumer configuration: {:?}", redacted(&client_config));
        client_config
            .create_with_context(self.context())
            .map_err(SessionError::Connect)
    }
}

fn redacted(client_config: &ClientConfig) -> ClientConfig {
    let mut copy = client_config.clone();
    if copy.get("sasl.password").is_some() {
        copy.set("sasl.password", "<redacted>");
    }
    copy
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::SessionOptions;

    fn options() -> SessionOptions {
        SessionOptions {
            brokers: vec!["b1:9092".to_string(), "b2:9092".to_string()],
            topic: "orders".to_string(),
            group_id: Some("readers".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn joins_brokers_and_applies_sasl() {
        let config = SessionOptions {
            username: "test".to_string(),
            password: "pwd".to_string(),
            ..options()
        }
        .build()
        .unwrap();
        let client_config = ConnectionFactory::new(&config).client_config();

        assert_eq!(client_config.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(
            client_config.get("socket.connection.setup.timeout.ms"),
            Some("10000")
        );
    }

    #[test]
    fn plain_tls_without_credentials() {
        let config = SessionOptions {
            tls: true,
            ..options()
        }
        .build()
        .unwrap();
        let client_config = ConnectionFactory::new(&config).client_config_for("b2:9092");

        assert_eq!(client_config.get("bootstrap.servers"), Some("b2:9092"));
        assert_eq!(client_config.get("security.protocol"), Some("ssl"));
        assert_eq!(client_config.get("sasl.mechanism"), None);
    }

    #[test]
    fn redaction_hides_password() {
        let config = SessionOptions {
            username: "test".to_string(),
            password: "pwd".to_string(),
            ..options()
        }
        .build()
        .unwrap();
        let client_config = ConnectionFactory::new(&config).client_config();

        assert_eq!(redacted(&client_config).get("sasl.password"), Some("<redacted>"));
        assert_eq!(client_config.get("sasl.password"), Some("pwd"));
    }

    #[test]
    fn context_routes_log_levels_to_sinks() {
        let std_lines = Arc::new(Mutex::new(Vec::new()));
        let err_lines = Arc::new(Mutex::new(Vec::new()));
        let (s, e) = (std_lines.clone(), err_lines.clone());
        let context = SessionContext::new(
            Some(Arc::new(move |line: &str| s.lock().unwrap().push(line.to_string()))),
            Some(Arc::new(move |line: &str| e.lock().unwrap().push(line.to_string()))),
        );

        context.log(RDKafkaLogLevel::Info, "BROKER", "connected");
        context.log(RDKafkaLogLevel::Error, "FAIL", "connection refused");
        context.log(RDKafkaLogLevel::Warning, "SASL", "retrying");

        assert_eq!(*std_lines.lock().unwrap(), vec!["rdkafka BROKER: connected"]);
        assert_eq!(
            *err_lines.lock().unwrap(),
            vec!["rdkafka FAIL: connection refused", "rdkafka SASL: retrying"]
        );
    }
}
