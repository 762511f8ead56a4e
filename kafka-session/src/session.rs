use tracing::info;

use crate::client::ConnectionFactory;
use crate::config::{SessionConfig, SessionOptions};
use crate::consumer::Consumer;
use crate::error::SessionError;
use crate::producer::{KafkaTransport, Producer};
use crate::topic::{ensure_topic, KafkaAdminConnector, TopicDescriptor, TopicStatus};

/// Entry point: a validated configuration plus the factory every handle is
/// opened through. Producers and consumers are independent of each other.
#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    factory: ConnectionFactory,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self, SessionError> {
        Ok(Self::from_config(options.build()?))
    }

    pub fn from_config(config: SessionConfig) -> Self {
        let factory = ConnectionFactory::new(&config);
        Session { config, factory }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create the session topic if it is missing.
    pub async fn ensure_topic(&self) -> Result<TopicStatus, SessionError> {
        let connector = KafkaAdminConnector::new(self.factory.clone());
        let descriptor = TopicDescriptor::new(
            self.config.topic(),
            self.config.topic_partitions(),
            self.config.replication_factor(),
        );
        Ok(ensure_topic(&connector, self.factory.brokers(), &descriptor).await?)
    }

    /// Open a producer. With auto topic creation on, the topic is
    /// bootstrapped before the producer connects.
    pub async fn producer(&self) -> Result<Producer, SessionError> {
        if self.config.allow_auto_topic_creation() {
            let status = self.ensure_topic().await?;
            info!(topic = self.config.topic(), ?status, "topic ready");
        }

        let producer = self.factory.create_producer(&self.config)?;
        let transport = KafkaTransport::new(producer, &self.factory, &self.config);
        Ok(Producer::new(&self.config, transport))
    }

    /// Open a consumer in the configured group. Fails without a group id.
    pub fn consumer(&self) -> Result<Consumer, SessionError> {
        let consumer = self.factory.create_consumer(&self.config)?;
        Consumer::new(consumer, &self.config, self.factory.context())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[tokio::test]
    async fn consumer_requires_a_group_id() {
        let session = Session::new(SessionOptions {
            brokers: vec!["localhost:9092".to_string()],
            topic: "orders".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            session.consumer(),
            Err(SessionError::Config(ConfigError::MissingGroupId))
        ));
    }

    #[test]
    fn invalid_options_fail_fast() {
        let result = Session::new(SessionOptions {
            topic: "orders".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::NoBrokers))
        ));
    }
}
