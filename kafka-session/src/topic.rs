//! Topic bootstrap: make sure the session topic exists before producing.
//!
//! Creation is not atomic across a cluster, so several processes starting at
//! once may all see the topic missing and all try to create it. Every loser
//! of that race re-reads the metadata instead of failing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tracing::{info, warn};

use crate::client::{ConnectionFactory, SessionContext};
use crate::error::BootstrapError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub name: String,
    pub partitions: usize,
    pub replication_factor: usize,
}

impl TopicDescriptor {
    pub fn new(name: impl Into<String>, partitions: usize, replication_factor: usize) -> Self {
        TopicDescriptor {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    Created { partitions: usize },
    /// The partition count is `None` when the topic was created concurrently
    /// and the follow-up metadata read could not confirm it yet.
    AlreadyExists(Option<usize>),
}

impl TopicStatus {
    pub fn partitions(&self) -> Option<usize> {
        match self {
            TopicStatus::Created { partitions } => Some(*partitions),
            TopicStatus::AlreadyExists(partitions) => *partitions,
        }
    }
}

/// How the cluster answered a create request that did not outright fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Someone else created it first.
    AlreadyExists,
    /// The broker dropped the connection mid-request; the topic may or may not exist.
    ConnectionClosed,
}

/// Metadata and topic-creation calls against one dialed broker.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Partition count of `topic`, or `None` when the cluster does not know it.
    async fn partition_count(&self, topic: &str) -> Result<Option<usize>, KafkaError>;

    /// Create `topic`; the request is routed to the cluster controller.
    async fn create_topic(&self, topic: &TopicDescriptor) -> Result<CreateOutcome, KafkaError>;
}

#[async_trait]
pub trait AdminConnector: Send + Sync {
    type Admin: TopicAdmin;

    async fn dial(&self, broker: &str) -> Result<Self::Admin, KafkaError>;
}

/// Ensure `topic` exists, creating it on the first reachable broker if needed.
/// Safe to call redundantly and concurrently.
pub async fn ensure_topic<C: AdminConnector>(
    connector: &C,
    brokers: &[String],
    topic: &TopicDescriptor,
) -> Result<TopicStatus, BootstrapError> {
    let admin = dial_first(connector, brokers).await?;

    match admin.partition_count(&topic.name).await {
        Ok(Some(partitions)) if partitions > 0 => {
            info!(topic = %topic.name, partitions, "topic already exists");
            return Ok(TopicStatus::AlreadyExists(Some(partitions)));
        }
        Ok(_) => {
            info!(topic = %topic.name, "topic does not exist, creating it");
        }
        Err(error) => {
            return Err(BootstrapError::MetadataFailed {
                topic: topic.name.clone(),
                error,
            })
        }
    }

    let outcome = admin
        .create_topic(topic)
        .await
        .map_err(|error| BootstrapError::CreateFailed {
            topic: topic.name.clone(),
            error,
        })?;

    match outcome {
        CreateOutcome::Created => {
            info!(
                topic = %topic.name,
                partitions = topic.partitions,
                replication_factor = topic.replication_factor,
                "created topic"
            );
            Ok(TopicStatus::Created {
                partitions: topic.partitions,
            })
        }
        CreateOutcome::AlreadyExists => {
            let partitions = admin.partition_count(&topic.name).await.ok().flatten();
            info!(topic = %topic.name, ?partitions, "topic was created concurrently");
            Ok(TopicStatus::AlreadyExists(partitions))
        }
        CreateOutcome::ConnectionClosed => match admin.partition_count(&topic.name).await {
            Ok(Some(partitions)) if partitions > 0 => {
                info!(topic = %topic.name, partitions, "topic exists after interrupted create");
                Ok(TopicStatus::AlreadyExists(Some(partitions)))
            }
            Ok(_) => {
                warn!(topic = %topic.name, "connection closed during create, topic not visible yet");
                Ok(TopicStatus::AlreadyExists(None))
            }
            Err(error) => {
                warn!(topic = %topic.name, error = %error, "connection closed during create, metadata unavailable");
                Ok(TopicStatus::AlreadyExists(None))
            }
        },
    }
}

async fn dial_first<C: AdminConnector>(
    connector: &C,
    brokers: &[String],
) -> Result<C::Admin, BootstrapError> {
    let mut last_error = KafkaError::ClientCreation("no broker addresses given".to_string());
    for broker in brokers {
        match connector.dial(broker).await {
            Ok(admin) => return Ok(admin),
            Err(error) => {
                warn!(broker = %broker, error = %error, "failed to dial broker");
                last_error = error;
            }
        }
    }
    Err(BootstrapError::ConnectFailed {
        brokers: brokers.to_vec(),
        error: last_error,
    })
}

/// Dials brokers through librdkafka using the session's security settings.
pub struct KafkaAdminConnector {
    factory: ConnectionFactory,
}

impl KafkaAdminConnector {
    pub fn new(factory: ConnectionFactory) -> Self {
        KafkaAdminConnector { factory }
    }
}

pub struct KafkaTopicAdmin {
    metadata: Arc<BaseConsumer<SessionContext>>,
    admin: AdminClient<SessionContext>,
    timeout: Duration,
}

#[async_trait]
impl AdminConnector for KafkaAdminConnector {
    type Admin = KafkaTopicAdmin;

    async fn dial(&self, broker: &str) -> Result<KafkaTopicAdmin, KafkaError> {
        let timeout = self.factory.dial_timeout();
        let metadata = Arc::new(self.factory.metadata_client(broker)?);

        // Reachability check: a full metadata round-trip under the dial timeout
        let reachable = metadata.clone();
        tokio::task::spawn_blocking(move || reachable.fetch_metadata(None, timeout))
            .await
            .map_err(|_| KafkaError::Canceled)??;

        let admin: AdminClient<SessionContext> = self
            .factory
            .client_config_for(broker)
            .create_with_context(self.factory.context())?;

        Ok(KafkaTopicAdmin {
            metadata,
            admin,
            timeout,
        })
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn partition_count(&self, topic: &str) -> Result<Option<usize>, KafkaError> {
        let client = self.metadata.clone();
        let timeout = self.timeout;
        let name = topic.to_owned();
        let metadata =
            tokio::task::spawn_blocking(move || client.fetch_metadata(Some(name.as_str()), timeout))
                .await
                .map_err(|_| KafkaError::Canceled)??;

        let Some(found) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Ok(None);
        };
        match found.error().map(RDKafkaErrorCode::from) {
            None => Ok(Some(found.partitions().len())),
            Some(RDKafkaErrorCode::UnknownTopicOrPartition) | Some(RDKafkaErrorCode::UnknownTopic) => {
                Ok(None)
            }
            Some(code) => Err(KafkaError::MetadataFetch(code)),
        }
    }

    async fn create_topic(&self, topic: &TopicDescriptor) -> Result<CreateOutcome, KafkaError> {
        let partitions = i32::try_from(topic.partitions).map_err(|_| {
            KafkaError::AdminOpCreation(format!(
                "{} partitions requested for {}, more than kafka supports",
                topic.partitions, topic.name
            ))
        })?;
        let replication = i32::try_from(topic.replication_factor).map_err(|_| {
            KafkaError::AdminOpCreation(format!(
                "replication factor {} requested for {}, more than kafka supports",
                topic.replication_factor, topic.name
            ))
        })?;
        let new_topic = NewTopic::new(
            &topic.name,
            partitions,
            TopicReplication::Fixed(replication),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = match self.admin.create_topics(&[new_topic], &opts).await {
            Ok(results) => results,
            Err(KafkaError::AdminOp(RDKafkaErrorCode::BrokerTransportFailure)) => {
                return Ok(CreateOutcome::ConnectionClosed)
            }
            Err(error) => return Err(error),
        };

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(CreateOutcome::Created),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(CreateOutcome::AlreadyExists),
            Some(Err((_, RDKafkaErrorCode::BrokerTransportFailure))) => {
                Ok(CreateOutcome::ConnectionClosed)
            }
            Some(Err((_, code))) => Err(KafkaError::AdminOp(code)),
            None => Err(KafkaError::AdminOpCreation(
                "create_topics returned no result".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// An in-memory cluster. Every dial hands out an admin that shares the
    /// same topic table, like several connections into one cluster would.
    #[derive(Default)]
    struct FakeCluster {
        topics: Arc<Mutex<HashMap<String, usize>>>,
        unreachable: HashSet<String>,
        creates: Arc<AtomicUsize>,
        drop_create_connection: bool,
        create_lost: bool,
    }

    struct FakeAdmin {
        topics: Arc<Mutex<HashMap<String, usize>>>,
        creates: Arc<AtomicUsize>,
        drop_create_connection: bool,
        create_lost: bool,
    }

    #[async_trait]
    impl AdminConnector for FakeCluster {
        type Admin = FakeAdmin;

        async fn dial(&self, broker: &str) -> Result<FakeAdmin, KafkaError> {
            if self.unreachable.contains(broker) {
                return Err(KafkaError::MetadataFetch(
                    RDKafkaErrorCode::BrokerTransportFailure,
                ));
            }
            Ok(FakeAdmin {
                topics: self.topics.clone(),
                creates: self.creates.clone(),
                drop_create_connection: self.drop_create_connection,
                create_lost: self.create_lost,
            })
        }
    }

    #[async_trait]
    impl TopicAdmin for FakeAdmin {
        async fn partition_count(&self, topic: &str) -> Result<Option<usize>, KafkaError> {
            Ok(self.topics.lock().unwrap().get(topic).copied())
        }

        async fn create_topic(
            &self,
            topic: &TopicDescriptor,
        ) -> Result<CreateOutcome, KafkaError> {
            // Let a concurrent caller reach its own metadata check first
            tokio::task::yield_now().await;
            self.creates.fetch_add(1, Ordering::SeqCst);
            let mut topics = self.topics.lock().unwrap();
            if topics.contains_key(&topic.name) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            if self.create_lost {
                return Ok(CreateOutcome::ConnectionClosed);
            }
            topics.insert(topic.name.clone(), topic.partitions);
            if self.drop_create_connection {
                return Ok(CreateOutcome::ConnectionClosed);
            }
            Ok(CreateOutcome::Created)
        }
    }

    fn brokers() -> Vec<String> {
        vec![
            "1051-kafka:9092".to_string(),
            "1052-kafka:9092".to_string(),
            "1053-kafka:9092".to_string(),
        ]
    }

    #[tokio::test]
    async fn creates_missing_topic() {
        let cluster = FakeCluster::default();
        let orders = TopicDescriptor::new("orders", 3, 2);

        let status = ensure_topic(&cluster, &brokers(), &orders).await.unwrap();

        assert_eq!(status, TopicStatus::Created { partitions: 3 });
        assert_eq!(cluster.topics.lock().unwrap().get("orders"), Some(&3));
    }

    #[tokio::test]
    async fn existing_topic_is_left_alone() {
        let cluster = FakeCluster::default();
        cluster.topics.lock().unwrap().insert("orders".to_string(), 6);

        let status = ensure_topic(&cluster, &brokers(), &TopicDescriptor::new("orders", 3, 2))
            .await
            .unwrap();

        assert_eq!(status, TopicStatus::AlreadyExists(Some(6)));
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_unreachable_brokers() {
        let cluster = FakeCluster {
            unreachable: ["1051-kafka:9092".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let status = ensure_topic(&cluster, &brokers(), &TopicDescriptor::new("orders", 3, 2))
            .await
            .unwrap();

        assert_eq!(status.partitions(), Some(3));
    }

    #[tokio::test]
    async fn all_brokers_unreachable_is_connect_failed() {
        let cluster = FakeCluster {
            unreachable: brokers().into_iter().collect(),
            ..Default::default()
        };

        let error = ensure_topic(&cluster, &brokers(), &TopicDescriptor::new("orders", 3, 2))
            .await
            .unwrap_err();

        match error {
            BootstrapError::ConnectFailed { brokers: tried, .. } => assert_eq!(tried, brokers()),
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_callers_both_succeed_with_one_topic() {
        let cluster = FakeCluster::default();
        let orders = TopicDescriptor::new("orders", 3, 2);
        let brokers = brokers();

        let (first, second) = tokio::join!(
            ensure_topic(&cluster, &brokers, &orders),
            ensure_topic(&cluster, &brokers, &orders),
        );

        let statuses = [first.unwrap(), second.unwrap()];
        assert!(statuses.contains(&TopicStatus::Created { partitions: 3 }));
        assert!(statuses
            .iter()
            .all(|status| status.partitions() == Some(3)));
        assert_eq!(cluster.topics.lock().unwrap().len(), 1);
        assert_eq!(cluster.topics.lock().unwrap().get("orders"), Some(&3));
    }

    #[tokio::test]
    async fn dropped_connection_on_create_is_benign_once_verified() {
        let cluster = FakeCluster {
            drop_create_connection: true,
            ..Default::default()
        };

        let status = ensure_topic(&cluster, &brokers(), &TopicDescriptor::new("orders", 3, 2))
            .await
            .unwrap();

        assert_eq!(status, TopicStatus::AlreadyExists(Some(3)));
    }

    #[tokio::test]
    async fn premature_close_without_visible_topic_is_benign() {
        let cluster = FakeCluster {
            create_lost: true,
            ..Default::default()
        };

        let status = ensure_topic(&cluster, &brokers(), &TopicDescriptor::new("orders", 3, 2))
            .await
            .unwrap();

        assert_eq!(status, TopicStatus::AlreadyExists(None));
        assert_eq!(status.partitions(), None);
        assert_eq!(cluster.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_topic_is_refused_before_the_request() {
        let (cluster, options) = crate::test::create_mock_kafka("orders", 1);
        let factory = ConnectionFactory::new(&options.build().unwrap());
        let admin = KafkaAdminConnector::new(factory)
            .dial(&cluster.bootstrap_servers())
            .await
            .unwrap();

        let error = admin
            .create_topic(&TopicDescriptor::new("huge", usize::MAX, 1))
            .await
            .unwrap_err();
        assert!(matches!(error, KafkaError::AdminOpCreation(_)));

        let error = admin
            .create_topic(&TopicDescriptor::new("huge", 3, usize::MAX))
            .await
            .unwrap_err();
        assert!(matches!(error, KafkaError::AdminOpCreation(_)));
    }
}
