use std::future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use tokio::sync::{mpsc, oneshot, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::balancer::LeastBytes;
use crate::client::{ConnectionFactory, SessionContext};
use crate::config::{CompletionFn, SessionConfig};
use crate::error::SessionError;
use crate::message::Message;
use crate::topic::{ensure_topic, AdminConnector, KafkaAdminConnector, TopicDescriptor};

/// A batch the transport could not fully deliver. `messages` is the whole
/// batch; the ones that failed are those still without an offset.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub messages: Vec<Message>,
    pub error: SessionError,
}

/// Moves one batch to the broker and reports what was acknowledged.
#[async_trait]
pub trait BatchTransport: Send + Sync + 'static {
    /// Deliver `batch`, returning it with partitions and offsets filled in.
    async fn deliver(&self, batch: Vec<Message>) -> Result<Vec<Message>, DeliveryFailure>;

    /// Wait until nothing handed to the transport is still queued.
    async fn flush(&self, timeout: Duration) -> Result<(), SessionError>;
}

type Ack = oneshot::Sender<Result<(), SessionError>>;

struct Pending {
    message: Message,
    ack: Option<Ack>,
}

enum Command {
    Enqueue(Pending),
    Flush(oneshot::Sender<()>),
}

/// Batching producer handle. Messages are buffered by a background task and
/// flushed when `batch_size` is reached or `batch_timeout` expires.
pub struct Producer {
    commands: mpsc::Sender<Command>,
    batcher: tokio::task::JoinHandle<()>,
    flush_transport: Arc<dyn BatchTransport>,
    topic: String,
    async_delivery: bool,
    close_timeout: Duration,
}

impl Producer {
    /// Start the batching task over `transport`. Must be called inside a tokio runtime.
    pub fn new<T: BatchTransport>(config: &SessionConfig, transport: T) -> Self {
        let transport: Arc<dyn BatchTransport> = Arc::new(transport);
        // Room for a full batch per in-flight slot plus the one being filled
        let capacity = config
            .batch_size()
            .saturating_mul(config.max_in_flight_batches().saturating_add(1))
            .clamp(1, Semaphore::MAX_PERMITS);
        let (commands, receiver) = mpsc::channel(capacity);

        let batcher = Batcher {
            batch_size: config.batch_size(),
            batch_timeout: config.batch_timeout(),
            transport: transport.clone(),
            completion: config.completion().cloned(),
            context: SessionContext::new(config.log_std().cloned(), config.log_err().cloned()),
            in_flight: Arc::new(Semaphore::new(
                config.max_in_flight_batches().min(Semaphore::MAX_PERMITS),
            )),
            deliveries: JoinSet::new(),
            buffer: Vec::new(),
        };

        Producer {
            commands,
            batcher: tokio::spawn(batcher.run(receiver)),
            flush_transport: transport,
            topic: config.topic().to_owned(),
            async_delivery: config.async_delivery(),
            close_timeout: config.message_timeout(),
        }
    }

    /// Hand `messages` to the batcher.
    ///
    /// In async mode this returns as soon as the messages are buffered and the
    /// outcome is reported through the completion callback. Otherwise it waits
    /// for the broker to acknowledge every batch the messages landed in and
    /// returns the first delivery error.
    pub async fn send(&self, messages: Vec<Message>) -> Result<(), SessionError> {
        let mut acks = Vec::new();
        for mut message in messages {
            message.topic.clone_from(&self.topic);
            message.timestamp.get_or_insert_with(Utc::now);

            let ack = if self.async_delivery {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                acks.push(rx);
                Some(tx)
            };

            self.commands
                .send(Command::Enqueue(Pending { message, ack }))
                .await
                .map_err(|_| SessionError::Closed)?;
        }

        for ack in acks {
            ack.await.map_err(|_| SessionError::Closed)??;
        }
        Ok(())
    }

    /// Push out the current partial batch and wait for every in-flight batch.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Flush everything still buffered, wait for its completion callbacks,
    /// then drain the transport.
    pub async fn close(self) -> Result<(), SessionError> {
        let Producer {
            commands,
            batcher,
            flush_transport,
            topic,
            close_timeout,
            ..
        } = self;

        drop(commands);
        if let Err(error) = batcher.await {
            error!(topic = %topic, "producer batcher task failed: {}", error);
        }
        flush_transport.flush(close_timeout).await?;
        info!(topic = %topic, "producer closed");
        Ok(())
    }
}

struct Batcher {
    batch_size: usize,
    batch_timeout: Duration,
    transport: Arc<dyn BatchTransport>,
    completion: Option<CompletionFn>,
    context: SessionContext,
    in_flight: Arc<Semaphore>,
    deliveries: JoinSet<()>,
    buffer: Vec<Pending>,
}

impl Batcher {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut deadline: Option<Instant> = None;

        loop {
            let batch_expired = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(pending)) => {
                        if self.buffer.is_empty() {
                            deadline = Some(Instant::now() + self.batch_timeout);
                        }
                        self.buffer.push(pending);
                        if self.buffer.len() >= self.batch_size {
                            self.flush_buffer().await;
                            deadline = None;
                        }
                    }
                    Some(Command::Flush(done)) => {
                        self.flush_buffer().await;
                        deadline = None;
                        self.join_deliveries().await;
                        if done.send(()).is_err() {
                            debug!("flush requester went away before the flush finished");
                        }
                    }
                    None => break,
                },
                _ = batch_expired => {
                    self.flush_buffer().await;
                    deadline = None;
                }
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    if let Err(error) = joined {
                        error!("batch delivery task failed: {}", error);
                    }
                }
            }
        }

        self.flush_buffer().await;
        self.join_deliveries().await;
    }

    async fn join_deliveries(&mut self) {
        while let Some(joined) = self.deliveries.join_next().await {
            if let Err(error) = joined {
                error!("batch delivery task failed: {}", error);
            }
        }
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        // The semaphore is never closed, so this only waits for a free slot
        let permit = self.in_flight.clone().acquire_owned().await.ok();

        let (messages, acks): (Vec<_>, Vec<_>) = self
            .buffer
            .drain(..)
            .map(|pending| (pending.message, pending.ack))
            .unzip();
        let transport = self.transport.clone();
        let completion = self.completion.clone();
        let context = self.context.clone();

        self.deliveries.spawn(async move {
            let _permit = permit;
            let total = messages.len();
            debug!(messages = total, "flushing batch");

            let (messages, error) = match transport.deliver(messages).await {
                Ok(delivered) => (delivered, None),
                Err(failure) => {
                    warn!(messages = total, error = %failure.error, "batch delivery failed");
                    context.log_err(&format!("batch delivery failed: {}", failure.error));
                    (failure.messages, Some(failure.error))
                }
            };

            if let Some(completion) = completion {
                completion(&messages, error.as_ref());
            }
            for ack in acks.into_iter().flatten() {
                let result = match &error {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                };
                if ack.send(result).is_err() {
                    debug!("sender stopped waiting for its batch");
                }
            }
        });
    }
}

/// Delivers batches through librdkafka with leader-only acks, routing
/// unpinned messages through the least-bytes balancer.
pub struct KafkaTransport<C = KafkaAdminConnector> {
    producer: FutureProducer<SessionContext>,
    topic: TopicDescriptor,
    bootstrap: Option<(C, Vec<String>)>,
    balancer: OnceCell<LeastBytes>,
    metadata_timeout: Duration,
}

impl KafkaTransport<KafkaAdminConnector> {
    pub fn new(
        producer: FutureProducer<SessionContext>,
        factory: &ConnectionFactory,
        config: &SessionConfig,
    ) -> Self {
        let bootstrap = config.allow_auto_topic_creation().then(|| {
            (
                KafkaAdminConnector::new(factory.clone()),
                factory.brokers().to_vec(),
            )
        });

        KafkaTransport {
            producer,
            topic: TopicDescriptor::new(
                config.topic(),
                config.topic_partitions(),
                config.replication_factor(),
            ),
            bootstrap,
            balancer: OnceCell::new(),
            metadata_timeout: factory.dial_timeout(),
        }
    }
}

impl<C: AdminConnector> KafkaTransport<C> {
    async fn partition_count(&self) -> Result<Option<usize>, KafkaError> {
        let client = self.producer.clone();
        let topic = self.topic.name.clone();
        let timeout = self.metadata_timeout;
        let metadata = tokio::task::spawn_blocking(move || {
            client.client().fetch_metadata(Some(topic.as_str()), timeout)
        })
        .await
        .map_err(|_| KafkaError::Canceled)??;

        Ok(metadata
            .topics()
            .iter()
            .find(|t| t.name() == self.topic.name && t.error().is_none())
            .map(|t| t.partitions().len())
            .filter(|count| *count > 0))
    }

    /// Learn the partition count on first use, bootstrapping the topic if
    /// it is missing and auto creation is allowed.
    async fn balancer(&self) -> Result<&LeastBytes, SessionError> {
        self.balancer.get_or_try_init(|| self.load_balancer()).await
    }

    async fn load_balancer(&self) -> Result<LeastBytes, SessionError> {
        let known = self.partition_count().await?;
        let partitions = match resolve_partitions(known, self.bootstrap.as_ref(), &self.topic).await? {
            Some(partitions) => partitions,
            // Created concurrently but not visible yet
            None => self
                .partition_count()
                .await?
                .unwrap_or(self.topic.partitions),
        };
        Ok(LeastBytes::new(partitions))
    }
}

/// Partition count to balance over. A topic the cluster does not know yet is
/// created when a bootstrap connector is present; `None` means it was created
/// concurrently and its partitions are not visible yet.
async fn resolve_partitions<C: AdminConnector>(
    known: Option<usize>,
    bootstrap: Option<&(C, Vec<String>)>,
    topic: &TopicDescriptor,
) -> Result<Option<usize>, SessionError> {
    if let Some(partitions) = known {
        return Ok(Some(partitions));
    }

    let Some((connector, brokers)) = bootstrap else {
        return Err(SessionError::Kafka(KafkaError::MetadataFetch(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        )));
    };
    info!(topic = %topic.name, "topic missing on first send, bootstrapping it");
    let status = ensure_topic(connector, brokers, topic).await?;
    Ok(status.partitions())
}

#[async_trait]
impl<C> BatchTransport for KafkaTransport<C>
where
    C: AdminConnector + 'static,
{
    async fn deliver(&self, mut batch: Vec<Message>) -> Result<Vec<Message>, DeliveryFailure> {
        let total = batch.len();
        let balancer = match self.balancer().await {
            Ok(balancer) => balancer,
            Err(error) => {
                let error = match error {
                    SessionError::Kafka(error) => SessionError::DeliveryFailed {
                        failed: total,
                        total,
                        error,
                    },
                    other => other,
                };
                return Err(DeliveryFailure {
                    messages: batch,
                    error,
                });
            }
        };

        let mut handles = Vec::with_capacity(total);
        for message in &batch {
            let size = message.size();
            let (partition, balanced) = match message.partition {
                Some(partition) => (Some(partition), false),
                None => (balancer.pick(size), true),
            };
            let record: FutureRecord<'_, [u8], [u8]> = FutureRecord {
                topic: &message.topic,
                partition,
                payload: Some(message.value.as_slice()),
                key: (!message.key.is_empty()).then_some(message.key.as_slice()),
                timestamp: message.timestamp.map(|t| t.timestamp_millis()),
                headers: None,
            };
            let handle = self.producer.send_result(record).map_err(|(e, _)| e);
            handles.push((partition.filter(|_| balanced), size, handle));
        }

        // Enqueued in order above; the acks are awaited concurrently
        let acks = join_all(handles.into_iter().map(|(balanced, size, handle)| async move {
            let result = match handle {
                Ok(delivery) => match delivery.await {
                    Ok(Ok((partition, offset))) => Ok((partition, offset)),
                    Ok(Err((error, _))) => Err(error),
                    // Cancelled due to timeout while retrying
                    Err(_) => Err(KafkaError::Canceled),
                },
                Err(error) => Err(error),
            };
            (balanced, size, result)
        }))
        .await;

        let mut failed = 0;
        let mut first_error = None;
        for (message, (balanced, size, result)) in batch.iter_mut().zip(acks) {
            if let Some(partition) = balanced {
                balancer.release(partition, size);
            }

            match result {
                Ok((partition, offset)) => {
                    message.partition = Some(partition);
                    message.offset = Some(offset);
                }
                Err(error) => {
                    failed += 1;
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            None => Ok(batch),
            Some(error) => Err(DeliveryFailure {
                messages: batch,
                error: SessionError::DeliveryFailed {
                    failed,
                    total,
                    error,
                },
            }),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), SessionError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|_| SessionError::Kafka(KafkaError::Canceled))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::SessionOptions;

    /// Records every delivered batch and assigns offsets from a counter.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        batches: Arc<Mutex<Vec<Vec<Message>>>>,
        fail_with: Option<KafkaError>,
        flushed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl BatchTransport for RecordingTransport {
        async fn deliver(&self, mut batch: Vec<Message>) -> Result<Vec<Message>, DeliveryFailure> {
            let mut batches = self.batches.lock().unwrap();
            if let Some(error) = &self.fail_with {
                batches.push(batch.clone());
                let total = batch.len();
                return Err(DeliveryFailure {
                    messages: batch,
                    error: SessionError::DeliveryFailed {
                        failed: total,
                        total,
                        error: error.clone(),
                    },
                });
            }
            let base = batches.iter().map(Vec::len).sum::<usize>() as i64;
            for (i, message) in batch.iter_mut().enumerate() {
                message.partition.get_or_insert(0);
                message.offset = Some(base + i as i64);
            }
            batches.push(batch.clone());
            Ok(batch)
        }

        async fn flush(&self, _timeout: Duration) -> Result<(), SessionError> {
            *self.flushed.lock().unwrap() = true;
            Ok(())
        }
    }

    type Completions = Arc<Mutex<Vec<(Vec<Message>, Option<SessionError>)>>>;

    fn config(batch_size: usize, async_delivery: bool) -> (SessionConfig, Completions) {
        let completions: Completions = Arc::new(Mutex::new(Vec::new()));
        let sink = completions.clone();
        let config = SessionOptions {
            brokers: vec!["localhost:9092".to_string()],
            topic: "orders".to_string(),
            batch_size: Some(batch_size),
            batch_timeout: Some(Duration::from_secs(1)),
            async_delivery,
            completion: Some(Arc::new(move |messages: &[Message], error: Option<&SessionError>| {
                sink.lock()
                    .unwrap()
                    .push((messages.to_vec(), error.cloned()));
            })),
            ..Default::default()
        }
        .build()
        .unwrap();
        (config, completions)
    }

    fn keyed(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message::new(format!("k{i}"), format!("v{i}")))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_triggers_one_completion() {
        let (config, completions) = config(3, true);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(3)).await.unwrap();
        producer.close().await.unwrap();

        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        let (messages, error) = &completions[0];
        assert!(error.is_none());
        let keys: Vec<_> = messages.iter().map(|m| m.key.clone()).collect();
        assert_eq!(keys, vec![b"k0".to_vec(), b"k1".to_vec(), b"k2".to_vec()]);
        assert!(messages.iter().all(|m| m.topic == "orders" && m.is_delivered()));
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_a_partial_batch() {
        let (config, completions) = config(100, true);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(7)).await.unwrap();
        producer.close().await.unwrap();

        assert_eq!(transport.batches.lock().unwrap().len(), 1);
        assert_eq!(transport.batches.lock().unwrap()[0].len(), 7);
        assert_eq!(completions.lock().unwrap().len(), 1);
        assert!(*transport.flushed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_timeout_flushes_a_partial_batch() {
        let (config, completions) = config(100, true);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.batches.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(transport.batches.lock().unwrap().len(), 1);
        assert_eq!(completions.lock().unwrap().len(), 1);

        producer.close().await.unwrap();
        assert_eq!(completions.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn splits_into_batch_sized_chunks() {
        let (config, completions) = config(3, true);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(7)).await.unwrap();
        producer.close().await.unwrap();

        let sizes: Vec<_> = transport
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(completions.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_reaches_the_callback() {
        let (config, completions) = config(2, true);
        let transport = RecordingTransport {
            fail_with: Some(KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut)),
            ..Default::default()
        };
        let producer = Producer::new(&config, transport);

        producer.send(keyed(2)).await.unwrap();
        producer.close().await.unwrap();

        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        let (messages, error) = &completions[0];
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.is_delivered()));
        assert!(matches!(
            error,
            Some(SessionError::DeliveryFailed { failed: 2, total: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_send_waits_for_the_acknowledgement() {
        let (config, completions) = config(2, false);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(2)).await.unwrap();

        assert_eq!(transport.batches.lock().unwrap().len(), 1);
        assert_eq!(completions.lock().unwrap().len(), 1);
        producer.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sync_send_surfaces_delivery_errors() {
        let (config, _completions) = config(1, false);
        let transport = RecordingTransport {
            fail_with: Some(KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut)),
            ..Default::default()
        };
        let producer = Producer::new(&config, transport);

        let error = producer.send(keyed(1)).await.unwrap_err();
        assert!(matches!(error, SessionError::DeliveryFailed { .. }));
        producer.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_sends_without_closing() {
        let (config, completions) = config(100, true);
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(4)).await.unwrap();
        producer.flush().await.unwrap();
        assert_eq!(completions.lock().unwrap().len(), 1);

        producer.send(keyed(1)).await.unwrap();
        producer.close().await.unwrap();
        assert_eq!(completions.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn largest_accepted_batch_settings_start_cleanly() {
        let completions: Completions = Arc::new(Mutex::new(Vec::new()));
        let sink = completions.clone();
        let config = SessionOptions {
            brokers: vec!["localhost:9092".to_string()],
            topic: "orders".to_string(),
            batch_size: Some(crate::config::MAX_BATCH_SIZE),
            max_in_flight_batches: Some(crate::config::MAX_IN_FLIGHT_BATCHES),
            completion: Some(Arc::new(move |messages: &[Message], error: Option<&SessionError>| {
                sink.lock()
                    .unwrap()
                    .push((messages.to_vec(), error.cloned()));
            })),
            ..Default::default()
        }
        .build()
        .unwrap();
        let transport = RecordingTransport::default();
        let producer = Producer::new(&config, transport.clone());

        producer.send(keyed(3)).await.unwrap();
        producer.close().await.unwrap();

        assert_eq!(transport.batches.lock().unwrap().len(), 1);
        assert_eq!(completions.lock().unwrap()[0].0.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn send_stamps_missing_timestamps() {
        let (config, completions) = config(1, true);
        let producer = Producer::new(&config, RecordingTransport::default());

        producer.send(keyed(1)).await.unwrap();
        producer.close().await.unwrap();

        assert!(completions.lock().unwrap()[0].0[0].timestamp.is_some());
    }

    /// A cluster that starts without the session topic and records creations.
    #[derive(Default)]
    struct EmptyCluster {
        topics: Arc<Mutex<Vec<TopicDescriptor>>>,
        dials: Arc<Mutex<usize>>,
    }

    struct EmptyClusterAdmin {
        topics: Arc<Mutex<Vec<TopicDescriptor>>>,
    }

    #[async_trait]
    impl AdminConnector for EmptyCluster {
        type Admin = EmptyClusterAdmin;

        async fn dial(&self, _broker: &str) -> Result<EmptyClusterAdmin, KafkaError> {
            *self.dials.lock().unwrap() += 1;
            Ok(EmptyClusterAdmin {
                topics: self.topics.clone(),
            })
        }
    }

    #[async_trait]
    impl crate::topic::TopicAdmin for EmptyClusterAdmin {
        async fn partition_count(&self, topic: &str) -> Result<Option<usize>, KafkaError> {
            Ok(self
                .topics
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.name == topic)
                .map(|t| t.partitions))
        }

        async fn create_topic(
            &self,
            topic: &TopicDescriptor,
        ) -> Result<crate::topic::CreateOutcome, KafkaError> {
            self.topics.lock().unwrap().push(topic.clone());
            Ok(crate::topic::CreateOutcome::Created)
        }
    }

    fn seed_brokers() -> Vec<String> {
        vec!["localhost:9092".to_string()]
    }

    #[tokio::test]
    async fn first_send_bootstraps_a_missing_topic() {
        let cluster = EmptyCluster::default();
        let bootstrap = (cluster, seed_brokers());
        let orders = TopicDescriptor::new("orders", 3, 2);

        let partitions = resolve_partitions(None, Some(&bootstrap), &orders)
            .await
            .unwrap();

        assert_eq!(partitions, Some(3));
        assert_eq!(*bootstrap.0.topics.lock().unwrap(), vec![orders]);
        let balancer = LeastBytes::new(partitions.unwrap());
        assert_eq!(balancer.partitions(), 3);
    }

    #[tokio::test]
    async fn known_topic_skips_bootstrap() {
        let bootstrap = (EmptyCluster::default(), seed_brokers());

        let partitions = resolve_partitions(
            Some(6),
            Some(&bootstrap),
            &TopicDescriptor::new("orders", 3, 2),
        )
        .await
        .unwrap();

        assert_eq!(partitions, Some(6));
        assert_eq!(*bootstrap.0.dials.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_topic_without_auto_creation_fails() {
        let error = resolve_partitions::<EmptyCluster>(
            None,
            None,
            &TopicDescriptor::new("orders", 3, 2),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            SessionError::Kafka(KafkaError::MetadataFetch(
                RDKafkaErrorCode::UnknownTopicOrPartition
            ))
        ));
    }
}
