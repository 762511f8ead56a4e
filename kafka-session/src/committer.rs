use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::SessionContext;
use crate::consumer::Progress;
use crate::error::SessionError;
use crate::message::Position;

/// Where committed offsets go.
#[async_trait]
pub trait OffsetSink: Send + Sync + 'static {
    async fn commit(&self, positions: &[Position]) -> Result<(), KafkaError>;
}

/// Commits offsets for the consumer group through the consumer that read them.
pub struct GroupOffsetSink {
    consumer: Arc<StreamConsumer<SessionContext>>,
}

impl GroupOffsetSink {
    pub fn new(consumer: Arc<StreamConsumer<SessionContext>>) -> Self {
        GroupOffsetSink { consumer }
    }
}

#[async_trait]
impl OffsetSink for GroupOffsetSink {
    async fn commit(&self, positions: &[Position]) -> Result<(), KafkaError> {
        let mut list = TopicPartitionList::new();
        for position in positions {
            list.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset),
            )?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync))
            .await
            .map_err(|_| KafkaError::Canceled)?
    }
}

/// Periodically commits the latest observed position of every partition.
pub struct OffsetCommitter<S> {
    sink: S,
    progress: watch::Receiver<Progress>,
    interval: Duration,
    context: SessionContext,
}

impl<S: OffsetSink> OffsetCommitter<S> {
    pub fn new(
        sink: S,
        progress: watch::Receiver<Progress>,
        interval: Duration,
        context: SessionContext,
    ) -> Self {
        OffsetCommitter {
            sink,
            progress,
            interval,
            context,
        }
    }

    /// Spawn the commit loop. It runs until the handle is stopped or dropped.
    pub fn start(self) -> CommitterHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        CommitterHandle {
            token,
            task: Some(task),
        }
    }

    async fn run(self, token: CancellationToken) {
        let mut committed = Progress::default();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.commit_pending(&mut committed).await,
            }
        }

        // Final commit so nothing observed before shutdown is left behind
        self.commit_pending(&mut committed).await;
        debug!("offset committer stopped");
    }

    async fn commit_pending(&self, committed: &mut Progress) {
        let pending = {
            let progress = self.progress.borrow();
            if progress.is_idle() {
                return;
            }
            progress
                .positions()
                .into_iter()
                .filter(|p| committed.offset(&p.topic, p.partition) < Some(p.offset))
                .collect::<Vec<_>>()
        };
        if pending.is_empty() {
            return;
        }

        match self.sink.commit(&pending).await {
            Ok(()) => {
                for position in &pending {
                    debug!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "committed offset"
                    );
                    committed.observe(position);
                }
            }
            Err(error) => {
                let error = SessionError::CommitFailed(error);
                warn!(partitions = pending.len(), "{}, retrying next tick", error);
                self.context.log_err(&error.to_string());
            }
        }
    }
}

/// Owns a running committer. Dropping it cancels the loop.
pub struct CommitterHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CommitterHandle {
    /// Cancel the loop and wait for its final commit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                error!("offset committer task failed: {}", error);
            }
        }
        info!("offset committer shut down");
    }
}

impl Drop for CommitterHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
