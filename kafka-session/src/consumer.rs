use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Offset;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::SessionContext;
use crate::committer::{CommitterHandle, GroupOffsetSink, OffsetCommitter};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::message::{Message, Position};

/// The latest fetched offset of every partition this consumer has read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    offsets: BTreeMap<(String, i32), i64>,
}

impl Progress {
    /// True until the first message is observed.
    pub fn is_idle(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets.get(&(topic.to_owned(), partition)).copied()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.offsets
            .iter()
            .map(|((topic, partition), offset)| Position {
                topic: topic.clone(),
                partition: *partition,
                offset: *offset,
            })
            .collect()
    }

    /// Record `position`, keeping offsets monotonic. Returns whether anything changed.
    pub fn observe(&mut self, position: &Position) -> bool {
        let key = (position.topic.clone(), position.partition);
        match self.offsets.get_mut(&key) {
            Some(offset) if *offset >= position.offset => false,
            Some(offset) => {
                *offset = position.offset;
                true
            }
            None => {
                self.offsets.insert(key, position.offset);
                true
            }
        }
    }
}

/// Single-writer handoff of consumer progress to the offset committer.
#[derive(Debug)]
pub struct CommitState {
    progress: watch::Sender<Progress>,
}

impl Default for CommitState {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitState {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        CommitState { progress }
    }

    pub fn observe(&self, position: Position) {
        self.progress
            .send_if_modified(|progress| progress.observe(&position));
    }

    pub fn snapshot(&self) -> Progress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }
}

/// Group consumer for the session topic. Offsets are committed in the
/// background at `commit_interval`, never before the first fetch.
pub struct Consumer {
    consumer: Arc<StreamConsumer<SessionContext>>,
    state: CommitState,
    max_wait: Duration,
    committer: Option<CommitterHandle>,
    topic: String,
}

impl Consumer {
    /// Subscribe `consumer` to the session topic and start its committer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        consumer: StreamConsumer<SessionContext>,
        config: &SessionConfig,
        context: SessionContext,
    ) -> Result<Self, SessionError> {
        consumer.subscribe(&[config.topic()])?;
        let consumer = Arc::new(consumer);
        let state = CommitState::new();

        let committer = OffsetCommitter::new(
            GroupOffsetSink::new(consumer.clone()),
            state.subscribe(),
            config.commit_interval(),
            context,
        )
        .start();

        info!(topic = config.topic(), group_id = ?config.group_id().ok(), "consumer subscribed");
        Ok(Consumer {
            consumer,
            state,
            max_wait: config.max_wait(),
            committer: Some(committer),
            topic: config.topic().to_owned(),
        })
    }

    /// Wait up to `max_wait` for the next message. `Ok(None)` means nothing
    /// arrived in time, which is not an error.
    pub async fn fetch(&self) -> Result<Option<Message>, SessionError> {
        let received = match tokio::time::timeout(self.max_wait, self.consumer.recv()).await {
            Err(_) => {
                debug!(topic = %self.topic, "no message available");
                return Ok(None);
            }
            Ok(received) => received?,
        };

        let message = Message::from_borrowed(&received);
        if let Some(position) = message.position() {
            self.state.observe(position);
        }
        Ok(Some(message))
    }

    pub fn commit_state(&self) -> &CommitState {
        &self.state
    }

    /// Offsets the group has committed for the partitions currently assigned.
    pub async fn committed(&self) -> Result<Vec<Position>, SessionError> {
        let consumer = self.consumer.clone();
        let timeout = self.max_wait;
        let list = tokio::task::spawn_blocking(move || consumer.committed(timeout))
            .await
            .map_err(|_| KafkaError::Canceled)??;

        Ok(list
            .elements()
            .iter()
            .filter_map(|element| match element.offset() {
                Offset::Offset(offset) => Some(Position {
                    topic: element.topic().to_owned(),
                    partition: element.partition(),
                    offset,
                }),
                _ => None,
            })
            .collect())
    }

    /// Stop the committer after a final commit, then leave the group.
    pub async fn close(mut self) -> Result<(), SessionError> {
        if let Some(committer) = self.committer.take() {
            committer.stop().await;
        }
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "consumer closed");
        Ok(())
    }
}
