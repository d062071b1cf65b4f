use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::{
    BusError, Message, Result,
    bus::{EventBus, EventConsumer, OffsetReset},
    partition_for,
};

type GroupKey = (String, String, u32);

/// Retained tail of one partition.
#[derive(Clone, Default)]
struct PartitionLog {
    /// Offset of the first retained message.
    base: u64,
    messages: VecDeque<Message>,
}

impl PartitionLog {
    fn next_offset(&self) -> u64 {
        self.base + self.messages.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Message> {
        let index = offset.checked_sub(self.base)?;
        self.messages.get(index as usize)
    }

    /// Drops every message below `offset`.
    fn truncate_before(&mut self, offset: u64) -> usize {
        let count = offset.saturating_sub(self.base).min(self.messages.len() as u64);
        self.messages.drain(..count as usize);
        self.base += count;
        count as usize
    }
}

#[derive(Default)]
struct State {
    /// Topic name -> partitions.
    topics: HashMap<String, Vec<PartitionLog>>,
    /// Next offset to deliver per (group, topic, partition).
    committed: HashMap<GroupKey, u64>,
    /// Every accepted publish, in acceptance order. Only kept when recording.
    journal: Vec<Message>,
    failure: Option<String>,
    failure_after: usize,
}

impl State {
    fn partitions_mut(&mut self, topic: &str, partitions: u32) -> &mut Vec<PartitionLog> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![PartitionLog::default(); partitions as usize])
    }

    /// Lowest committed offset of any group on a partition.
    fn low_watermark(&self, topic: &str, partition: u32) -> Option<u64> {
        self.committed
            .iter()
            .filter(|((_, t, p), _)| t == topic && *p == partition)
            .map(|(_, offset)| *offset)
            .min()
    }
}

/// In-memory partitioned backbone for tests and single-process runs.
///
/// A message is retained until every consumer group on its topic has
/// committed past it. Messages published before any group joins are kept, so
/// a group subscribing with [`OffsetReset::Earliest`] still sees them.
#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    partitions: u32,
    recording: bool,
}

impl InMemoryEventBus {
    /// Creates a bus whose topics have `partitions` partitions.
    pub fn new(partitions: u32) -> Result<Self> {
        if partitions == 0 {
            return Err(BusError::NoPartitions);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            partitions,
            recording: false,
        })
    }

    /// Also records every accepted publish for [`published`](Self::published).
    ///
    /// The record is never trimmed; meant for tests.
    pub fn with_journal(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Returns the partition count of every topic on this bus.
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Makes publishes fail with `BusError::Rejected(reason)` once `after`
    /// more publishes have succeeded. `None` clears the failure.
    pub async fn fail_publishes(&self, reason: Option<&str>, after: usize) {
        let mut state = self.state.lock().await;
        state.failure = reason.map(str::to_string);
        state.failure_after = after;
    }

    /// Returns every message accepted on `topic`, in publish order.
    ///
    /// Empty unless the bus was built [`with_journal`](Self::with_journal).
    pub async fn published(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns how many messages of `topic` are still held, over all partitions.
    pub async fn retained(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|logs| logs.iter().map(|log| log.messages.len()).sum())
            .unwrap_or(0)
    }

    /// Returns the committed offset of a group on one partition.
    pub async fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.state
            .lock()
            .await
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(reason) = state.failure.clone() {
            if state.failure_after == 0 {
                metrics::counter!("bus_publish_rejected_total").increment(1);
                return Err(BusError::Rejected(reason));
            }
            state.failure_after -= 1;
        }

        let partition = partition_for(key, self.partitions);
        let log = &mut state.partitions_mut(topic, self.partitions)[partition as usize];
        let message = Message {
            topic: topic.to_string(),
            partition,
            offset: log.next_offset(),
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        };
        if self.recording {
            log.messages.push_back(message.clone());
            state.journal.push(message);
        } else {
            log.messages.push_back(message);
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn EventConsumer>> {
        let mut state = self.state.lock().await;
        let bounds: Vec<(u64, u64)> = state
            .partitions_mut(topic, self.partitions)
            .iter()
            .map(|log| (log.base, log.next_offset()))
            .collect();

        let mut positions = Vec::with_capacity(bounds.len());
        for (partition, (base, next)) in bounds.into_iter().enumerate() {
            let key = (group.to_string(), topic.to_string(), partition as u32);
            let start = match reset {
                OffsetReset::Latest => next,
                OffsetReset::Earliest => base,
            };
            // The starting point is committed right away so a restart before
            // the first commit still resumes here.
            let position = *state.committed.entry(key).or_insert(start);
            positions.push(position);
        }

        tracing::debug!(group, topic, ?positions, "consumer joined group");

        Ok(Box::new(InMemoryConsumer {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
            group: group.to_string(),
            topic: topic.to_string(),
            positions,
            next_partition: 0,
        }))
    }
}

/// Consumer handed out by [`InMemoryEventBus::subscribe`].
struct InMemoryConsumer {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    group: String,
    topic: String,
    positions: Vec<u64>,
    next_partition: usize,
}

impl InMemoryConsumer {
    /// Takes the next undelivered message, rotating over partitions so a busy
    /// partition does not starve the others.
    async fn take_ready(&mut self) -> Option<Message> {
        let state = self.state.lock().await;
        let partitions = state.topics.get(&self.topic)?;
        let count = self.positions.len();

        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            let log = &partitions[partition];
            let position = self.positions[partition].max(log.base);
            if let Some(message) = log.get(position) {
                self.positions[partition] = position + 1;
                self.next_partition = (partition + 1) % count;
                return Some(message.clone());
            }
        }
        None
    }
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn poll(&mut self) -> Result<Message> {
        let notify = Arc::clone(&self.notify);
        loop {
            // Registered before checking so a publish in between is not missed.
            let notified = notify.notified();
            if let Some(message) = self.take_ready().await {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (self.group.clone(), message.topic.clone(), message.partition);
        let next = message.offset + 1;
        let committed = state.committed.entry(key).or_insert(next);
        if *committed < next {
            *committed = next;
        }

        // Every group is past this point, nobody can ask for it again.
        let Some(watermark) = state.low_watermark(&message.topic, message.partition) else {
            return Ok(());
        };
        if let Some(log) = state
            .topics
            .get_mut(&message.topic)
            .and_then(|logs| logs.get_mut(message.partition as usize))
        {
            let dropped = log.truncate_before(watermark);
            if dropped > 0 {
                tracing::trace!(
                    topic = %message.topic,
                    partition = message.partition,
                    dropped,
                    "released consumed messages"
                );
            }
        }
        Ok(())
    }
}
