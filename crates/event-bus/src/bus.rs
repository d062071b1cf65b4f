use std::sync::Arc;

use async_trait::async_trait;

use crate::{Message, Result};

/// Where a consumer group with no committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Only messages published after the group first subscribed.
    #[default]
    Latest,
    /// Everything still retained in the topic.
    Earliest,
}

/// Producer and consumer-group factory for a partitioned backbone.
///
/// Publishing is fire-and-forget from the caller's point of view: once
/// `publish` returns `Ok`, the message is durable in the backbone and the
/// caller never waits for consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends a message to the partition selected by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;

    /// Joins consumer group `group` on `topic`.
    ///
    /// A group that has committed offsets resumes from them; otherwise it
    /// starts at `reset`.
    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn EventConsumer>>;
}

/// A member of a consumer group.
#[async_trait]
pub trait EventConsumer: Send {
    /// Waits for the next message. Within one partition messages arrive in
    /// offset order.
    ///
    /// Dropping the future before it resolves loses nothing: a message is
    /// only handed out when the future completes.
    async fn poll(&mut self) -> Result<Message>;

    /// Records that `message` (and everything before it in its partition)
    /// has been handled by this group.
    async fn commit(&mut self, message: &Message) -> Result<()>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        (**self).publish(topic, key, payload).await
    }

    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn EventConsumer>> {
        (**self).subscribe(group, topic, reset).await
    }
}
