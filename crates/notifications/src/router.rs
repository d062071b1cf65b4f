//! Background consumer routing product events to the audit log and to live
//! subscribers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{CONSUMER_GROUP, EventEnvelope, EventType, TOPIC};
use event_bus::{EventBus, Message, OffsetReset};

use crate::Result;
use crate::audit::{AuditEntry, AuditLog};
use crate::registry::SubscriberRegistry;

/// Settings read once at startup.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub topic: String,
    pub group: String,
    /// Where the group starts when it has never committed.
    pub reset: OffsetReset,
    pub audit_enabled: bool,
    /// Pause after a failed poll before trying again.
    pub retry_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            topic: TOPIC.to_string(),
            group: CONSUMER_GROUP.to_string(),
            reset: OffsetReset::Latest,
            audit_enabled: false,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Consumes the product topic as one consumer group.
///
/// For every event: writes it to the audit log when enabled, pushes it to the
/// seller's live subscribers when it is alert-class, then commits. Audit and
/// push failures are logged and never hold up the stream. An event is only
/// committed after it has been routed, so a restart redelivers whatever was
/// in flight.
pub struct NotificationRouter<B: EventBus> {
    bus: B,
    audit: Arc<dyn AuditLog>,
    registry: Arc<SubscriberRegistry>,
    config: RouterConfig,
}

impl<B: EventBus> NotificationRouter<B> {
    pub fn new(
        bus: B,
        audit: Arc<dyn AuditLog>,
        registry: Arc<SubscriberRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            bus,
            audit,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Runs until `shutdown` resolves, finishing the event in hand first.
    ///
    /// Only joining the consumer group can fail; errors after that are
    /// logged and retried.
    #[tracing::instrument(skip_all, fields(group = %self.config.group, topic = %self.config.topic))]
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let mut consumer = self
            .bus
            .subscribe(&self.config.group, &self.config.topic, self.config.reset)
            .await?;
        tracing::info!(
            audit_enabled = self.config.audit_enabled,
            "notification router started"
        );

        tokio::pin!(shutdown);
        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                polled = consumer.poll() => polled,
            };

            let message = match polled {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed, retrying");
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.retry_backoff) => continue,
                    }
                }
            };

            self.route(&message).await;

            if let Err(e) = consumer.commit(&message).await {
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "offset commit failed, event may be redelivered"
                );
            }
        }

        tracing::info!("notification router stopped");
        Ok(())
    }

    /// Routes one backbone message. Returns the event type, or None when the
    /// message could not be decoded and was skipped.
    pub async fn route(&self, message: &Message) -> Option<EventType> {
        let envelope = match EventEnvelope::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::counter!("router_undecodable_total").increment(1);
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "undecodable event skipped"
                );
                return None;
            }
        };
        let event_type = envelope.event_type();

        if self.config.audit_enabled {
            self.persist(&envelope).await;
        }

        if event_type.is_alert() {
            let text = String::from_utf8_lossy(&message.payload);
            self.registry.push(&envelope.seller_id, &text);
        }

        metrics::counter!("router_events_processed_total", "type" => event_type.as_str())
            .increment(1);
        if let Ok(latency) = (Utc::now() - envelope.ts).to_std() {
            metrics::histogram!("router_event_latency_seconds").record(latency.as_secs_f64());
        }
        tracing::debug!(
            seller_id = %envelope.seller_id,
            %event_type,
            partition = message.partition,
            offset = message.offset,
            "event routed"
        );

        Some(event_type)
    }

    async fn persist(&self, envelope: &EventEnvelope) {
        let result = match AuditEntry::from_envelope(envelope) {
            Ok(entry) => self.audit.put(entry).await,
            Err(e) => Err(crate::NotificationError::Corrupt(e.to_string())),
        };

        if let Err(e) = result {
            metrics::counter!("audit_persist_failures_total").increment(1);
            tracing::warn!(
                seller_id = %envelope.seller_id,
                event_type = %envelope.event_type(),
                error = %e,
                "audit log write failed"
            );
        }
    }
}
