//! Live subscribers, grouped by seller.
//!
//! Each seller has its own membership list behind its own mutex, so pushes
//! and membership changes for different sellers never contend. Delivery never
//! waits on a sink: a full sink misses that message, a closed one is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use common::SellerId;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a sink did not take a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The sink is alive but has no room; this message is dropped for it.
    Full,
    /// The sink is gone and will never accept again.
    Closed,
}

/// Write-only, non-blocking delivery target for live messages.
pub trait PushSink: Send + Sync + 'static {
    fn try_push(&self, message: &str) -> Result<(), PushError>;
}

impl PushSink for mpsc::Sender<String> {
    fn try_push(&self, message: &str) -> Result<(), PushError> {
        self.try_send(message.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

impl PushSink for mpsc::UnboundedSender<String> {
    fn try_push(&self, message: &str) -> Result<(), PushError> {
        self.send(message.to_string()).map_err(|_| PushError::Closed)
    }
}

/// Opaque handle of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one [`SubscriberRegistry::push`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

struct Member {
    id: SubscriptionId,
    sink: Box<dyn PushSink>,
}

type Members = Arc<Mutex<Vec<Member>>>;

/// Registry of live subscribers keyed by seller.
#[derive(Default)]
pub struct SubscriberRegistry {
    sellers: RwLock<HashMap<SellerId, Members>>,
    total: AtomicUsize,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink` for the seller's live messages.
    pub fn subscribe(&self, seller_id: &SellerId, sink: impl PushSink) -> SubscriptionId {
        let id = SubscriptionId::new();
        let total = {
            // Held across the insert so a concurrent unsubscribe cannot drop
            // the seller's list between lookup and push. Counted under the
            // same lock so `close_all` never forgets an uncounted member.
            let mut sellers = self.sellers.write().unwrap_or_else(PoisonError::into_inner);
            sellers
                .entry(seller_id.clone())
                .or_default()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Member {
                    id,
                    sink: Box::new(sink),
                });
            self.total.fetch_add(1, Ordering::Relaxed) + 1
        };

        metrics::gauge!("live_subscribers").set(total as f64);
        tracing::info!(%seller_id, subscription_id = %id, total, "live subscriber added");
        id
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, seller_id: &SellerId, id: SubscriptionId) -> bool {
        let mut sellers = self.sellers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(members) = sellers.get(seller_id) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut members = members.lock().unwrap_or_else(PoisonError::into_inner);
            let before = members.len();
            members.retain(|m| m.id != id);
            (before - members.len(), members.is_empty())
        };
        if now_empty {
            sellers.remove(seller_id);
        }
        drop(sellers);

        if removed > 0 {
            self.forget(removed);
            tracing::info!(%seller_id, subscription_id = %id, "live subscriber removed");
        }
        removed > 0
    }

    /// Delivers `message` to every current subscriber of the seller.
    ///
    /// Never blocks on a sink and never fails: sinks that report closure are
    /// removed, sinks that are full miss this message.
    pub fn push(&self, seller_id: &SellerId, message: &str) -> PushReport {
        let members = {
            let sellers = self.sellers.read().unwrap_or_else(PoisonError::into_inner);
            match sellers.get(seller_id) {
                Some(members) => Arc::clone(members),
                None => return PushReport::default(),
            }
        };

        let mut report = PushReport::default();
        let now_empty = {
            let mut members = members.lock().unwrap_or_else(PoisonError::into_inner);
            members.retain(|member| match member.sink.try_push(message) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(PushError::Full) => {
                    report.dropped += 1;
                    tracing::warn!(
                        %seller_id,
                        subscription_id = %member.id,
                        "live subscriber queue full, message dropped"
                    );
                    true
                }
                Err(PushError::Closed) => {
                    report.removed += 1;
                    false
                }
            });
            members.is_empty()
        };

        if report.removed > 0 && now_empty {
            self.remove_if_empty(seller_id, &members);
        }
        if report.removed > 0 {
            self.forget(report.removed);
            tracing::info!(%seller_id, removed = report.removed, "closed live subscribers removed");
        }
        metrics::counter!("live_pushes_total").increment(report.delivered as u64);
        metrics::counter!("live_push_dropped_total").increment(report.dropped as u64);
        tracing::debug!(%seller_id, delivered = report.delivered, "live push");
        report
    }

    /// Number of live subscriptions for one seller.
    pub fn subscriber_count(&self, seller_id: &SellerId) -> usize {
        let sellers = self.sellers.read().unwrap_or_else(PoisonError::into_inner);
        sellers.get(seller_id).map_or(0, |members| {
            members.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Number of sellers with at least one live subscription.
    pub fn seller_count(&self) -> usize {
        self.sellers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live subscriptions across sellers.
    pub fn total_subscribers(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Registers a bounded channel for the seller and returns its receiving
    /// end, unregistered again when dropped.
    pub fn open(self: &Arc<Self>, seller_id: &SellerId, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(seller_id, tx);
        Subscription {
            receiver: rx,
            guard: SubscriptionGuard {
                registry: Arc::downgrade(self),
                seller_id: seller_id.clone(),
                id,
            },
        }
    }

    /// Drops every registration. Receivers see their channel close once
    /// drained, which ends long-lived streams during shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Members> = {
            let mut sellers = self.sellers.write().unwrap_or_else(PoisonError::into_inner);
            sellers.drain().map(|(_, members)| members).collect()
        };

        let closed: usize = drained
            .iter()
            .map(|members| {
                let mut members = members.lock().unwrap_or_else(PoisonError::into_inner);
                let count = members.len();
                members.clear();
                count
            })
            .sum();
        if closed > 0 {
            self.forget(closed);
        }
        tracing::info!(closed, "live subscribers closed");
        closed
    }

    /// Drops the seller's entry if it is still `members` and still empty;
    /// a subscribe may have raced in since the list was emptied.
    fn remove_if_empty(&self, seller_id: &SellerId, members: &Members) {
        let mut sellers = self.sellers.write().unwrap_or_else(PoisonError::into_inner);
        let unused = sellers.get(seller_id).is_some_and(|current| {
            Arc::ptr_eq(current, members)
                && current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_empty()
        });
        if unused {
            sellers.remove(seller_id);
        }
    }

    fn forget(&self, count: usize) {
        let total = self.total.fetch_sub(count, Ordering::Relaxed) - count;
        metrics::gauge!("live_subscribers").set(total as f64);
    }
}

/// RAII handle that unregisters a subscription on drop.
#[derive(Debug)]
pub struct SubscriptionGuard {
    registry: Weak<SubscriberRegistry>,
    seller_id: SellerId,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.seller_id, self.id);
        }
    }
}

/// Receiving end of a registry channel; keeps the registration alive.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<String>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.guard.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<String, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Splits into the raw receiver and the guard that must outlive it.
    pub fn into_parts(self) -> (mpsc::Receiver<String>, SubscriptionGuard) {
        (self.receiver, self.guard)
    }
}
