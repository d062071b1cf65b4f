//! Append-only audit log of product events.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::SellerId;
use domain::{EventEnvelope, EventType};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::RwLock;

use crate::{NotificationError, Result};

/// One audit log record.
///
/// `pk` is `SELLER#<seller>` and `sk` is `<ts>#<type>`, so a range scan over
/// one seller's partition is chronological.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub pk: String,
    pub sk: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The event payload as JSON text.
    pub payload: String,
}

impl AuditEntry {
    /// Partition key of a seller's entries.
    pub fn partition(seller_id: &SellerId) -> String {
        format!("SELLER#{seller_id}")
    }

    pub fn from_envelope(envelope: &EventEnvelope) -> serde_json::Result<Self> {
        let event_type = envelope.event_type();
        Ok(Self {
            pk: Self::partition(&envelope.seller_id),
            sk: format!("{}#{}", envelope.ts_string(), event_type),
            event_type,
            payload: envelope.event.payload_json()?,
        })
    }
}

/// Filter for reading back a seller's audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub event_type: Option<EventType>,
    /// Keep only the most recent `limit` matching entries.
    pub limit: Option<usize>,
}

/// Durable, per-seller event log.
///
/// Writes have put semantics: writing an entry whose `(pk, sk)` already exists
/// replaces it, so a redelivered event leaves a single record.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn put(&self, entry: AuditEntry) -> Result<()>;

    /// Returns the seller's entries in sort-key order.
    async fn query(&self, seller_id: &SellerId, query: AuditQuery) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
impl<T: AuditLog + ?Sized> AuditLog for Arc<T> {
    async fn put(&self, entry: AuditEntry) -> Result<()> {
        (**self).put(entry).await
    }

    async fn query(&self, seller_id: &SellerId, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        (**self).query(seller_id, query).await
    }
}

#[derive(Default)]
struct State {
    partitions: HashMap<String, BTreeMap<String, AuditEntry>>,
    failure: Option<String>,
}

/// In-memory audit log for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    state: Arc<RwLock<State>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `NotificationError::Unavailable`
    /// until cleared with `None`.
    pub async fn set_failure(&self, reason: Option<&str>) {
        self.state.write().await.failure = reason.map(str::to_string);
    }

    /// Returns the number of stored entries, across sellers.
    pub async fn entry_count(&self) -> usize {
        self.state
            .read()
            .await
            .partitions
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn put(&self, entry: AuditEntry) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(reason) = &state.failure {
            return Err(NotificationError::Unavailable(reason.clone()));
        }
        state
            .partitions
            .entry(entry.pk.clone())
            .or_default()
            .insert(entry.sk.clone(), entry);
        Ok(())
    }

    async fn query(&self, seller_id: &SellerId, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        let Some(partition) = state.partitions.get(&AuditEntry::partition(seller_id)) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<AuditEntry> = partition
            .values()
            .rev()
            .filter(|e| query.event_type.is_none_or(|t| e.event_type == t))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

/// PostgreSQL-backed audit log over the `event_log` table.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: PgRow) -> Result<AuditEntry> {
        let event_type: String = row.try_get("event_type")?;
        let event_type = event_type
            .parse()
            .map_err(|e| NotificationError::Corrupt(format!("{e}")))?;

        Ok(AuditEntry {
            pk: row.try_get("pk")?,
            sk: row.try_get("sk")?,
            event_type,
            payload: row.try_get("payload")?,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn put(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_log (pk, sk, event_type, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pk, sk)
                DO UPDATE SET event_type = EXCLUDED.event_type, payload = EXCLUDED.payload
            "#,
        )
        .bind(&entry.pk)
        .bind(&entry.sk)
        .bind(entry.event_type.as_str())
        .bind(&entry.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, seller_id: &SellerId, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        let limit = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query(
            r#"
            SELECT pk, sk, event_type, payload FROM (
                SELECT pk, sk, event_type, payload
                FROM event_log
                WHERE pk = $1 AND ($2::text IS NULL OR event_type = $2)
                ORDER BY sk DESC
                LIMIT $3
            ) recent
            ORDER BY sk ASC
            "#,
        )
        .bind(AuditEntry::partition(seller_id))
        .bind(query.event_type.map(|t| t.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
