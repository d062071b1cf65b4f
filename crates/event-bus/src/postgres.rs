use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};

use crate::{
    BusError, Message, Result,
    bus::{EventBus, EventConsumer, OffsetReset},
    partition_for,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on messages buffered by one fetch, shared across partitions.
const FETCH_BATCH: i64 = 100;

/// PostgreSQL-backed backbone.
///
/// Offsets are assigned under a per-partition advisory lock, so messages
/// sharing a key are totally ordered even with many publishers.
#[derive(Clone)]
pub struct PostgresEventBus {
    pool: PgPool,
    partitions: u32,
    poll_interval: Duration,
}

impl PostgresEventBus {
    /// Creates a bus on an existing pool.
    pub fn new(pool: PgPool, partitions: u32) -> Result<Self> {
        if partitions == 0 {
            return Err(BusError::NoPartitions);
        }
        Ok(Self {
            pool,
            partitions,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Connects to the first reachable broker in `brokers`, in order.
    pub async fn connect(brokers: &[String], partitions: u32) -> Result<Self> {
        for (index, broker) in brokers.iter().enumerate() {
            let connected = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect(broker)
                .await;
            match connected {
                Ok(pool) => {
                    tracing::info!(broker_index = index, "connected to event bus broker");
                    return Self::new(pool, partitions);
                }
                Err(e) => {
                    tracing::warn!(broker_index = index, error = %e, "event bus broker unreachable");
                }
            }
        }
        Err(BusError::NoBrokerReachable(brokers.len()))
    }

    /// Sets how long an idle consumer sleeps between fetches.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the bus tables on the connected broker if they are missing.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for PostgresEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let partition = partition_for(key, self.partitions) as i32;
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(topic)
            .bind(partition)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO bus_messages (topic, partition, "offset", key, payload)
            SELECT $1, $2, COALESCE(MAX("offset") + 1, 0), $3, $4
            FROM bus_messages
            WHERE topic = $1 AND partition = $2
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(key)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        group: &str,
        topic: &str,
        reset: OffsetReset,
    ) -> Result<Box<dyn EventConsumer>> {
        let mut tx = self.pool.begin().await?;
        let mut positions = Vec::with_capacity(self.partitions as usize);

        for partition in 0..self.partitions as i32 {
            let start: i64 = match reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => sqlx::query_scalar(
                    r#"SELECT COALESCE(MAX("offset") + 1, 0) FROM bus_messages WHERE topic = $1 AND partition = $2"#,
                )
                .bind(topic)
                .bind(partition)
                .fetch_one(&mut *tx)
                .await?,
            };

            // Existing commits win; a fresh group records its starting point.
            let position: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO bus_consumer_offsets (group_id, topic, partition, next_offset)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (group_id, topic, partition)
                    DO UPDATE SET next_offset = bus_consumer_offsets.next_offset
                RETURNING next_offset
                "#,
            )
            .bind(group)
            .bind(topic)
            .bind(partition)
            .bind(start)
            .fetch_one(&mut *tx)
            .await?;

            positions.push(position);
        }

        tx.commit().await?;
        tracing::debug!(group, topic, ?positions, "consumer joined group");

        Ok(Box::new(PostgresConsumer {
            pool: self.pool.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            positions,
            buffer: VecDeque::new(),
            poll_interval: self.poll_interval,
        }))
    }
}

/// Consumer handed out by [`PostgresEventBus::subscribe`].
struct PostgresConsumer {
    pool: PgPool,
    group: String,
    topic: String,
    positions: Vec<i64>,
    buffer: VecDeque<Message>,
    poll_interval: Duration,
}

impl PostgresConsumer {
    /// Buffers the next messages of every partition, at most an equal share
    /// of [`FETCH_BATCH`] each, so a backlog on one partition cannot hold the
    /// others back.
    async fn fetch(&mut self) -> Result<()> {
        let partitions: Vec<i32> = (0..self.positions.len() as i32).collect();
        let per_partition = (FETCH_BATCH / self.positions.len().max(1) as i64).max(1);

        let rows = sqlx::query(
            r#"
            SELECT m.partition, m."offset", m.key, m.payload, m.published_at
            FROM UNNEST($2::int4[], $3::int8[]) AS pos(partition, next_offset)
            CROSS JOIN LATERAL (
                SELECT b.partition, b."offset", b.key, b.payload, b.published_at
                FROM bus_messages b
                WHERE b.topic = $1
                  AND b.partition = pos.partition
                  AND b."offset" >= pos.next_offset
                ORDER BY b."offset"
                LIMIT $4
            ) m
            ORDER BY m.partition, m."offset"
            "#,
        )
        .bind(&self.topic)
        .bind(partitions)
        .bind(self.positions.clone())
        .bind(per_partition)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let message = row_to_message(&self.topic, row)?;
            self.positions[message.partition as usize] = message.offset as i64 + 1;
            self.buffer.push_back(message);
        }
        Ok(())
    }
}

fn row_to_message(topic: &str, row: PgRow) -> Result<Message> {
    Ok(Message {
        topic: topic.to_string(),
        partition: row.try_get::<i32, _>("partition")? as u32,
        offset: row.try_get::<i64, _>("offset")? as u64,
        key: row.try_get("key")?,
        payload: row.try_get("payload")?,
        published_at: row.try_get("published_at")?,
    })
}

#[async_trait]
impl EventConsumer for PostgresConsumer {
    async fn poll(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(message);
            }
            self.fetch().await?;
            if self.buffer.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bus_consumer_offsets (group_id, topic, partition, next_offset)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, topic, partition)
                DO UPDATE SET next_offset = GREATEST(bus_consumer_offsets.next_offset, EXCLUDED.next_offset)
            "#,
        )
        .bind(&self.group)
        .bind(&message.topic)
        .bind(message.partition as i32)
        .bind(message.offset as i64 + 1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
