use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PAYLOAD_FIELD: &str = "payload";

/// Work message published for every new moderation task.
///
/// `item_id` carries the *task* id; the worker re-resolves the advertisement
/// through the task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationMessage {
    pub item_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl ModerationMessage {
    pub fn for_task(task_id: i64) -> Self {
        Self {
            item_id: task_id,
            timestamp: Utc::now(),
        }
    }
}

/// Record written to the dead-letter topic once a message exhausts its retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterMessage {
    /// Advertisement id of the task, when the task could be resolved.
    pub item_id: Option<i64>,
    pub error: String,
    pub original_message: String,
}

/// A message handed to a consumer, identified by its partition and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: String,
    pub offset: String,
    pub payload: String,
}

/// Producer side of the work queue.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Append `payload` to `topic`; `key` selects the partition.
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Consumer side of the work queue. Delivery is at-least-once: a message
/// stays pending until `commit` and is handed out again by the next `poll`.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    async fn poll(&self) -> Result<Option<Delivery>, QueueError>;
    async fn commit(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

/// Stable partition assignment for a message key (FNV-1a).
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % partitions.max(1) as u64) as usize
}

/// Stream key backing one partition of a topic.
pub fn stream_key(topic: &str, partition: usize) -> String {
    format!("{topic}:{partition}")
}

/// Redis Streams producer: one stream per topic partition.
pub struct StreamPublisher {
    client: redis::Client,
    partitions: usize,
}

impl StreamPublisher {
    pub fn new(redis_url: &str, partitions: usize) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            partitions: partitions.max(1),
        })
    }
}

#[async_trait]
impl MessagePublisher for StreamPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = stream_key(topic, partition_for(key, self.partitions));
        let entry_id: String = conn.xadd(&stream, "*", &[(PAYLOAD_FIELD, payload)]).await?;
        tracing::debug!(stream = %stream, entry_id = %entry_id, key = %key, "Message appended");
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Redis Streams consumer bound to a consumer group and a set of partitions.
///
/// `poll` hands out, in order: entries already delivered to this consumer
/// but not acknowledged, entries another consumer left unacknowledged for
/// longer than `claim_min_idle` (claimed with XAUTOCLAIM), then new entries.
/// A restarted worker keeps its pending list when it reuses its consumer
/// name; entries of a consumer that never comes back are claimed by the rest
/// of the group.
pub struct StreamConsumer {
    client: redis::Client,
    streams: Vec<String>,
    group: String,
    consumer: String,
    block: Duration,
    claim_min_idle: Duration,
}

impl StreamConsumer {
    pub fn new(
        redis_url: &str,
        topic: &str,
        partitions: &[usize],
        group: &str,
        consumer: &str,
        block: Duration,
        claim_min_idle: Duration,
    ) -> Result<Self, QueueError> {
        if partitions.is_empty() {
            return Err(QueueError::NoPartitions(topic.to_string()));
        }
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            streams: partitions.iter().map(|p| stream_key(topic, *p)).collect(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            // BLOCK 0 waits forever
            block: block.max(Duration::from_millis(1)),
            claim_min_idle,
        })
    }

    /// Create the consumer group on every assigned stream (idempotent).
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        for stream in &self.streams {
            let created: Result<(), redis::RedisError> =
                conn.xgroup_create_mkstream(stream, &self.group, "0").await;
            match created {
                Ok(()) => tracing::info!(stream = %stream, group = %self.group, "Consumer group created"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        start: &str,
        block: Option<Duration>,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }
        let ids = vec![start; self.streams.len()];

        let reply: Option<StreamReadReply> =
            conn.xread_options(&self.streams, &ids, &options).await?;

        let Some(reply) = reply else {
            return Ok(None);
        };
        for stream in reply.keys {
            if let Some(entry) = stream.ids.into_iter().next() {
                return Ok(Some(delivery_from(stream.key, entry)));
            }
        }
        Ok(None)
    }

    /// Take over the oldest entry another consumer has left idle.
    async fn claim_idle(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<Delivery>, QueueError> {
        let min_idle = self.claim_min_idle.as_millis() as usize;
        for stream in &self.streams {
            let reply: StreamAutoClaimReply = conn
                .xautoclaim_options(
                    stream,
                    &self.group,
                    &self.consumer,
                    min_idle,
                    "0-0",
                    StreamAutoClaimOptions::default().count(1),
                )
                .await?;
            if let Some(entry) = reply.claimed.into_iter().next() {
                tracing::warn!(
                    stream = %stream,
                    entry_id = %entry.id,
                    consumer = %self.consumer,
                    "Claimed idle entry from another consumer"
                );
                return Ok(Some(delivery_from(stream.clone(), entry)));
            }
        }
        Ok(None)
    }
}

fn delivery_from(partition: String, entry: StreamId) -> Delivery {
    let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    Delivery {
        partition,
        offset: entry.id,
        payload,
    }
}

#[async_trait]
impl QueueConsumer for StreamConsumer {
    async fn poll(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if let Some(pending) = self.read(&mut conn, "0", None).await? {
            return Ok(Some(pending));
        }
        if let Some(claimed) = self.claim_idle(&mut conn).await? {
            return Ok(Some(claimed));
        }
        self.read(&mut conn, ">", Some(self.block)).await
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.xack::<_, _, _, ()>(&delivery.partition, &self.group, &[&delivery.offset])
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Topic {0} rejected the message")]
    Rejected(String),

    #[error("No partitions of topic {0} assigned to this consumer")]
    NoPartitions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["1", "2", "17", "100500"] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn work_message_carries_task_id_and_iso_timestamp() {
        let message = ModerationMessage::for_task(12);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["item_id"], 12);
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn dead_letter_keeps_original_payload_verbatim() {
        let original = r#"{"item_id":3,"timestamp":"2025-01-01T00:00:00Z"}"#;
        let dead = DeadLetterMessage {
            item_id: Some(8),
            error: "All retries failed: advertisement 8 not found".to_string(),
            original_message: original.to_string(),
        };
        let json = serde_json::to_value(&dead).unwrap();

        assert_eq!(json["item_id"], 8);
        assert_eq!(json["original_message"], original);
    }

    #[test]
    fn stream_keys_are_namespaced_by_topic() {
        assert_eq!(stream_key("moderation", 2), "moderation:2");
    }

    #[test]
    fn zero_poll_interval_still_blocks_for_a_bounded_time() {
        let consumer = StreamConsumer::new(
            "redis://localhost:6379",
            "moderation",
            &[0],
            "moderation_workers",
            "worker-1",
            Duration::ZERO,
            Duration::from_secs(60),
        )
        .unwrap();

        assert_eq!(consumer.block, Duration::from_millis(1));
    }

    #[test]
    fn consumer_without_partitions_is_rejected() {
        let result = StreamConsumer::new(
            "redis://localhost:6379",
            "moderation",
            &[],
            "moderation_workers",
            "worker-1",
            Duration::from_secs(1),
            Duration::from_secs(60),
        );

        assert!(matches!(result, Err(QueueError::NoPartitions(topic)) if topic == "moderation"));
    }
}
