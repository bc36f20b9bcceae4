use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{lock, ManualClock};
use crate::services::clock::Clock;
use crate::services::queue::{
    partition_for, stream_key, Delivery, MessagePublisher, QueueConsumer, QueueError,
};

struct Entry {
    seq: u64,
    payload: String,
    committed: bool,
    /// Consumer the entry is pending for, and when it was last handed out.
    owner: Option<(String, DateTime<Utc>)>,
}

#[derive(Default)]
struct Broker {
    /// Stream key (`topic:partition`) to its entries; offset = index.
    partitions: HashMap<String, Vec<Entry>>,
    rejecting: HashSet<String>,
    seq: u64,
}

/// Partitioned in-memory work queue with manual commits and consumer-group
/// semantics.
///
/// A delivered entry stays pending for the consumer that received it until
/// committed. That consumer gets it again on its next `poll`; any other
/// consumer only gets it once it has been idle for `claim_idle` on the
/// queue's clock.
#[derive(Clone)]
pub struct MemoryQueue {
    broker: Arc<Mutex<Broker>>,
    partitions: usize,
    clock: Arc<dyn Clock>,
    claim_idle: chrono::Duration,
}

impl MemoryQueue {
    /// Queue on a clock that never moves: pending entries are never claimed
    /// by another consumer.
    pub fn new(partitions: usize) -> Self {
        Self::with_clock(
            partitions,
            Arc::new(ManualClock::default()),
            chrono::Duration::minutes(1),
        )
    }

    pub fn with_clock(
        partitions: usize,
        clock: Arc<dyn Clock>,
        claim_idle: chrono::Duration,
    ) -> Self {
        Self {
            broker: Arc::new(Mutex::new(Broker::default())),
            partitions: partitions.max(1),
            clock,
            claim_idle,
        }
    }

    /// Group member `name` reading every partition of `topic`.
    pub fn consumer(&self, topic: &str, name: &str) -> MemoryConsumer {
        MemoryConsumer {
            broker: Arc::clone(&self.broker),
            streams: (0..self.partitions).map(|p| stream_key(topic, p)).collect(),
            name: name.to_string(),
            clock: Arc::clone(&self.clock),
            claim_idle: self.claim_idle,
        }
    }

    /// Make publishes to `topic` fail (or succeed again).
    pub fn fail_publish(&self, topic: &str, fail: bool) {
        let mut broker = lock(&self.broker);
        if fail {
            broker.rejecting.insert(topic.to_string());
        } else {
            broker.rejecting.remove(topic);
        }
    }

    /// Every payload published to `topic`, in publish order.
    pub fn messages(&self, topic: &str) -> Vec<String> {
        let broker = lock(&self.broker);
        let prefix = format!("{topic}:");
        let mut entries: Vec<&Entry> = broker
            .partitions
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, entries)| entries.iter())
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.payload.clone()).collect()
    }

    /// Number of entries of `topic` not yet committed.
    pub fn uncommitted(&self, topic: &str) -> usize {
        let broker = lock(&self.broker);
        let prefix = format!("{topic}:");
        broker
            .partitions
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, entries)| entries.iter().filter(|e| !e.committed).count())
            .sum()
    }
}

#[async_trait]
impl MessagePublisher for MemoryQueue {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), QueueError> {
        let mut broker = lock(&self.broker);
        if broker.rejecting.contains(topic) {
            return Err(QueueError::Rejected(topic.to_string()));
        }

        broker.seq += 1;
        let seq = broker.seq;
        broker
            .partitions
            .entry(stream_key(topic, partition_for(key, self.partitions)))
            .or_default()
            .push(Entry {
                seq,
                payload: payload.to_string(),
                committed: false,
                owner: None,
            });
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct MemoryConsumer {
    broker: Arc<Mutex<Broker>>,
    streams: Vec<String>,
    name: String,
    clock: Arc<dyn Clock>,
    claim_idle: chrono::Duration,
}

impl MemoryConsumer {
    /// First entry across the assigned partitions matching `wanted`; it
    /// becomes pending for this consumer.
    fn take(&self, broker: &mut Broker, wanted: impl Fn(&Entry) -> bool) -> Option<Delivery> {
        let now = self.clock.now();
        for stream in &self.streams {
            let Some(entries) = broker.partitions.get_mut(stream) else {
                continue;
            };
            if let Some((offset, entry)) = entries.iter_mut().enumerate().find(|(_, e)| wanted(e)) {
                entry.owner = Some((self.name.clone(), now));
                return Some(Delivery {
                    partition: stream.clone(),
                    offset: offset.to_string(),
                    payload: entry.payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    async fn poll(&self) -> Result<Option<Delivery>, QueueError> {
        let mut broker = lock(&self.broker);
        let now = self.clock.now();

        let own = |e: &Entry| {
            !e.committed && matches!(&e.owner, Some((owner, _)) if *owner == self.name)
        };
        let idle = |e: &Entry| {
            !e.committed
                && matches!(&e.owner, Some((_, since)) if now - *since >= self.claim_idle)
        };
        let fresh = |e: &Entry| e.owner.is_none();

        let delivery = self
            .take(&mut broker, own)
            .or_else(|| self.take(&mut broker, idle))
            .or_else(|| self.take(&mut broker, fresh));
        Ok(delivery)
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut broker = lock(&self.broker);
        let offset = delivery.offset.parse::<usize>().ok();
        let entries = broker.partitions.get_mut(&delivery.partition);

        match entries.zip(offset).and_then(|(entries, offset)| entries.get_mut(offset)) {
            Some(entry) => {
                entry.committed = true;
                Ok(())
            }
            None => Err(QueueError::Rejected(delivery.partition.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncommitted_message_is_redelivered() {
        let queue = MemoryQueue::new(2);
        queue.publish("work", "7", "first").await.unwrap();
        let consumer = queue.consumer("work", "worker-1");

        let delivery = consumer.poll().await.unwrap().unwrap();
        assert_eq!(delivery.payload, "first");
        assert_eq!(consumer.poll().await.unwrap(), Some(delivery.clone()));

        consumer.commit(&delivery).await.unwrap();
        assert_eq!(consumer.poll().await.unwrap(), None);
        assert_eq!(queue.uncommitted("work"), 0);
    }

    #[tokio::test]
    async fn same_key_keeps_partition_order() {
        let queue = MemoryQueue::new(4);
        for payload in ["a", "b", "c"] {
            queue.publish("work", "42", payload).await.unwrap();
        }
        let consumer = queue.consumer("work", "worker-1");

        let mut seen = Vec::new();
        while let Some(delivery) = consumer.poll().await.unwrap() {
            seen.push(delivery.payload.clone());
            consumer.commit(&delivery).await.unwrap();
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn idle_pending_entry_is_claimed_by_another_consumer() {
        let clock = Arc::new(ManualClock::default());
        let queue = MemoryQueue::with_clock(1, clock.clone(), chrono::Duration::seconds(60));
        queue.publish("work", "7", "first").await.unwrap();
        queue.publish("work", "8", "second").await.unwrap();
        let crashed = queue.consumer("work", "worker-1");
        let replacement = queue.consumer("work", "worker-2");

        let abandoned = crashed.poll().await.unwrap().unwrap();
        assert_eq!(abandoned.payload, "first");

        // Not idle long enough: only the untouched entry is handed out
        let next = replacement.poll().await.unwrap().unwrap();
        assert_eq!(next.payload, "second");
        replacement.commit(&next).await.unwrap();
        assert_eq!(replacement.poll().await.unwrap(), None);

        clock.advance(chrono::Duration::seconds(61));
        let claimed = replacement.poll().await.unwrap().unwrap();
        assert_eq!(claimed, abandoned);

        replacement.commit(&claimed).await.unwrap();
        assert_eq!(queue.uncommitted("work"), 0);
        assert_eq!(crashed.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejected_topic_fails_publish() {
        let queue = MemoryQueue::new(1);
        queue.fail_publish("dlq", true);

        assert!(queue.publish("dlq", "1", "x").await.is_err());
        assert!(queue.messages("dlq").is_empty());
    }
}
