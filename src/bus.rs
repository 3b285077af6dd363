// ===============================
// src/bus.rs (event bus)
// ===============================
//
// In-process ordered log with Redis-stream-style consumer groups:
// - per-topic append-only entries, producer order preserved
// - each group sees every entry at least once; ack is per message
// - blocking poll with a bounded timeout (caller supplies it)
// - nack requeues for redelivery; after `max_deliveries` the envelope is
//   routed to the dead-letter topic and dropped from the source group
//
// Side-effecting consumers must stay idempotent on a business key; the
// delivery seq is a bus detail and never a deduplication key.
//
// Every published envelope is mirrored to the JSONL recorder when one is
// attached, which is what makes the log survive the process.
//
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};

use crate::domain::{BusMessage, RecordedEnvelope};
use crate::metrics::{BUS_DEAD_LETTERS, BUS_PUBLISHED};

pub const TOPIC_MARKET_DATA: &str = "market.data";
pub const TOPIC_STRATEGY_DECISIONS: &str = "strategy.decisions";
pub const TOPIC_EXECUTION_REQUESTS: &str = "execution.requests";
pub const TOPIC_DEAD_LETTERS: &str = "dead.letters";

/// One delivered message. `deliveries` counts this delivery too.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub deliveries: u32,
    pub msg: BusMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

struct Entry {
    seq: u64,
    msg: BusMessage,
}

#[derive(Default)]
struct Group {
    next_index: usize,
    redeliver: VecDeque<u64>,
    pending: HashMap<u64, Pending>,
}

struct Pending {
    index: usize,
    deliveries: u32,
    consumer: String,
}

#[derive(Default)]
struct TopicLog {
    entries: Vec<Entry>,
    groups: HashMap<String, Group>,
}

struct BusInner {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
    rec_tx: Option<mpsc::Sender<RecordedEnvelope>>,
    max_deliveries: u32,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new(max_deliveries: u32, rec_tx: Option<mpsc::Sender<RecordedEnvelope>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                rec_tx,
                max_deliveries: max_deliveries.max(1),
            }),
        }
    }

    /// Append to the topic log and wake all pollers. Returns the sequence id.
    pub fn publish(&self, topic: &str, msg: BusMessage) -> u64 {
        let ts_ms = chrono::Utc::now().timestamp_millis();
        let seq = {
            let mut topics = self.inner.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let seq = log.entries.len() as u64 + 1;
            log.entries.push(Entry {
                seq,
                msg: msg.clone(),
            });
            seq
        };
        BUS_PUBLISHED.with_label_values(&[topic]).inc();

        if let Some(tx) = &self.inner.rec_tx {
            // Recorder lag must never backpressure the pipeline.
            let _ = tx.try_send(RecordedEnvelope {
                topic: topic.to_string(),
                seq,
                ts_ms,
                msg,
            });
        }

        self.inner.notify.notify_waiters();
        seq
    }

    /// Non-blocking read for one named consumer of a group: redeliveries
    /// first, then the next unread entry. The message stays pending until
    /// acked or nacked.
    pub fn try_read(&self, topic: &str, group: &str, consumer: &str) -> Option<Delivery> {
        let mut topics = self.inner.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        let entries_len = log.entries.len();
        let g = log.groups.entry(group.to_string()).or_default();

        if let Some(seq) = g.redeliver.pop_front() {
            if let Some(p) = g.pending.get_mut(&seq) {
                p.deliveries += 1;
                p.consumer = consumer.to_string();
                let deliveries = p.deliveries;
                let index = p.index;
                let entry = &log.entries[index];
                return Some(Delivery {
                    seq,
                    deliveries,
                    msg: entry.msg.clone(),
                });
            }
        }

        if g.next_index < entries_len {
            let index = g.next_index;
            g.next_index += 1;
            let seq = log.entries[index].seq;
            g.pending.insert(seq, Pending {
                index,
                deliveries: 1,
                consumer: consumer.to_string(),
            });
            let entry = &log.entries[index];
            return Some(Delivery {
                seq,
                deliveries: 1,
                msg: entry.msg.clone(),
            });
        }

        None
    }

    /// Blocking poll, bounded by `timeout`. Returns None on timeout so the
    /// consumer loop can observe shutdown between polls.
    pub async fn poll(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Option<Delivery> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            if let Some(d) = self.try_read(topic, group, consumer) {
                return Some(d);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Acknowledge successful (or terminally handled) processing.
    pub fn ack(&self, topic: &str, group: &str, seq: u64) {
        let mut topics = self.inner.topics.lock();
        if let Some(log) = topics.get_mut(topic) {
            if let Some(g) = log.groups.get_mut(group) {
                g.pending.remove(&seq);
            }
        }
    }

    /// Report failed processing. Requeues for redelivery until the delivery
    /// budget is spent, then routes the envelope to the dead-letter topic.
    pub fn nack(&self, topic: &str, group: &str, seq: u64) -> NackOutcome {
        let dead = {
            let mut topics = self.inner.topics.lock();
            let Some(log) = topics.get_mut(topic) else {
                return NackOutcome::Requeued;
            };
            let Some(g) = log.groups.get_mut(group) else {
                return NackOutcome::Requeued;
            };
            let Some(p) = g.pending.get(&seq) else {
                return NackOutcome::Requeued;
            };

            if p.deliveries < self.inner.max_deliveries {
                g.redeliver.push_back(seq);
                None
            } else {
                let Some(p) = g.pending.remove(&seq) else {
                    return NackOutcome::Requeued;
                };
                Some((
                    p.consumer,
                    BusMessage::Dead {
                        origin_topic: topic.to_string(),
                        group: group.to_string(),
                        deliveries: p.deliveries,
                        inner: Box::new(log.entries[p.index].msg.clone()),
                    },
                ))
            }
        };

        match dead {
            Some((consumer, envelope)) => {
                BUS_DEAD_LETTERS.with_label_values(&[topic]).inc();
                tracing::warn!(%topic, %group, %consumer, seq, "delivery budget spent, dead-lettering");
                self.publish(TOPIC_DEAD_LETTERS, envelope);
                NackOutcome::DeadLettered
            }
            None => {
                self.inner.notify.notify_waiters();
                NackOutcome::Requeued
            }
        }
    }

    /// Entries ever published to a topic (all groups share the same log).
    pub fn topic_len(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|l| l.entries.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BusMessage;

    fn note(s: &str) -> BusMessage {
        BusMessage::Note(s.to_string())
    }

    fn text(d: &Delivery) -> String {
        match &d.msg {
            BusMessage::Note(s) => s.clone(),
            other => panic!("unexpected message kind {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn preserves_producer_order_per_group() {
        let bus = Bus::new(3, None);
        bus.publish("t", note("a"));
        bus.publish("t", note("b"));
        bus.publish("t", note("c"));

        let mut seen = Vec::new();
        while let Some(d) = bus.try_read("t", "g", "c1") {
            seen.push(text(&d));
            bus.ack("t", "g", d.seq);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn each_group_receives_every_message() {
        let bus = Bus::new(3, None);
        bus.publish("t", note("x"));
        bus.publish("t", note("y"));

        for group in ["g1", "g2"] {
            let mut seen = Vec::new();
            while let Some(d) = bus.try_read("t", group, "c1") {
                seen.push(text(&d));
                bus.ack("t", group, d.seq);
            }
            assert_eq!(seen, vec!["x", "y"], "group {group}");
        }
    }

    #[tokio::test]
    async fn acked_messages_are_not_redelivered() {
        let bus = Bus::new(3, None);
        bus.publish("t", note("only"));
        let d = bus.try_read("t", "g", "c1").unwrap();
        bus.ack("t", "g", d.seq);
        assert!(bus.try_read("t", "g", "c1").is_none());
        // nack after ack is a no-op, not a redelivery
        assert_eq!(bus.nack("t", "g", d.seq), NackOutcome::Requeued);
        assert!(bus.try_read("t", "g", "c1").is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_then_dead_letters() {
        let bus = Bus::new(3, None);
        bus.publish("t", note("poison"));

        // delivery 1 + 2 requeue, delivery 3 exhausts the budget
        let d1 = bus.try_read("t", "g", "c1").unwrap();
        assert_eq!(d1.deliveries, 1);
        assert_eq!(bus.nack("t", "g", d1.seq), NackOutcome::Requeued);

        let d2 = bus.try_read("t", "g", "c1").unwrap();
        assert_eq!(d2.deliveries, 2);
        assert_eq!(bus.nack("t", "g", d2.seq), NackOutcome::Requeued);

        let d3 = bus.try_read("t", "g", "c1").unwrap();
        assert_eq!(d3.deliveries, 3);
        assert_eq!(bus.nack("t", "g", d3.seq), NackOutcome::DeadLettered);

        assert!(bus.try_read("t", "g", "c1").is_none());
        assert_eq!(bus.topic_len(TOPIC_DEAD_LETTERS), 1);

        let dead = bus.try_read(TOPIC_DEAD_LETTERS, "dlq", "inspector-1").unwrap();
        match dead.msg {
            BusMessage::Dead {
                origin_topic,
                deliveries,
                ..
            } => {
                assert_eq!(origin_topic, "t");
                assert_eq!(deliveries, 3);
            }
            other => panic!("expected dead letter, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn poll_times_out_when_idle() {
        let bus = Bus::new(3, None);
        let got = bus.poll("t", "g", "c1", Duration::from_millis(30)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let bus = Bus::new(3, None);
        let bus2 = bus.clone();
        let waiter = tokio::spawn(async move {
            bus2.poll("t", "g", "c1", Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("t", note("wake"));
        let got = waiter.await.unwrap();
        assert!(got.is_some());
    }
}
