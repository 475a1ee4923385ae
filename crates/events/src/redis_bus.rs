use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use tokio::sync::Mutex;

use crate::bus::MessageBus;
use crate::envelope::Message;
use crate::error::EventError;

const PAYLOAD_FIELD: &str = "payload";
const READ_BATCH: usize = 16;

struct ReadState {
    topics: Vec<String>,
    /// Re-read this consumer's pending entries (id `0`) before new ones.
    replay_pending: bool,
    buffer: VecDeque<Message>,
}

/// Redis Streams transport: one stream per topic, one consumer group.
pub struct RedisStreamBus {
    conn: MultiplexedConnection,
    group: String,
    consumer: String,
    state: Mutex<ReadState>,
}

impl RedisStreamBus {
    pub async fn connect(url: &str, group: &str, consumer: &str) -> Result<Self, EventError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(group, consumer, "connected to redis");
        Ok(Self {
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
            state: Mutex::new(ReadState {
                topics: Vec::new(),
                replay_pending: true,
                buffer: VecDeque::new(),
            }),
        })
    }

    async fn ensure_group(&self, topic: &str) -> Result<(), EventError> {
        let mut conn = self.conn.clone();
        // Start from "0" so entries published before the group existed are read.
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(topic, &self.group, "0").await;
        match created {
            Ok(()) => {
                tracing::info!(topic, group = %self.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(
        &self,
        topics: &[String],
        id: &str,
        block: Option<Duration>,
    ) -> Result<Vec<Message>, EventError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_BATCH);
        if let Some(block) = block {
            // BLOCK 0 waits forever.
            opts = opts.block(block.as_millis().max(1) as usize);
        }
        let ids = vec![id; topics.len()];

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn.xread_options(topics, &ids[..], &opts).await?;

        let mut messages = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                messages.push(to_message(&key.key, entry)?);
            }
        }
        Ok(messages)
    }
}

fn to_message(topic: &str, entry: StreamId) -> Result<Message, EventError> {
    let mut payload = Vec::new();
    let mut headers = HashMap::new();
    for (field, value) in entry.map {
        if field == PAYLOAD_FIELD {
            payload = redis::from_redis_value::<Vec<u8>>(&value)?;
        } else if !matches!(value, Value::Nil) {
            headers.insert(field, redis::from_redis_value::<String>(&value)?);
        }
    }
    Ok(Message {
        id: entry.id,
        topic: topic.to_string(),
        payload,
        headers,
    })
}

#[async_trait]
impl MessageBus for RedisStreamBus {
    async fn subscribe(&self, topics: &[String]) -> Result<(), EventError> {
        for topic in topics {
            self.ensure_group(topic).await?;
        }
        let mut state = self.state.lock().await;
        for topic in topics {
            if !state.topics.contains(topic) {
                state.topics.push(topic.clone());
            }
        }
        state.replay_pending = true;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, EventError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.buffer.pop_front() {
            return Ok(Some(message));
        }
        if state.topics.is_empty() {
            drop(state);
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let topics = state.topics.clone();
        if state.replay_pending {
            let pending = self.read(&topics, "0", None).await?;
            if pending.is_empty() {
                state.replay_pending = false;
            } else {
                tracing::debug!(count = pending.len(), "replaying pending entries");
                state.buffer.extend(pending);
                return Ok(state.buffer.pop_front());
            }
        }

        let fresh = self.read(&topics, ">", Some(timeout)).await?;
        state.buffer.extend(fresh);
        Ok(state.buffer.pop_front())
    }

    async fn ack(&self, message: &Message) -> Result<(), EventError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&message.topic, &self.group, &[&message.id])
            .await?;
        Ok(())
    }

    async fn nack(&self, message: &Message) -> Result<(), EventError> {
        // The entry stays in the pending list; replay it before anything newer.
        let mut state = self.state.lock().await;
        state.buffer.clear();
        state.replay_pending = true;
        tracing::debug!(id = %message.id, topic = %message.topic, "entry left pending");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<String, EventError> {
        let mut fields: Vec<(&str, &[u8])> = Vec::with_capacity(headers.len() + 1);
        fields.push((PAYLOAD_FIELD, payload));
        for (name, value) in headers {
            if name != PAYLOAD_FIELD {
                fields.push((name.as_str(), value.as_bytes()));
            }
        }

        let mut conn = self.conn.clone();
        let id: String = conn.xadd(topic, "*", fields.as_slice()).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_fields_split_into_payload_and_headers() {
        let entry = StreamId {
            id: "1700000000000-0".to_string(),
            map: HashMap::from([
                (
                    "payload".to_string(),
                    Value::BulkString(br#"{"amount":1}"#.to_vec()),
                ),
                (
                    "source".to_string(),
                    Value::BulkString(b"billing".to_vec()),
                ),
            ]),
        };

        let message = to_message("kpi.create.payment", entry).unwrap();
        assert_eq!(message.id, "1700000000000-0");
        assert_eq!(message.topic, "kpi.create.payment");
        assert_eq!(message.payload, br#"{"amount":1}"#);
        assert_eq!(message.headers.len(), 1);
        assert_eq!(message.headers["source"], "billing");
    }

    #[test]
    fn deleted_entry_has_empty_payload() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        let message = to_message("t", entry).unwrap();
        assert!(message.payload.is_empty());
    }

    #[tokio::test]
    async fn round_trips_through_a_live_redis() {
        let Ok(url) = std::env::var("TEST_REDIS_URL") else {
            return;
        };
        let topic = format!("tally.test.{}", std::process::id());
        let bus = RedisStreamBus::connect(&url, "tally-test", "consumer-1")
            .await
            .unwrap();
        bus.subscribe(&[topic.clone()]).await.unwrap();

        let headers = HashMap::from([("source".to_string(), "test".to_string())]);
        bus.publish(&topic, b"{}", &headers).await.unwrap();

        let message = bus
            .receive(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, b"{}");
        assert_eq!(message.headers["source"], "test");

        bus.nack(&message).await.unwrap();
        let again = bus
            .receive(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, message.id);
        bus.ack(&again).await.unwrap();
    }
}
