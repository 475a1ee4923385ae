use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::envelope::Message;
use crate::error::EventError;

/// Transport the consumer and producer talk to.
///
/// Delivery is at-least-once: a received message that is not acked is
/// delivered again, either after `nack` or after a restart.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<(), EventError>;

    /// Wait up to `timeout` for the next message on a subscribed topic.
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, EventError>;

    async fn ack(&self, message: &Message) -> Result<(), EventError>;

    /// Give a message back so it is delivered again.
    async fn nack(&self, message: &Message) -> Result<(), EventError>;

    /// Returns the id the bus assigned to the message.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<String, EventError>;
}

#[derive(Default)]
struct MemoryState {
    topics: HashSet<String>,
    queue: VecDeque<Message>,
    in_flight: HashMap<String, Message>,
    acked: Vec<String>,
    next_id: u64,
}

/// In-process bus for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryState>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ids of acknowledged messages, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Messages queued or delivered but not yet acknowledged.
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.queue.len() + state.in_flight.len()
    }

    pub fn subscribed(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    fn take_next(&self) -> Option<Message> {
        let mut state = self.lock();
        let pos = state
            .queue
            .iter()
            .position(|m| state.topics.contains(&m.topic))?;
        let message = state.queue.remove(pos)?;
        state.in_flight.insert(message.id.clone(), message.clone());
        Some(message)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, topics: &[String]) -> Result<(), EventError> {
        self.lock().topics.extend(topics.iter().cloned());
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, EventError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take_next() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.take_next());
            }
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), EventError> {
        let mut state = self.lock();
        if state.in_flight.remove(&message.id).is_none() {
            return Err(EventError::Bus(format!(
                "message {} is not in flight",
                message.id
            )));
        }
        state.acked.push(message.id.clone());
        Ok(())
    }

    async fn nack(&self, message: &Message) -> Result<(), EventError> {
        {
            let mut state = self.lock();
            let Some(message) = state.in_flight.remove(&message.id) else {
                return Err(EventError::Bus(format!(
                    "message {} is not in flight",
                    message.id
                )));
            };
            state.queue.push_front(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<String, EventError> {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("{}-0", state.next_id);
            state.queue.push_back(Message {
                id: id.clone(),
                topic: topic.to_string(),
                payload: payload.to_vec(),
                headers: headers.clone(),
            });
            id
        };
        self.notify.notify_one();
        Ok(id)
    }
}
