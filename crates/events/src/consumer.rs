use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::MessageBus;
use crate::dispatcher::Dispatcher;
use crate::envelope::{Event, Message};
use crate::error::{Disposition, EventError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// How long a single receive waits before re-checking for shutdown.
    pub block_timeout: Duration,
    /// Upper bound on `stop()` waiting for the in-flight message.
    pub shutdown_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    handled: AtomicU64,
    skipped: AtomicU64,
    inconsistent: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub handled: u64,
    /// Acknowledged without being applied (undecodable, bad payload, unknown topic).
    pub skipped: u64,
    /// Acknowledged after a partial update.
    pub inconsistent: u64,
    /// Left unacknowledged for redelivery.
    pub retried: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            inconsistent: self.inconsistent.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Receives from the bus and routes each message through the dispatcher.
pub struct EventConsumer {
    bus: Arc<dyn MessageBus>,
    dispatcher: Dispatcher,
    settings: ConsumerSettings,
    state: Arc<watch::Sender<ConsumerState>>,
    stats: Arc<ConsumerStats>,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn MessageBus>, dispatcher: Dispatcher, settings: ConsumerSettings) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            bus,
            dispatcher,
            settings,
            state: Arc::new(state),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Subscribe to the dispatcher's topics and spawn the receive loop.
    pub async fn start(self) -> Result<ConsumerHandle, EventError> {
        self.state.send_replace(ConsumerState::Starting);

        let topics = self.dispatcher.topics();
        if let Err(e) = self.bus.subscribe(&topics).await {
            tracing::error!(error = %e, "subscribe failed");
            self.state.send_replace(ConsumerState::Stopped);
            return Err(e);
        }
        tracing::info!(topics = ?topics, "consumer subscribed");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let shutdown_timeout = self.settings.shutdown_timeout;

        state.send_replace(ConsumerState::Running);
        let task = tokio::spawn(self.run(shutdown_rx));

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            state,
            stats,
            shutdown_timeout,
            task,
        })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.settings.initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Shutdown only interrupts the wait; a received message is always finished.
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.bus.receive(self.settings.block_timeout) => received,
            };

            let retry = match received {
                Ok(None) => false,
                Ok(Some(message)) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    self.process(&message).await == Disposition::Retry
                }
                Err(e) => {
                    tracing::error!(error = %e, "receive failed");
                    true
                }
            };

            if retry {
                tracing::debug!(backoff_ms = backoff.as_millis() as u64, "backing off");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.settings.max_backoff);
            } else {
                backoff = self.settings.initial_backoff;
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
        tracing::info!(stats = ?self.stats.snapshot(), "consumer stopped");
    }

    async fn process(&self, message: &Message) -> Disposition {
        let outcome = match Event::decode(message) {
            Ok(event) => self.dispatcher.dispatch(&event).await,
            Err(e) => Err(e),
        };

        let disposition = match outcome {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                Disposition::Ack
            }
            Err(err) => {
                self.report(message, &err);
                err.disposition()
            }
        };

        match disposition {
            Disposition::Ack => {
                if let Err(e) = self.bus.ack(message).await {
                    tracing::error!(id = %message.id, topic = %message.topic, error = %e, "ack failed");
                }
            }
            Disposition::Retry => {
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.bus.nack(message).await {
                    tracing::error!(id = %message.id, topic = %message.topic, error = %e, "nack failed");
                }
            }
        }
        disposition
    }

    fn report(&self, message: &Message, err: &EventError) {
        let (id, topic) = (message.id.as_str(), message.topic.as_str());
        match err {
            EventError::UnknownTopic(_) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::info!(id, topic, "no handler for topic, dropping");
            }
            EventError::Decode(_) | EventError::Payload(_) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id, topic, error = %err, "skipping message");
            }
            EventError::PartialUpdate { applied, failed, .. } => {
                self.stats.inconsistent.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    id,
                    topic,
                    inconsistent = true,
                    applied = ?applied,
                    failed = %failed,
                    error = %err,
                    "partial update, aggregates need reconciliation"
                );
            }
            EventError::Storage(_) | EventError::Bus(_) => {
                tracing::error!(id, topic, error = %err, "handler failed, will redeliver");
            }
        }
    }
}

/// Running consumer.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    state: Arc<watch::Sender<ConsumerState>>,
    stats: Arc<ConsumerStats>,
    shutdown_timeout: Duration,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown and wait for the loop to finish its current message.
    pub async fn stop(mut self) {
        self.state.send_replace(ConsumerState::Stopping);
        self.shutdown.send_replace(true);

        match tokio::time::timeout(self.shutdown_timeout, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "consumer task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "consumer did not drain in time, aborting"
                );
                self.task.abort();
                self.state.send_replace(ConsumerState::Stopped);
            }
        }
    }
}
