use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Event;
use crate::error::EventError;

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

/// Registrations collected before a dispatcher exists.
#[derive(Default)]
pub struct HandlerRegistry {
    pending: Vec<(String, Arc<dyn EventHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.pending.push((topic.into(), handler));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    routes: Vec<(String, Arc<dyn EventHandler>)>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A topic registered twice keeps its first position with the newer handler.
    pub fn register(mut self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let topic = topic.into();
        match self.routes.iter_mut().find(|(t, _)| *t == topic) {
            Some(route) => {
                tracing::warn!(
                    topic = %topic,
                    previous = route.1.name(),
                    replacement = handler.name(),
                    "handler re-registered for topic, overwriting"
                );
                route.1 = handler;
            }
            None => self.routes.push((topic, handler)),
        }
        self
    }

    /// Replay buffered registrations in the order they were made.
    pub fn attach(self, registry: HandlerRegistry) -> Self {
        registry
            .pending
            .into_iter()
            .fold(self, |builder, (topic, handler)| builder.register(topic, handler))
    }

    pub fn build(self) -> Dispatcher {
        tracing::info!(topics = self.routes.len(), "dispatcher built");
        Dispatcher {
            routes: Arc::from(self.routes),
        }
    }
}

/// Immutable topic → handler table.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<[(String, Arc<dyn EventHandler>)]>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handler_for(&self, topic: &str) -> Option<&Arc<dyn EventHandler>> {
        self.routes
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, handler)| handler)
    }

    pub fn topics(&self) -> Vec<String> {
        self.routes.iter().map(|(t, _)| t.clone()).collect()
    }

    pub async fn dispatch(&self, event: &Event) -> Result<(), EventError> {
        let handler = self
            .handler_for(&event.topic)
            .ok_or_else(|| EventError::UnknownTopic(event.topic.clone()))?;
        handler.handle(event).await
    }
}
