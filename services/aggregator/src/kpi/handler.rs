use std::sync::Arc;

use async_trait::async_trait;
use tally_events::{Event, EventError, EventHandler, HandlerRegistry};

use super::compute::{Compute, MAPPINGS};
use super::writer::KpiWriter;

/// Maps one topic's payload to deltas and hands them to the writer.
pub struct AggregationHandler {
    name: &'static str,
    compute: Compute,
    writer: Arc<KpiWriter>,
}

impl AggregationHandler {
    pub fn new(name: &'static str, compute: Compute, writer: Arc<KpiWriter>) -> Self {
        Self {
            name,
            compute,
            writer,
        }
    }
}

#[async_trait]
impl EventHandler for AggregationHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        let update = (self.compute)(event)?;
        tracing::debug!(
            handler = self.name,
            id = %event.id,
            period = %update.period,
            deltas = update.deltas.len(),
            "applying event"
        );
        self.writer.apply_update(&update).await
    }
}

/// Registrations for every KPI topic, sharing one writer.
pub fn kpi_handlers(writer: Arc<KpiWriter>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (topic, name, compute) in MAPPINGS {
        registry.register(
            topic,
            Arc::new(AggregationHandler::new(name, compute, Arc::clone(&writer))),
        );
    }
    registry
}
