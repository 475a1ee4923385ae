use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::MessageBus;
use crate::error::EventError;

pub const CUSTOMER_CREATED: &str = "customer.created";
pub const ORDER_COMPLETED: &str = "order.completed";
pub const TRANSACTION_CREATED: &str = "transaction.created";
pub const PRODUCT_MOVED: &str = "product.moved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCreated {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub user_id: String,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Transfer,
    Purchase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCreated {
    pub user_id: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    Sold,
    Purchased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMoved {
    pub product_id: String,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub created_at: DateTime<Utc>,
}

/// Outbound events with a fixed topic each.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    CustomerCreated(CustomerCreated),
    OrderCompleted(OrderCompleted),
    TransactionCreated(TransactionCreated),
    ProductMoved(ProductMoved),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::CustomerCreated(_) => CUSTOMER_CREATED,
            DomainEvent::OrderCompleted(_) => ORDER_COMPLETED,
            DomainEvent::TransactionCreated(_) => TRANSACTION_CREATED,
            DomainEvent::ProductMoved(_) => PRODUCT_MOVED,
        }
    }

    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            DomainEvent::CustomerCreated(p) => serde_json::to_vec(p),
            DomainEvent::OrderCompleted(p) => serde_json::to_vec(p),
            DomainEvent::TransactionCreated(p) => serde_json::to_vec(p),
            DomainEvent::ProductMoved(p) => serde_json::to_vec(p),
        }
    }
}

pub struct EventProducer {
    bus: Arc<dyn MessageBus>,
    source: String,
}

impl EventProducer {
    /// `source` is stamped on every message as a header.
    pub fn new(bus: Arc<dyn MessageBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    pub async fn publish_domain(&self, event: &DomainEvent) -> Result<String, EventError> {
        let payload = event
            .to_json()
            .map_err(|e| EventError::Payload(e.to_string()))?;
        self.publish_raw(event.topic(), &payload, HashMap::new())
            .await
    }

    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<String, EventError> {
        let payload = serde_json::to_vec(payload).map_err(|e| EventError::Payload(e.to_string()))?;
        self.publish_raw(topic, &payload, HashMap::new()).await
    }

    /// Caller-supplied headers win over the default ones.
    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: &[u8],
        headers: HashMap<String, String>,
    ) -> Result<String, EventError> {
        let mut all = HashMap::from([
            ("source".to_string(), self.source.clone()),
            ("published_at".to_string(), Utc::now().to_rfc3339()),
        ]);
        all.extend(headers);

        let id = self.bus.publish(topic, payload, &all).await?;
        tracing::debug!(topic, id = %id, bytes = payload.len(), "published event");
        Ok(id)
    }
}
