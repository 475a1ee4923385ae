pub mod bus;
pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod producer;
pub mod redis_bus;

pub use bus::{MemoryBus, MessageBus};
pub use consumer::{
    ConsumerHandle, ConsumerSettings, ConsumerState, ConsumerStats, ConsumerStatsSnapshot,
    EventConsumer,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, EventHandler, HandlerRegistry};
pub use envelope::{Event, Message};
pub use error::{Disposition, EventError};
pub use producer::{DomainEvent, EventProducer};
pub use redis_bus::RedisStreamBus;
