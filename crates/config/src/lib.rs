pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, AppEnv, ConsumerConfig, WriteStrategy};
pub use tracing_init::init_tracing;
