mod kpi;

use std::sync::Arc;

use tally_config::{init_tracing, AppConfig};
use tally_db::kpi::pg_repository::PgKpiRepository;
use tally_events::{ConsumerSettings, Dispatcher, EventConsumer, RedisStreamBus};

use kpi::handler::kpi_handlers;
use kpi::writer::KpiWriter;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    tracing::info!(
        service = "tally-aggregator",
        consumer = %config.consumer.name,
        group = %config.consumer.group,
        strategy = ?config.consumer.write_strategy,
        "starting"
    );

    let pool = tally_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    tally_db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let writer = Arc::new(KpiWriter::new(
        Arc::new(PgKpiRepository::new(pool)),
        config.consumer.write_strategy,
        config.consumer.max_conflict_retries,
    ));
    let dispatcher = Dispatcher::builder()
        .attach(kpi_handlers(writer))
        .build();

    let bus = RedisStreamBus::connect(
        &config.redis_url,
        &config.consumer.group,
        &config.consumer.name,
    )
    .await
    .expect("failed to connect to redis");

    let settings = ConsumerSettings {
        block_timeout: config.consumer.block_timeout(),
        shutdown_timeout: config.consumer.shutdown_timeout(),
        ..ConsumerSettings::default()
    };
    let consumer = EventConsumer::new(Arc::new(bus), dispatcher, settings)
        .start()
        .await
        .expect("failed to start consumer");

    shutdown_signal().await;
    tracing::info!(stats = ?consumer.stats(), "shutting down");
    consumer.stop().await;
}
