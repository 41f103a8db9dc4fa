use actix::prelude::*;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_engine::actors::{CoordinatorActor, HealthMonitorActor, Shutdown};
use order_engine::config::{AppConfig, StoreBackend};
use order_engine::domain::order::{OrderService, Reconciler, StatisticsAggregator};
use order_engine::gateway::{HttpPaymentGateway, PaymentGateway, ResilientGateway};
use order_engine::messaging::{LogNotifier, OrderNotifier, RedpandaNotifier};
use order_engine::metrics::{self, start_metrics_server, ServerState};
use order_engine::store::{InMemoryOrderStore, OrderStore, PgOrderStore};
use order_engine::utils::CircuitBreakerConfig;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, override with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_engine=debug"))
        )
        .init();

    tracing::info!("Starting order engine");
    let config = AppConfig::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Order store ===
    let store: Arc<dyn OrderStore> = match &config.store {
        StoreBackend::Postgres { url, max_connections } => {
            tracing::info!("Connecting to Postgres...");
            let store = PgOrderStore::connect(url, *max_connections).await?;
            store.init_schema().await?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory order store, orders are lost on restart");
            Arc::new(InMemoryOrderStore::new())
        }
    };

    // === 3. External dependencies (each behind a circuit breaker) ===
    let mut health_monitor = HealthMonitorActor::new().with_metrics(metrics.clone());

    let gateway = ResilientGateway::new(
        HttpPaymentGateway::new(config.payment_gateway_url.clone(), config.payment_gateway_timeout)?,
        config.payment_gateway_timeout,
        CircuitBreakerConfig::default(),
    )
    .with_metrics(metrics.clone());
    health_monitor = health_monitor.watch_breaker("payment_gateway", gateway.breaker());
    let gateway: Arc<dyn PaymentGateway> = Arc::new(gateway);

    let notifier: Arc<dyn OrderNotifier> = match &config.kafka_brokers {
        Some(brokers) => {
            let notifier = RedpandaNotifier::new(brokers, &config.notification_topic)?;
            health_monitor = health_monitor.watch_breaker("notifications", notifier.breaker());
            Arc::new(notifier)
        }
        None => {
            tracing::warn!("KAFKA_BROKERS not set, shop notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    // === 4. Services ===
    let service = Arc::new(
        OrderService::new(store.clone(), gateway, notifier).with_metrics(metrics.clone()),
    );
    let reconciler = Arc::new(Reconciler::new(service, config.policy).with_metrics(metrics.clone()));
    let statistics = Arc::new(StatisticsAggregator::new(store));

    // === 5. Actors ===
    let health_monitor = health_monitor.start();
    tracing::info!("Starting coordinator actor with supervision");
    let coordinator = CoordinatorActor::new(reconciler, config.schedule, health_monitor.clone()).start();

    // === 6. Operational HTTP surface ===
    let state = ServerState {
        metrics,
        statistics,
        health_monitor,
    };
    let port = config.metrics_port;
    actix::spawn(async move {
        if let Err(e) = start_metrics_server(state, port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    coordinator.send(Shutdown).await?;
    System::current().stop();

    Ok(())
}
