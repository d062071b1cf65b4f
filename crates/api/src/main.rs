//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, LiveSettings};
use domain::{LowStockPolicy, ProductService};
use event_bus::{EventBus, InMemoryEventBus, PostgresEventBus};
use notifications::{
    AuditLog, InMemoryAuditLog, NotificationRouter, PostgresAuditLog, RouterConfig,
    SubscriberRegistry,
};
use product_store::{InMemoryProductStore, PostgresProductStore, ProductStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Products and audit log on PostgreSQL when `DATABASE_URL` is set, in memory
/// otherwise.
async fn storage(
    config: &Config,
) -> Result<(Arc<dyn ProductStore>, Arc<dyn AuditLog>), BoxError> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, products and audit log are kept in memory");
        let store: Arc<dyn ProductStore> = Arc::new(InMemoryProductStore::new());
        let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        return Ok((store, audit));
    };

    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    let store = PostgresProductStore::new(pool.clone());
    store.run_migrations().await?;
    tracing::info!("connected to PostgreSQL, migrations applied");

    let store: Arc<dyn ProductStore> = Arc::new(store);
    let audit: Arc<dyn AuditLog> = Arc::new(PostgresAuditLog::new(pool));
    Ok((store, audit))
}

async fn backbone(config: &Config) -> Result<Arc<dyn EventBus>, BoxError> {
    if config.event_bus_brokers.is_empty() {
        tracing::warn!("EVENT_BUS_BROKERS not set, using the in-process event backbone");
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new(config.event_bus_partitions)?);
        return Ok(bus);
    }

    let bus =
        PostgresEventBus::connect(&config.event_bus_brokers, config.event_bus_partitions).await?;
    bus.run_migrations().await?;
    let bus: Arc<dyn EventBus> = Arc::new(bus);
    Ok(bus)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire adapters, mutation engine and notification router
    let (store, audit) = storage(&config).await?;
    let bus = backbone(&config).await?;
    let registry = Arc::new(SubscriberRegistry::new());

    let products = ProductService::new(
        store,
        Arc::clone(&bus),
        LowStockPolicy::new(config.low_stock_threshold),
    );
    let router = NotificationRouter::new(
        bus,
        Arc::clone(&audit),
        Arc::clone(&registry),
        RouterConfig {
            audit_enabled: config.enable_event_log,
            ..RouterConfig::default()
        },
    );

    // 4. Start the notification router in the background
    let (stop_router, router_stopped) = oneshot::channel::<()>();
    let router_task = tokio::spawn(async move {
        let stopped = async move {
            let _ = router_stopped.await;
        };
        if let Err(e) = router.run(stopped).await {
            tracing::error!(error = %e, "notification router failed to start");
        }
    });

    // 5. Build the application
    let state = Arc::new(AppState {
        products,
        audit,
        registry: Arc::clone(&registry),
        live: LiveSettings {
            heartbeat: config.sse_heartbeat,
            queue_capacity: config.subscriber_queue_capacity,
        },
    });
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(
        %addr,
        threshold = config.low_stock_threshold,
        audit_enabled = config.enable_event_log,
        "starting API server"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Live streams never finish on their own.
            registry.close_all();
        })
        .await?;

    // 7. Stop the router after the event in hand
    let _ = stop_router.send(());
    if let Err(e) = router_task.await {
        tracing::error!(error = %e, "notification router panicked");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
