use axum::{routing::get, Router};
use event_bus::{Broker, InMemoryBroker, NatsBroker};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vehicles_rs::{
    config::Config,
    db,
    health::{health, ready, HealthState},
    shutdown::shutdown_signal,
    start_user_created_consumer, PgVehicleStore,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting vehicles service...");

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = %config.bus_type,
        queue = %config.topology.queue,
        "Configuration loaded"
    );

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    db::run_migrations(&pool).await?;

    let broker: Arc<dyn Broker> = match config.bus_type.to_lowercase().as_str() {
        "inmemory" => {
            tracing::info!("Using in-memory broker");
            Arc::new(InMemoryBroker::new())
        }
        "nats" => {
            tracing::info!(url = %config.broker_url, "Using NATS JetStream broker");
            Arc::new(NatsBroker::new(config.broker_url.clone()))
        }
        other => {
            return Err(format!("Invalid BUS_TYPE: {other}. Must be 'inmemory' or 'nats'").into())
        }
    };

    // The consumer connects in the background; the HTTP surface comes up
    // even while the broker is unreachable
    let consumer = start_user_created_consumer(
        broker,
        Arc::new(PgVehicleStore::new(pool.clone())),
        config.topology.clone(),
        config.consumer_settings(),
    );

    let health_state = Arc::new(HealthState {
        db: pool.clone(),
        consumer: consumer.watch_state(),
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/ready", get(ready))
        .with_state(health_state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%addr, "Vehicles service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    consumer.shutdown().await;
    pool.close().await;

    tracing::info!("Vehicles service stopped");
    Ok(())
}
