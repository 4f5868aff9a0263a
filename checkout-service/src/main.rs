use anyhow::Result;
use checkout_service::{
    api,
    config::{Config, StoreBackend},
    outbox::{EventPublisher, KafkaPublisher, LogPublisher, OutboxProcessor},
    store::{postgres, CheckoutStore, MemoryStore, PgStore},
    CheckoutFlow, SessionVerifier,
};
use clap::Parser;
use payment_gateway::StripeGateway;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();
    let config = Config::parse();

    let store: Arc<dyn CheckoutStore> = match config.store {
        StoreBackend::Postgres => {
            // Run migrations first
            postgres::run_migrations(&config.database_url)?;
            let pool = postgres::connect(&config.database_url).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; orders are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.kafka_brokers {
        Some(brokers) => {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .create()?;
            Arc::new(KafkaPublisher::new(producer))
        }
        None => {
            info!("KAFKA_BROKERS not set, outbox events go to the log");
            Arc::new(LogPublisher)
        }
    };

    let outbox_processor = OutboxProcessor::new(
        store.clone(),
        publisher,
        Duration::from_secs(config.outbox_interval_secs),
    );
    tokio::spawn(async move {
        outbox_processor.run().await;
    });

    let gateway = StripeGateway::new(
        config.stripe_api_base.clone(),
        config.stripe_secret_key.clone(),
        Duration::from_secs(config.gateway_timeout_secs),
    )?;
    let flow = CheckoutFlow::new(store, Arc::new(gateway), config.currency.clone());

    let app_state = api::AppState {
        flow: Arc::new(flow),
        sessions: Arc::new(SessionVerifier::new(&config.session_jwt_secret)),
        webhooks: Arc::new(api::WebhookSettings {
            secret: config.stripe_webhook_secret.clone(),
            tolerance_secs: config.webhook_tolerance_secs,
        }),
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Checkout service web server started on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
