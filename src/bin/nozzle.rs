use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use decibel::auth::{Authenticator, TokenChecker};
use decibel::config::NozzleConfig;
use decibel::firehose::Consumer;
use decibel::ingest::{Buffer, Ingestor, Processor};
use decibel::store::{Aggregator, Counter, RateStore};
use decibel::web;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decibel=info,tower_http=info".into()),
        )
        .init();

    info!("starting nozzle v{}", env!("CARGO_PKG_VERSION"));

    let cfg = NozzleConfig::from_env()?;

    let auth = Arc::new(Authenticator::new(
        &cfg.client_id,
        &cfg.client_secret,
        &cfg.uaa_addr,
        cfg.skip_cert_verify,
    )?);

    let (tx, rx) = mpsc::channel(100);
    let consumer = Consumer::new(
        &cfg.loggregator_addr,
        &cfg.subscription_id,
        auth.clone(),
        cfg.skip_cert_verify,
    )?;
    tokio::spawn(consumer.run(tx));

    let buffer = Buffer::new(cfg.buffer_size);
    let counter = Counter::new();
    let aggregator = Aggregator::new(
        Arc::new(counter.clone()),
        cfg.polling_interval,
        cfg.max_rate_buckets,
    );

    tokio::spawn(Ingestor::new(rx, buffer.clone()).run());
    tokio::spawn(Processor::new(buffer, counter, cfg.include_router_logs).run());
    tokio::spawn(aggregator.clone().run());

    let store: Arc<dyn RateStore> = Arc::new(aggregator);
    let checker: Arc<dyn TokenChecker> = auth;
    let app = web::nozzle::routes(store, checker);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(%addr, "nozzle listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
