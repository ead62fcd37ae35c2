use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use decibel::auth::{Authenticator, TokenChecker};
use decibel::collector::Collector;
use decibel::config::AccumulatorConfig;
use decibel::web;
use decibel::web::accumulator::{RateProvider, RatesState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decibel=info,tower_http=info".into()),
        )
        .init();

    info!("starting accumulator v{}", env!("CARGO_PKG_VERSION"));

    let cfg = AccumulatorConfig::from_env()?;

    let auth = Arc::new(Authenticator::new(
        &cfg.client_id,
        &cfg.client_secret,
        &cfg.uaa_addr,
        cfg.skip_cert_verify,
    )?);

    info!(nozzles = cfg.nozzle_addrs.len(), "initializing collector");
    let collector = Collector::new(
        cfg.nozzle_addrs.clone(),
        "state",
        auth.clone(),
        cfg.skip_cert_verify,
    )?
    .with_report_limit(cfg.report_limit)
    .with_nozzle_app_guid(cfg.nozzle_app_guid.clone());

    let provider: Arc<dyn RateProvider> = Arc::new(collector);
    let checker: Arc<dyn TokenChecker> = auth;
    let app = web::accumulator::routes(
        RatesState {
            provider,
            interval: cfg.polling_interval,
        },
        checker,
    );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(%addr, "accumulator listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
