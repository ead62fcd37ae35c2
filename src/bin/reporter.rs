use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use decibel::auth::Authenticator;
use decibel::collector::{AppInfoStore, CachedAppInfoStore, Collector, HttpAppInfoStore};
use decibel::config::ReporterConfig;
use decibel::datadog::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decibel=info,tower_http=info".into()),
        )
        .init();

    info!("starting reporter v{}", env!("CARGO_PKG_VERSION"));

    let cfg = ReporterConfig::from_env()?;

    let auth = Arc::new(Authenticator::new(
        &cfg.client_id,
        &cfg.client_secret,
        &cfg.uaa_addr,
        cfg.skip_cert_verify,
    )?);

    let directory = HttpAppInfoStore::new(&cfg.capi_addr, auth.clone(), cfg.skip_cert_verify)?;
    let cache: Arc<dyn AppInfoStore> = Arc::new(CachedAppInfoStore::new(
        Arc::new(directory),
        cfg.app_info_cache_ttl,
    ));

    info!(accumulator = %cfg.accumulator_addr, "initializing collector");
    let collector = Collector::new(
        vec![cfg.accumulator_addr.clone()],
        "rates",
        auth,
        cfg.skip_cert_verify,
    )?
    .with_report_limit(cfg.report_limit)
    .with_app_info(cache);

    info!(interval = ?cfg.report_interval, "starting metric reporter");
    let reporter = Reporter::new(
        &cfg.datadog_addr,
        &cfg.datadog_api_key,
        &cfg.reporter_host,
        cfg.report_interval,
        Arc::new(collector),
        cfg.skip_cert_verify,
    )?;

    reporter.run().await;

    Ok(())
}
