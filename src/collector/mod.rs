pub mod app_info;
pub mod cache;

pub use app_info::{AppInfo, AppInfoStore, HttpAppInfoStore};
pub use cache::CachedAppInfoStore;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::auth::Authenticator;
use crate::datadog::{Point, PointBuilder};
use crate::store::Rate;
use crate::web::accumulator::RateProvider;

/// Metric name under which ranked instance counts are shipped.
const INGRESS_METRIC: &str = "application.ingress";

/// How many of the noisiest instances survive ranking by default.
pub const DEFAULT_REPORT_LIMIT: usize = 250;

/// Fetches the same-timestamp bucket from every configured target, sums the
/// counts per instance, and turns the noisiest instances into metric points.
pub struct Collector {
    nozzles: Vec<String>,
    rate_path: String,
    auth: Arc<Authenticator>,
    client: reqwest::Client,
    report_limit: usize,
    nozzle_app_guid: Option<String>,
    app_info: Option<Arc<dyn AppInfoStore>>,
}

impl Collector {
    /// `rate_path` is the read path on the fetch targets: `state` when the
    /// targets are nozzles, `rates` when the target is an accumulator.
    pub fn new(
        nozzles: Vec<String>,
        rate_path: &str,
        auth: Arc<Authenticator>,
        skip_cert_verify: bool,
    ) -> Result<Self> {
        // Keep-alives stay off: the targets usually share one load-balanced
        // hostname with per-instance routing, and a pooled connection would
        // pin whichever instance answered first.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()
            .context("failed to build rate fetch client")?;

        Ok(Self {
            nozzles,
            rate_path: rate_path.to_string(),
            auth,
            client,
            report_limit: DEFAULT_REPORT_LIMIT,
            nozzle_app_guid: None,
            app_info: None,
        })
    }

    pub fn with_report_limit(mut self, report_limit: usize) -> Self {
        self.report_limit = report_limit;
        self
    }

    /// Enables the `X-CF-APP-INSTANCE` routing header, directing each fetch
    /// to a specific instance behind a shared hostname. An empty GUID leaves
    /// the header off.
    pub fn with_nozzle_app_guid(mut self, guid: Option<String>) -> Self {
        self.nozzle_app_guid = guid.filter(|g| !g.is_empty());
        self
    }

    pub fn with_app_info(mut self, store: Arc<dyn AppInfoStore>) -> Self {
        self.app_info = Some(store);
        self
    }

    /// Fetch the bucket for `timestamp` from every target and sum the counts.
    ///
    /// Any failed fetch fails the whole call: a target silently missing from
    /// the sum would falsify the output.
    pub async fn rate(&self, timestamp: i64) -> Result<Rate> {
        let token = self
            .auth
            .refresh_token()
            .await
            .context("token refresh failed")?;

        let (tx, mut rx) = mpsc::channel(self.nozzles.len().max(1));
        for (index, addr) in self.nozzles.iter().enumerate() {
            let mut request = self
                .client
                .get(format!(
                    "{}/{}/{}",
                    addr.trim_end_matches('/'),
                    self.rate_path,
                    timestamp
                ))
                .bearer_auth(&token);
            if let Some(guid) = &self.nozzle_app_guid {
                request = request.header("X-CF-APP-INSTANCE", format!("{guid}:{index}"));
            }

            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(fetch_rate(request).await).await;
            });
        }
        drop(tx);

        let mut rates = Vec::with_capacity(self.nozzles.len());
        let mut failure = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(rate) => rates.push(rate),
                Err(e) => failure = Some(e),
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(sum(rates))
    }
}

#[async_trait]
impl RateProvider for Collector {
    async fn rate(&self, timestamp: i64) -> Result<Rate> {
        Collector::rate(self, timestamp).await
    }
}

#[async_trait]
impl PointBuilder for Collector {
    /// Rank instances by summed count descending, truncate to the report
    /// limit, and enrich the survivors with org/space/app names where the
    /// store resolves them. Unresolved instances keep their raw GUID tag.
    async fn build_points(&self, timestamp: i64) -> Result<Vec<Point>> {
        let rate = Collector::rate(self, timestamp).await?;

        let mut top: Vec<(String, u64)> = rate.counts.into_iter().collect();
        top.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        top.truncate(self.report_limit);

        let guids: Vec<String> = top
            .iter()
            .map(|(id, _)| split_guid_index(id).0.to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let app_info = match &self.app_info {
            // The cached store never errors, but nothing downstream should
            // stall on enrichment either way.
            Some(store) => store.lookup(&guids).await.unwrap_or_default(),
            None => HashMap::new(),
        };

        Ok(top
            .into_iter()
            .map(|(id, count)| {
                let (guid, index) = split_guid_index(&id);
                let label = match app_info.get(guid) {
                    Some(info) => format!("{info}/{index}"),
                    None => format!("{guid}/{index}"),
                };
                Point {
                    metric: INGRESS_METRIC.to_string(),
                    points: vec![[rate.timestamp, count as i64]],
                    kind: "gauge".to_string(),
                    host: String::new(),
                    tags: vec![format!("application.instance:{label}")],
                }
            })
            .collect())
    }
}

async fn fetch_rate(request: reqwest::RequestBuilder) -> Result<Rate> {
    let response = request.send().await.context("rate fetch failed")?;

    if response.status() != reqwest::StatusCode::OK {
        bail!(
            "failed to get rates, expected 200, got {}",
            response.status()
        );
    }

    response.json().await.context("invalid rate body")
}

/// Sum per-instance counts across buckets, keeping the last-seen timestamp.
/// Every target returns the same truncated timestamp by construction.
fn sum(rates: Vec<Rate>) -> Rate {
    let mut out = Rate::default();
    for rate in rates {
        out.timestamp = rate.timestamp;
        for (instance, count) in rate.counts {
            *out.counts.entry(instance).or_insert(0) += count;
        }
    }
    out
}

/// Split an instance id into its GUID and index parts. An id without a slash
/// is all GUID, with index `0`.
pub fn split_guid_index(id: &str) -> (&str, &str) {
    match id.split_once('/') {
        Some((guid, index)) => (guid, index),
        None => (id, "0"),
    }
}
