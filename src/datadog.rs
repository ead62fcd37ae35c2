use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default address of the metric sink's series endpoint.
pub const DEFAULT_SERIES_ADDR: &str = "https://app.datadoghq.com/api/v1/series";

/// A single gauge shipped to the metric sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub metric: String,
    pub points: Vec<[i64; 2]>,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub tags: Vec<String>,
}

/// Produces the points for one reporting tick.
#[async_trait]
pub trait PointBuilder: Send + Sync {
    async fn build_points(&self, timestamp: i64) -> Result<Vec<Point>>;
}

/// Ships ranked points to the metric sink on a fixed schedule.
///
/// Delivery is idempotent and periodic: a failed tick is logged and skipped,
/// never retried, because the next tick supersedes it.
pub struct Reporter {
    addr: String,
    api_key: String,
    host: String,
    interval: Duration,
    builder: Arc<dyn PointBuilder>,
    client: reqwest::Client,
}

impl Reporter {
    pub fn new(
        addr: &str,
        api_key: &str,
        host: &str,
        interval: Duration,
        builder: Arc<dyn PointBuilder>,
        skip_cert_verify: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()
            .context("failed to build metric sink client")?;

        Ok(Self {
            addr: addr.to_string(),
            api_key: api_key.to_string(),
            host: host.to_string(),
            interval,
            builder,
            client,
        })
    }

    /// Drive the reporting loop. Never returns.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // first tick is immediate — skip it
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let timestamp = report_timestamp(unix_now_secs(), self.interval);

        let points = match self.builder.build_points(timestamp).await {
            Ok(points) => points,
            Err(e) => {
                warn!(error = %e, timestamp, "failed to build points, skipping tick");
                return;
            }
        };

        let points: Vec<Point> = points
            .into_iter()
            .map(|mut point| {
                point.host = self.host.clone();
                point
            })
            .collect();

        info!(points = points.len(), timestamp, "shipping points to metric sink");

        let result = self
            .client
            .post(&self.addr)
            .query(&[("api_key", self.api_key.as_str())])
            .json(&serde_json::json!({ "series": points }))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "failed to post to metric sink");
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "metric sink rejected points");
        }
    }
}

/// The bucket to report: two intervals back, floored to a boundary.
///
/// The current open bucket has not closed yet, and one interval back races
/// the aggregator boundary on the nozzles; two intervals back is closed on
/// every nozzle running the same interval.
fn report_timestamp(now: i64, interval: Duration) -> i64 {
    let step = interval.as_secs().max(1) as i64;
    let lagged = now - 2 * step;
    lagged - lagged.rem_euclid(step)
}

fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct FixedBuilder(Vec<Point>);

    #[async_trait]
    impl PointBuilder for FixedBuilder {
        async fn build_points(&self, _timestamp: i64) -> Result<Vec<Point>> {
            Ok(self.0.clone())
        }
    }

    struct FailingBuilder;

    #[async_trait]
    impl PointBuilder for FailingBuilder {
        async fn build_points(&self, _timestamp: i64) -> Result<Vec<Point>> {
            bail!("collector unavailable")
        }
    }

    fn point(tag: &str) -> Point {
        Point {
            metric: "application.ingress".to_string(),
            points: vec![[60, 42]],
            kind: "gauge".to_string(),
            host: String::new(),
            tags: vec![tag.to_string()],
        }
    }

    #[test]
    fn report_timestamp_lags_two_intervals() {
        let minute = Duration::from_secs(60);
        // 1515426389 − 120 = 1515426269, floored to the minute boundary.
        assert_eq!(report_timestamp(1_515_426_389, minute), 1_515_426_240);
        // A now sitting exactly on a boundary still lags two full intervals.
        assert_eq!(report_timestamp(1_515_426_360, minute), 1_515_426_240);
    }

    #[tokio::test]
    async fn tick_ships_points_with_the_host_stamped() {
        let sink = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/series"))
            .and(query_param("api_key", "key-1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&sink)
            .await;

        let reporter = Reporter::new(
            &format!("{}/api/v1/series", sink.uri()),
            "key-1",
            "host-1",
            Duration::from_secs(60),
            Arc::new(FixedBuilder(vec![point("application.instance:app-1/0")])),
            false,
        )
        .unwrap();

        reporter.tick().await;

        let requests = sink.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let series = body["series"].as_array().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0]["host"], "host-1");
        assert_eq!(series[0]["metric"], "application.ingress");
        assert_eq!(series[0]["type"], "gauge");
        assert_eq!(
            series[0]["tags"],
            serde_json::json!(["application.instance:app-1/0"])
        );
    }

    #[tokio::test]
    async fn tick_skips_shipping_when_the_builder_fails() {
        let sink = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/series"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&sink)
            .await;

        let reporter = Reporter::new(
            &format!("{}/api/v1/series", sink.uri()),
            "key-1",
            "host-1",
            Duration::from_secs(60),
            Arc::new(FailingBuilder),
            false,
        )
        .unwrap();

        reporter.tick().await;
    }

    #[tokio::test]
    async fn tick_survives_a_sink_rejection() {
        let sink = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/series"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bad api key"))
            .expect(1)
            .mount(&sink)
            .await;

        let reporter = Reporter::new(
            &format!("{}/api/v1/series", sink.uri()),
            "key-1",
            "host-1",
            Duration::from_secs(60),
            Arc::new(FixedBuilder(vec![point("application.instance:app-1/0")])),
            false,
        )
        .unwrap();

        // The rejection is logged and swallowed; the loop would tick again.
        reporter.tick().await;
    }
}
