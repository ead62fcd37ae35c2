use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;

/// How long to wait before reconnecting after a dropped stream or a failed
/// token refresh.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Classification of a decoded firehose record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Counter,
    ValueMetric,
    ContainerMetric,
    HttpStartStop,
    Error,
}

/// A decoded log-transport record. Only `log` records participate in
/// counting; the rest are carried so the processor can discard them by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_kind: EventKind,
    #[serde(default)]
    pub app_guid: String,
    #[serde(default)]
    pub source_instance: String,
    #[serde(default)]
    pub source_type: String,
}

/// Streaming client for the platform log firehose.
///
/// The transport delivers an unbounded newline-delimited JSON stream of
/// [`Envelope`] records, partitioned across subscribers that share a
/// subscription id. The stream cannot be flow-controlled; the consumer's only
/// job is to keep reading and hand records to the channel.
pub struct Consumer {
    addr: String,
    subscription_id: String,
    auth: Arc<Authenticator>,
    client: reqwest::Client,
}

impl Consumer {
    pub fn new(
        addr: &str,
        subscription_id: &str,
        auth: Arc<Authenticator>,
        skip_cert_verify: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()
            .context("failed to build firehose client")?;

        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            auth,
            client,
        })
    }

    /// Consume the firehose indefinitely, sending decoded records to `tx`.
    ///
    /// Reconnects with a fresh token whenever the stream ends or errors.
    /// Returns only when the receiving side hangs up.
    pub async fn run(self, tx: mpsc::Sender<Envelope>) {
        loop {
            let token = match self.auth.refresh_token().await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "failed to refresh token for firehose");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            match self.stream(&token, &tx).await {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "firehose stream interrupted, reconnecting"),
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Read one connection's worth of records. `Ok` means the receiver hung
    /// up; any transport trouble, including a clean end of stream, is an
    /// error so the caller reconnects.
    async fn stream(&self, token: &str, tx: &mpsc::Sender<Envelope>) -> Result<()> {
        let url = format!("{}/firehose/{}", self.addr, self.subscription_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to connect to firehose")?;

        if !response.status().is_success() {
            bail!("firehose returned status {}", response.status());
        }

        info!(url = %url, "connected to firehose");

        let mut body = response.bytes_stream();
        let mut buf = BytesMut::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("firehose read failed")?;
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = buf.split_to(pos + 1);
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_slice::<Envelope>(line) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => debug!(error = %e, "skipping undecodable record"),
                }
            }
        }

        bail!("firehose stream closed")
    }
}
