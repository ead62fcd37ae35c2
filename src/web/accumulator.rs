use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::TokenChecker;
use crate::store::Rate;

/// Serves one summed bucket for a timestamp. The collector is the production
/// implementation; it fans out to every nozzle on each call.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rate(&self, timestamp: i64) -> Result<Rate>;
}

/// State behind the accumulator surface: the fan-in provider plus the
/// polling interval used when callers ask for timestamp truncation.
#[derive(Clone)]
pub struct RatesState {
    pub provider: Arc<dyn RateProvider>,
    pub interval: Duration,
}

#[derive(Debug, Deserialize)]
struct RatesQuery {
    #[serde(default)]
    truncate_timestamp: bool,
}

/// The accumulator's read surface: one summed bucket by timestamp.
pub fn routes(state: RatesState, checker: Arc<dyn TokenChecker>) -> Router {
    Router::new()
        .route("/rates/{timestamp}", get(rates_show))
        .layer(middleware::from_fn_with_state(
            checker,
            super::require_firehose_scope,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn rates_show(
    State(state): State<RatesState>,
    Path(timestamp): Path<String>,
    Query(query): Query<RatesQuery>,
) -> Response {
    let Ok(mut timestamp) = timestamp.parse::<i64>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if query.truncate_timestamp {
        let interval = state.interval.as_secs().max(1) as i64;
        timestamp -= timestamp.rem_euclid(interval);
    }

    match state.provider.rate(timestamp).await {
        Ok(rate) => Json(rate).into_response(),
        Err(e) => {
            warn!(error = %e, timestamp, "failed to collect rate");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
