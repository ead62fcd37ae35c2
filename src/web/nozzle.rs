use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::auth::TokenChecker;
use crate::store::{Rate, RateStore};

/// The nozzle's read surface: every retained bucket, or one bucket by
/// timestamp.
pub fn routes(store: Arc<dyn RateStore>, checker: Arc<dyn TokenChecker>) -> Router {
    Router::new()
        .route("/state", get(state_index))
        .route("/state/{timestamp}", get(state_show))
        .layer(middleware::from_fn_with_state(
            checker,
            super::require_firehose_scope,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn state_index(State(store): State<Arc<dyn RateStore>>) -> Json<Vec<Rate>> {
    Json(store.rates().await)
}

async fn state_show(
    State(store): State<Arc<dyn RateStore>>,
    Path(timestamp): Path<String>,
) -> Response {
    let Ok(timestamp) = timestamp.parse::<i64>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match store.rate(timestamp).await {
        Ok(rate) => Json(rate).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
