pub mod accumulator;
pub mod nozzle;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{TokenChecker, REQUIRED_SCOPE};

/// Middleware: admit a request iff its `Authorization` value splits into
/// exactly two whitespace-separated parts and the second part validates at
/// the firehose scope. Anything else is a 400; a failed validation is a 401.
pub async fn require_firehose_scope(
    State(checker): State<Arc<dyn TokenChecker>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    if !checker.check_token(parts[1], REQUIRED_SCOPE).await {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}
