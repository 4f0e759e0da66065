//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Middleware that validates the bearer token and resolves the caller.
///
/// If valid, inserts the `OwnerIdentity` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract the bearer token
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            debug!(path = %req.uri().path(), "Request without bearer token");
            ApiError::Unauthorized
        })?;

    // 2. Verify it and resolve the owner
    let owner = state.tokens.verify(token)?;

    // 3. Insert the owner into request extensions
    req.extensions_mut().insert(owner);

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
