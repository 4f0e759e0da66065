pub mod auth;
pub mod dto;
pub mod folders;
pub mod middleware;
pub mod receipts;
pub mod rest;
pub mod sheets;
pub mod state;
pub mod upload;

pub use middleware::require_auth;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the API router: `/health` is public, everything else requires a
/// bearer token.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(rest::health_handler));

    let protected_routes = Router::new()
        .route("/folders/create", post(folders::create_folder_handler))
        .route("/folders/getFolders", get(folders::list_folders_handler))
        .route("/folders/{folder_id}", delete(folders::delete_folder_handler))
        .route("/upload/single", post(upload::upload_single_handler))
        .route("/upload/batch", post(upload::upload_batch_handler))
        .route("/upload/reprocess/{receipt_id}", post(upload::reprocess_handler))
        .route("/receipts", get(receipts::list_receipts_handler))
        .route("/receipts/uncategorized", get(receipts::list_uncategorized_handler))
        .route(
            "/receipts/folder/{folder_id}",
            get(receipts::list_folder_receipts_handler),
        )
        .route("/receipts/{receipt_id}", delete(receipts::delete_receipt_handler))
        .route("/receipts/{receipt_id}/folder", put(receipts::assign_folder_handler))
        .route("/sheets/export", post(sheets::export_sheet_handler))
        .route("/sheets/download-csv", post(sheets::download_csv_handler))
        .route(
            "/sheets/link",
            post(sheets::link_account_handler).delete(sheets::unlink_account_handler),
        )
        .route("/sheets/status", get(sheets::link_status_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
