//! services/api/src/web/sheets.rs
//!
//! Export handlers (CSV download and spreadsheet push) and the spreadsheet
//! account link lifecycle.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use receipt_pipeline_core::OwnerIdentity;
use std::sync::Arc;

use crate::error::ApiError;
use crate::web::dto::{ExportRequest, LinkRequest, LinkStatus, SpreadsheetExportResponse};
use crate::web::state::AppState;

/// Create a new spreadsheet holding the folder's receipts.
#[utoipa::path(
    post,
    path = "/sheets/export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Spreadsheet created and filled", body = SpreadsheetExportResponse),
        (status = 401, description = "No linked spreadsheet account (`unlinked_account`)"),
        (status = 404, description = "Unknown folder or nothing to export"),
        (status = 502, description = "Provider failed; may carry an orphaned spreadsheetId"),
        (status = 504, description = "Provider timed out")
    ),
    security(("bearer" = []))
)]
pub async fn export_sheet_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<SpreadsheetExportResponse>, ApiError> {
    let done = state
        .exporter
        .export_spreadsheet(&owner.owner_id, &req.folder_id)
        .await?;
    Ok(Json(SpreadsheetExportResponse {
        spreadsheet_id: done.spreadsheet_id,
        spreadsheet_url: done.spreadsheet_url,
        total_rows: done.total_rows,
        total_receipts: done.total_receipts,
    }))
}

/// Download the folder's receipts as CSV.
#[utoipa::path(
    post,
    path = "/sheets/download-csv",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 404, description = "Unknown folder or nothing to export")
    ),
    security(("bearer" = []))
)]
pub async fn download_csv_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let csv = state
        .exporter
        .export_csv(&owner.owner_id, &req.folder_id)
        .await?;
    let disposition = format!("attachment; filename=\"{}\"", csv.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv.body,
    ))
}

/// Store (or replace) the caller's spreadsheet refresh token.
#[utoipa::path(
    post,
    path = "/sheets/link",
    request_body = LinkRequest,
    responses(
        (status = 204, description = "Account linked"),
        (status = 400, description = "Missing refreshToken")
    ),
    security(("bearer" = []))
)]
pub async fn link_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
    Json(req): Json<LinkRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .exporter
        .link_account(&owner.owner_id, &req.refresh_token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/sheets/link",
    responses((status = 204, description = "Account unlinked (or was not linked)")),
    security(("bearer" = []))
)]
pub async fn unlink_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
) -> Result<StatusCode, ApiError> {
    state.exporter.unlink_account(&owner.owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/sheets/status",
    responses((status = 200, description = "Whether a spreadsheet account is linked", body = LinkStatus)),
    security(("bearer" = []))
)]
pub async fn link_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerIdentity>,
) -> Result<Json<LinkStatus>, ApiError> {
    let linked = state.exporter.is_linked(&owner.owner_id).await?;
    Ok(Json(LinkStatus { linked }))
}
