//! services/api/src/web/rest.rs
//!
//! Contains the health check handler and the master definition for the
//! OpenAPI specification.

use axum::Json;
use serde::Serialize;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::web::dto::{
    AssignFolderRequest, BatchFailureDto, BatchResponse, CategoryDto, CreateFolderRequest,
    ExportRequest, FolderDto, FolderList, IngestResponse, ItemDto, LinkRequest, LinkStatus,
    ReceiptDto, ReceiptList, SpreadsheetExportResponse,
};
use crate::web::{folders, receipts, sheets, upload};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        folders::create_folder_handler,
        folders::list_folders_handler,
        folders::delete_folder_handler,
        upload::upload_single_handler,
        upload::upload_batch_handler,
        upload::reprocess_handler,
        receipts::list_receipts_handler,
        receipts::list_folder_receipts_handler,
        receipts::list_uncategorized_handler,
        receipts::assign_folder_handler,
        receipts::delete_receipt_handler,
        sheets::export_sheet_handler,
        sheets::download_csv_handler,
        sheets::link_account_handler,
        sheets::unlink_account_handler,
        sheets::link_status_handler,
    ),
    components(
        schemas(
            HealthResponse, CategoryDto, FolderDto, FolderList, CreateFolderRequest, ItemDto,
            ReceiptDto, ReceiptList, IngestResponse, BatchFailureDto, BatchResponse,
            AssignFolderRequest, ExportRequest, SpreadsheetExportResponse, LinkRequest, LinkStatus
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Receipt Pipeline API", description = "Folder schemas, receipt ingestion and tabular export.")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` security scheme referenced by the protected paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "The service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
