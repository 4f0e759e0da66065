//! services/api/src/web/dto.rs
//!
//! JSON shapes shared by the HTTP handlers, the HTTP collection source and the
//! device cache. Field names follow the mobile client's camelCase wire format.

use chrono::{DateTime, Utc};
use receipt_pipeline_core::domain::UnknownColumnType;
use receipt_pipeline_core::{Collection, Column, FieldMap, IngestOutcome, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

//=========================================================================================
// Folders
//=========================================================================================

/// One column ("category") of a folder's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryDto {
    pub name: String,
    /// One of `text`, `number`, `date`, `currency`.
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FolderDto {
    pub folder_id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub categories: Vec<CategoryDto>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Column> for CategoryDto {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.column_type.as_str().to_string(),
            required: column.required,
        }
    }
}

impl From<&Collection> for FolderDto {
    fn from(c: &Collection) -> Self {
        Self {
            folder_id: c.collection_id.clone(),
            owner_id: c.owner_id.clone(),
            name: c.name.clone(),
            description: c.description.clone(),
            categories: c.columns.iter().map(CategoryDto::from).collect(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl TryFrom<FolderDto> for Collection {
    type Error = UnknownColumnType;

    fn try_from(dto: FolderDto) -> Result<Self, Self::Error> {
        let columns = dto
            .categories
            .into_iter()
            .map(|c| Ok(Column::new(c.name, c.column_type.parse()?, c.required)))
            .collect::<Result<Vec<_>, UnknownColumnType>>()?;
        Ok(Collection {
            owner_id: dto.owner_id,
            collection_id: dto.folder_id,
            name: dto.name,
            description: dto.description,
            columns,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        })
    }
}

//=========================================================================================
// Receipts
//=========================================================================================

/// One extracted line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemDto {
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDto {
    pub receipt_id: String,
    pub owner_id: String,
    /// `null` for uncategorized receipts.
    pub folder_id: Option<String>,
    pub image_ref: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<ItemDto>,
}

impl From<&FieldMap> for ItemDto {
    fn from(m: &FieldMap) -> Self {
        Self {
            fields: m.values.clone(),
            incomplete: m.incomplete,
            missing_required: m.missing_required.clone(),
        }
    }
}

impl From<ItemDto> for FieldMap {
    fn from(item: ItemDto) -> Self {
        FieldMap {
            values: item.fields,
            incomplete: item.incomplete,
            missing_required: item.missing_required,
        }
    }
}

impl From<&Record> for ReceiptDto {
    fn from(r: &Record) -> Self {
        Self {
            receipt_id: r.record_id.clone(),
            owner_id: r.owner_id.clone(),
            folder_id: r.collection_id.clone(),
            image_ref: r.image_ref.clone(),
            original_filename: r.original_filename.clone(),
            created_at: r.created_at,
            items: r.field_maps.iter().map(ItemDto::from).collect(),
        }
    }
}

impl From<ReceiptDto> for Record {
    fn from(dto: ReceiptDto) -> Self {
        Record {
            owner_id: dto.owner_id,
            collection_id: dto.folder_id,
            record_id: dto.receipt_id,
            image_ref: dto.image_ref,
            original_filename: dto.original_filename,
            created_at: dto.created_at,
            field_maps: dto.items.into_iter().map(FieldMap::from).collect(),
        }
    }
}

//=========================================================================================
// Request and Response Envelopes
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub folder_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub categories: Vec<CategoryDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FolderList {
    pub folders: Vec<FolderDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReceiptList {
    pub receipts: Vec<ReceiptDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub receipt: ReceiptDto,
    /// `extracted`, `incomplete`, `no_data` or `uncategorized`.
    pub status: String,
}

impl From<&IngestOutcome> for IngestResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        Self {
            receipt: ReceiptDto::from(&outcome.record),
            status: outcome.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailureDto {
    pub index: usize,
    pub filename: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub completed: Vec<IngestResponse>,
    pub failed: Vec<BatchFailureDto>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignFolderRequest {
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub folder_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetExportResponse {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
    pub total_rows: usize,
    pub total_receipts: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LinkStatus {
    pub linked: bool,
}
