//! crates/receipt_pipeline_core/src/domain.rs
//!
//! Defines the pure, core data structures for the receipt pipeline.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Identity
//=========================================================================================

/// The authenticated caller. Decoded from the bearer token and passed explicitly
/// into every pipeline call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub owner_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// True for demo/guest sessions that were not issued by the backend.
    pub guest: bool,
}

//=========================================================================================
// Schema
//=========================================================================================

/// The type tag of a column. Values are always stored as text; the tag only
/// changes how a value is rendered at export time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Number,
    Date,
    /// Rendered like `Number` in spreadsheets, stored like `Text`.
    Currency,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Currency => "currency",
        }
    }

    /// Whether cells of this type should be written as numbers when the
    /// target supports typed cells.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Number | ColumnType::Currency)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a type tag is not one of the recognized column types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported column type '{0}'")]
pub struct UnknownColumnType(pub String);

impl FromStr for ColumnType {
    type Err = UnknownColumnType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ColumnType::Text),
            "number" => Ok(ColumnType::Number),
            "date" => Ok(ColumnType::Date),
            "currency" => Ok(ColumnType::Currency),
            _ => Err(UnknownColumnType(s.to_string())),
        }
    }
}

/// A single named, typed field a collection declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub required: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, required: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            required,
        }
    }
}

/// A named, schema-bearing grouping of records (a "folder" in the client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub owner_id: String,
    /// Client-generated and preserved verbatim by the backend.
    pub collection_id: String,
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<Column>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Column names in declared order. This is also the export header order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

//=========================================================================================
// Records
//=========================================================================================

/// One extracted line item: column name -> raw text value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    pub values: BTreeMap<String, String>,
    /// Set when one or more required columns are absent.
    pub incomplete: bool,
    pub missing_required: Vec<String>,
}

impl FieldMap {
    pub fn from_values(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            incomplete: false,
            missing_required: Vec::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// A persisted unit of extracted data tied to one source image (a "receipt").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub owner_id: String,
    /// `None` means uncategorized.
    pub collection_id: Option<String>,
    pub record_id: String,
    pub image_ref: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub field_maps: Vec<FieldMap>,
}

impl Record {
    pub fn is_incomplete(&self) -> bool {
        self.field_maps.iter().any(|m| m.incomplete)
    }
}

/// A raw image handed to the pipeline by an upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// Optional client-generated record id, kept verbatim when present.
    pub record_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

//=========================================================================================
// Export
//=========================================================================================

/// A stored refresh credential for the external spreadsheet provider.
#[derive(Debug, Clone)]
pub struct SpreadsheetCredential {
    pub owner_id: String,
    pub provider: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
}

/// Flattened, schema-ordered rows ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// The number of records the rows came from.
    pub record_count: usize,
}

/// A newly created external spreadsheet document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetDocument {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
}

/// A single spreadsheet cell. Values are written raw, so a text cell is never
/// parsed as a formula, date or number by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    Text(String),
    Number(f64),
}

impl SheetCell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}
