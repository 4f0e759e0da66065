//! crates/receipt_pipeline_core/src/export.rs
//!
//! The export engine: flattens a collection's records into schema-ordered rows
//! and renders them as CSV text or as a new external spreadsheet.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{
    Collection, ColumnType, ExportTable, Record, SheetCell, SpreadsheetCredential,
};
use crate::error::{bounded, PipelineError, PipelineResult, Step};
use crate::ports::{DatabaseService, SpreadsheetService};
use crate::records::RecordStore;
use crate::schema::SchemaRegistry;

/// Provider key under which spreadsheet credentials are stored.
pub const SHEETS_PROVIDER: &str = "google_sheets";

//=========================================================================================
// Flattening and CSV
//=========================================================================================

/// One row per field-map, columns in schema order, `""` for absent values.
pub fn flatten(schema: &Collection, records: &[Record]) -> PipelineResult<ExportTable> {
    let headers = schema.column_names();
    let rows: Vec<Vec<String>> = records
        .iter()
        .flat_map(|record| record.field_maps.iter())
        .map(|map| {
            headers
                .iter()
                .map(|h| map.get(h).unwrap_or_default().to_string())
                .collect()
        })
        .collect();

    if rows.is_empty() {
        return Err(PipelineError::NoData(format!(
            "Folder '{}' has no receipt data to export yet; add data first",
            schema.name
        )));
    }
    Ok(ExportTable {
        headers,
        rows,
        record_count: records.iter().filter(|r| !r.field_maps.is_empty()).count(),
    })
}

/// Quoted if and only if the field holds a comma, a double quote or a newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders the header line followed by the rows, joined with `\n`, with no
/// trailing newline.
pub fn to_csv(headers: &[String], rows: &[Vec<String>]) -> String {
    std::iter::once(csv_line(headers))
        .chain(rows.iter().map(|row| csv_line(row)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses CSV text produced by `to_csv` (or any RFC 4180 style input) back
/// into a header line and rows.
pub fn parse_csv(text: &str) -> PipelineResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut lines: Vec<Vec<String>> = Vec::new();
    let mut line: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => line.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line.push(std::mem::take(&mut field));
                lines.push(std::mem::take(&mut line));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(PipelineError::Validation(
            "unterminated quoted field".to_string(),
        ));
    }
    if !field.is_empty() || !line.is_empty() || text.ends_with(',') {
        line.push(field);
        lines.push(line);
    } else if !text.is_empty() && !text.ends_with('\n') {
        lines.push(vec![String::new()]);
    }

    let mut lines = lines.into_iter();
    let headers = lines.next().unwrap_or_default();
    Ok((headers, lines.collect()))
}

/// Spreadsheet cell for a value. Numeric columns become numbers once currency
/// symbols and thousands separators are dropped; anything else, including a
/// numeric value that does not parse, stays text.
pub fn render_cell(column_type: ColumnType, raw: &str) -> SheetCell {
    if !column_type.is_numeric() {
        return SheetCell::text(raw);
    }
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | ' '))
        .collect();
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => SheetCell::Number(n),
        _ => SheetCell::text(raw),
    }
}

fn csv_filename(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim();
    if stem.is_empty() {
        "export.csv".to_string()
    } else {
        format!("{stem}.csv")
    }
}

//=========================================================================================
// Export Results
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub body: String,
    pub total_rows: usize,
    pub total_receipts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetExport {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
    pub total_rows: usize,
    pub total_receipts: usize,
}

//=========================================================================================
// The Exporter
//=========================================================================================

#[derive(Clone)]
pub struct Exporter {
    db: Arc<dyn DatabaseService>,
    schemas: SchemaRegistry,
    records: RecordStore,
    sheets: Arc<dyn SpreadsheetService>,
    call_timeout: Duration,
}

impl Exporter {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        schemas: SchemaRegistry,
        records: RecordStore,
        sheets: Arc<dyn SpreadsheetService>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            db,
            schemas,
            records,
            sheets,
            call_timeout,
        }
    }

    pub async fn flatten_for_export(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PipelineResult<(Collection, ExportTable)> {
        let schema = self.schemas.get_schema(owner_id, collection_id).await?;
        let records = self.records.list_by_collection(owner_id, collection_id).await?;
        let table = flatten(&schema, &records)?;
        Ok((schema, table))
    }

    pub async fn export_csv(&self, owner_id: &str, collection_id: &str) -> PipelineResult<CsvExport> {
        let (schema, table) = self.flatten_for_export(owner_id, collection_id).await?;
        let body = to_csv(&table.headers, &table.rows);
        info!(owner_id, collection_id, rows = table.rows.len(), "CSV export rendered");
        Ok(CsvExport {
            filename: csv_filename(&schema.name),
            body,
            total_rows: table.rows.len(),
            total_receipts: table.record_count,
        })
    }

    /// Creates a new spreadsheet and fills it with the collection's rows.
    ///
    /// Without a linked account this fails before any external call. Each
    /// call creates a fresh document; when populating it fails the document is
    /// reported in a `PartialExport` error and left as is.
    pub async fn export_spreadsheet(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> PipelineResult<SpreadsheetExport> {
        let credential = self
            .credential(owner_id)
            .await?
            .ok_or(PipelineError::UnlinkedAccount)?;
        let (schema, table) = self.flatten_for_export(owner_id, collection_id).await?;

        let limit = self.call_timeout;
        // A refused refresh credential means the link has to be made again.
        let access_token = bounded(
            Step::AccessToken,
            limit,
            self.sheets.access_token(&credential.refresh_token),
        )
        .await
        .map_err(|e| match e {
            PipelineError::Unauthenticated => PipelineError::UnlinkedAccount,
            other => other,
        })?;

        let title = format!("{} - {}", schema.name, Utc::now().format("%Y-%m-%d"));
        let document = bounded(
            Step::CreateDocument,
            limit,
            self.sheets.create_document(&access_token, &title),
        )
        .await?;
        info!(owner_id, collection_id, spreadsheet_id = %document.spreadsheet_id, "Spreadsheet created");

        let total_rows = table.rows.len();
        let mut values = Vec::with_capacity(total_rows + 1);
        values.push(table.headers.iter().map(SheetCell::text).collect());
        for row in table.rows {
            values.push(
                row.iter()
                    .zip(&schema.columns)
                    .map(|(raw, column)| render_cell(column.column_type, raw))
                    .collect(),
            );
        }

        if let Err(e) = bounded(
            Step::WriteRows,
            limit,
            self.sheets
                .write_rows(&access_token, &document.spreadsheet_id, values),
        )
        .await
        {
            warn!(
                owner_id,
                spreadsheet_id = %document.spreadsheet_id,
                error = %e,
                "Spreadsheet created but writing rows failed; leaving orphaned document"
            );
            return Err(PipelineError::PartialExport {
                spreadsheet_id: document.spreadsheet_id,
                spreadsheet_url: document.spreadsheet_url,
                step: Step::WriteRows,
                cause: e.to_string(),
            });
        }

        if let Err(e) = bounded(
            Step::FormatHeader,
            limit,
            self.sheets
                .bold_header_row(&access_token, &document.spreadsheet_id),
        )
        .await
        {
            warn!(spreadsheet_id = %document.spreadsheet_id, error = %e, "Header formatting failed; data is intact");
        }

        info!(owner_id, collection_id, total_rows, "Spreadsheet export finished");
        Ok(SpreadsheetExport {
            spreadsheet_id: document.spreadsheet_id,
            spreadsheet_url: document.spreadsheet_url,
            total_rows,
            total_receipts: table.record_count,
        })
    }

    async fn credential(&self, owner_id: &str) -> PipelineResult<Option<SpreadsheetCredential>> {
        self.db
            .get_spreadsheet_credential(owner_id, SHEETS_PROVIDER)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))
    }

    pub async fn is_linked(&self, owner_id: &str) -> PipelineResult<bool> {
        Ok(self.credential(owner_id).await?.is_some())
    }

    /// Stores (or replaces) the owner's refresh credential.
    pub async fn link_account(&self, owner_id: &str, refresh_token: &str) -> PipelineResult<()> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(PipelineError::Validation("refreshToken is required".to_string()));
        }
        self.db
            .save_spreadsheet_credential(SpreadsheetCredential {
                owner_id: owner_id.to_string(),
                provider: SHEETS_PROVIDER.to_string(),
                refresh_token: refresh_token.to_string(),
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))?;
        info!(owner_id, "Spreadsheet account linked");
        Ok(())
    }

    /// Revokes the stored credential. Returns whether one existed.
    pub async fn unlink_account(&self, owner_id: &str) -> PipelineResult<bool> {
        let removed = self
            .db
            .delete_spreadsheet_credential(owner_id, SHEETS_PROVIDER)
            .await
            .map_err(|e| PipelineError::from_port(Step::Store, e))?;
        info!(owner_id, removed, "Spreadsheet account unlinked");
        Ok(removed)
    }
}
