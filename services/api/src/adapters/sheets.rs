//! services/api/src/adapters/sheets.rs
//!
//! This module contains the adapter for the Google Sheets API and Google's
//! OAuth token endpoint. It implements the `SpreadsheetService` port from the
//! `core` crate.

use async_trait::async_trait;
use receipt_pipeline_core::{
    domain::{SheetCell, SpreadsheetDocument},
    ports::{PortError, PortResult, SpreadsheetService},
};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct GoogleSheetsAdapter {
    http: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl GoogleSheetsAdapter {
    pub fn new(
        client_id: Option<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("receipt-pipeline")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            client_id,
            client_secret,
        })
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
    spreadsheet_url: String,
}

/// The body of a values update. Numbers go out as JSON numbers and text as
/// strings; with `RAW` input neither is reinterpreted by the provider.
fn values_body(rows: &[Vec<SheetCell>]) -> Value {
    let values: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    SheetCell::Text(text) => Value::from(text.as_str()),
                    SheetCell::Number(n) => Value::from(*n),
                })
                .collect()
        })
        .collect();
    json!({ "range": "A1", "majorDimension": "ROWS", "values": values })
}

fn transport_error(context: &str, e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout(format!("{}: {}", context, e))
    } else {
        PortError::Unexpected(format!("{}: {}", context, e))
    }
}

/// Passes successful responses through and turns error statuses into port errors.
async fn check(context: &str, response: Response) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(context, status = status.as_u16(), body = %body, "Spreadsheet provider refused the call");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        // A revoked or expired refresh token comes back as 400 invalid_grant.
        StatusCode::BAD_REQUEST if body.contains("invalid_grant") => PortError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            PortError::Timeout(format!("{}: HTTP {}", context, status))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            PortError::Unexpected(format!("{}: HTTP {}", context, status))
        }
        _ => PortError::Rejected(format!("{}: HTTP {} {}", context, status, body)),
    })
}

//=========================================================================================
// `SpreadsheetService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpreadsheetService for GoogleSheetsAdapter {
    async fn access_token(&self, refresh_token: &str) -> PortResult<String> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(PortError::Rejected(
                "spreadsheet export is not configured on this server".to_string(),
            ));
        };
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| transport_error("token refresh", e))?;
        let token: TokenResponse = check("token refresh", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("token refresh", e))?;
        debug!("Minted spreadsheet access token");
        Ok(token.access_token)
    }

    async fn create_document(&self, access_token: &str, title: &str) -> PortResult<SpreadsheetDocument> {
        let response = self
            .http
            .post(SHEETS_URL)
            .bearer_auth(access_token)
            .json(&json!({ "properties": { "title": title } }))
            .send()
            .await
            .map_err(|e| transport_error("create spreadsheet", e))?;
        let created: CreatedSpreadsheet = check("create spreadsheet", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("create spreadsheet", e))?;
        Ok(SpreadsheetDocument {
            spreadsheet_id: created.spreadsheet_id,
            spreadsheet_url: created.spreadsheet_url,
        })
    }

    async fn write_rows(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        rows: Vec<Vec<SheetCell>>,
    ) -> PortResult<()> {
        let url = format!(
            "{}/{}/values/A1?valueInputOption=RAW",
            SHEETS_URL, spreadsheet_id
        );
        let response = self
            .http
            .put(url)
            .bearer_auth(access_token)
            .json(&values_body(&rows))
            .send()
            .await
            .map_err(|e| transport_error("write rows", e))?;
        check("write rows", response).await?;
        Ok(())
    }

    async fn bold_header_row(&self, access_token: &str, spreadsheet_id: &str) -> PortResult<()> {
        let url = format!("{}/{}:batchUpdate", SHEETS_URL, spreadsheet_id);
        let body = json!({
            "requests": [{
                "repeatCell": {
                    "range": { "sheetId": 0, "startRowIndex": 0, "endRowIndex": 1 },
                    "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
                    "fields": "userEnteredFormat.textFormat.bold"
                }
            }]
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("format header", e))?;
        check("format header", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_sent_typed_and_formulas_stay_text() {
        let rows = vec![
            vec![SheetCell::text("Vendor"), SheetCell::text("Total"), SheetCell::text("Code")],
            vec![
                SheetCell::text("=HYPERLINK(\"http://evil\")"),
                SheetCell::Number(26.06),
                SheetCell::text("0012"),
            ],
        ];
        let body = values_body(&rows);
        assert_eq!(body["majorDimension"], "ROWS");
        assert_eq!(
            body["values"],
            json!([
                ["Vendor", "Total", "Code"],
                ["=HYPERLINK(\"http://evil\")", 26.06, "0012"]
            ])
        );
        assert!(body["values"][1][1].is_f64());
    }
}
