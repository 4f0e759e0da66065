//! services/api/src/adapters/extraction_llm.rs
//!
//! This module contains the adapter for the receipt-reading vision model.
//! It implements the `ExtractionService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use receipt_pipeline_core::{
    domain::Column,
    ports::{ExtractionService, PortError, PortResult},
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

const SYSTEM_INSTRUCTIONS: &str = r#"You read photographed receipts and return their contents as JSON.

Return a single JSON object of the form {"items": [ { "<column>": "<value>", ... }, ... ]}.

Rules:
- Use ONLY the column names you are given, spelled exactly as given.
- Produce one object per purchased line item when the receipt lists several items that each fill the columns; otherwise produce exactly one object for the whole receipt.
- Write every value as a string. Numbers use a dot as the decimal separator and no currency symbol. Dates use YYYY-MM-DD.
- Leave a column out when the receipt does not show it. Never guess.
- If the image is not a receipt or cannot be read, return {"items": []}."#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ExtractionService` using an OpenAI vision model.
#[derive(Clone)]
pub struct OpenAiExtractionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiExtractionAdapter {
    /// Creates a new `OpenAiExtractionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Describes the columns the model may use, one per line, in schema order.
fn describe_columns(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "- \"{}\" ({}{})",
                c.name,
                c.column_type,
                if c.required { ", required" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    })
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parses the model's reply into raw field-maps. Accepts the documented
/// `{"items": [...]}` shape, a bare array, or a single object, with or
/// without a Markdown code fence.
pub(crate) fn parse_items(reply: &str) -> PortResult<Vec<BTreeMap<String, String>>> {
    let body = fence_pattern()
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply);

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| PortError::Unexpected(format!("extraction reply is not JSON: {}", e)))?;

    let items = match parsed {
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(PortError::Unexpected(
                    "extraction reply has a non-array 'items'".to_string(),
                ))
            }
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        _ => {
            return Err(PortError::Unexpected(
                "extraction reply is neither an object nor an array".to_string(),
            ))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(
                fields
                    .into_iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k, v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
            _ => None,
        })
        .filter(|m| !m.is_empty())
        .collect())
}

fn map_openai_error(e: OpenAIError) -> PortError {
    match e {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => PortError::Timeout(inner.to_string()),
        OpenAIError::ApiError(api) => PortError::Rejected(api.message),
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// `ExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ExtractionService for OpenAiExtractionAdapter {
    async fn extract(
        &self,
        image_url: &str,
        columns: &[Column],
    ) -> PortResult<Vec<BTreeMap<String, String>>> {
        let instructions = format!(
            "Extract these columns from the receipt image:\n{}",
            describe_columns(columns)
        );

        let text_part: ChatCompletionRequestUserMessageContentPart =
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(instructions)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into();
        let image_part: ChatCompletionRequestUserMessageContentPart =
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(image_url)
                        .detail(ImageDetail::High)
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into();

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(vec![text_part, image_part])
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .temperature(0.0)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Extraction model returned no content.".to_string())
            })?;

        let items = parse_items(&content).map_err(|e| {
            warn!(error = %e, "Could not parse extraction reply");
            e
        })?;
        debug!(line_items = items.len(), "Extraction model replied");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use receipt_pipeline_core::domain::ColumnType;

    #[test]
    fn parses_documented_shape_and_stringifies_scalars() {
        let items =
            parse_items(r#"{"items":[{"Vendor":"Acme","Total":26.06,"Paid":true,"Note":null}]}"#)
                .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["Vendor"], "Acme");
        assert_eq!(items[0]["Total"], "26.06");
        assert_eq!(items[0]["Paid"], "true");
        assert!(!items[0].contains_key("Note"));
    }

    #[test]
    fn accepts_fenced_arrays_and_single_objects() {
        let fenced = "```json\n[{\"Vendor\":\"A\"},{\"Vendor\":\"B\"}]\n```";
        assert_eq!(parse_items(fenced).unwrap().len(), 2);
        assert_eq!(parse_items(r#"{"Vendor":"Solo"}"#).unwrap()[0]["Vendor"], "Solo");
    }

    #[test]
    fn empty_items_is_not_an_error() {
        assert!(parse_items(r#"{"items": []}"#).unwrap().is_empty());
        assert!(parse_items("not json").is_err());
    }

    #[test]
    fn column_description_keeps_schema_order() {
        let text = describe_columns(&[
            Column::new("Vendor", ColumnType::Text, true),
            Column::new("Total", ColumnType::Number, false),
        ]);
        assert_eq!(text, "- \"Vendor\" (text, required)\n- \"Total\" (number)");
    }
}
