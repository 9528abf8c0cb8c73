//! Wire types for the relay endpoint and their validated form.
//!
//! # Request
//! ```json
//! {
//!   "targetId": "555",
//!   "parentId": "12",
//!   "boardId": "99",
//!   "columnId": "file_col_9",
//!   "fileName": "Estimate 42.pdf",
//!   "payload": "JVBERi0xLjcK...",
//!   "authToken": "..."
//! }
//! ```
//!
//! `itemId`, `pdfBase64` and `token` are accepted as aliases for `targetId`,
//! `payload` and `authToken`. Identifiers may be JSON strings or numbers.
//!
//! # Response
//! ```json
//! {
//!   "success": true,
//!   "targetItemId": "12",
//!   "targetColumnId": "files",
//!   "method": "column",
//!   "diagnostics": { "primaryResponse": { "data": { ... } } }
//! }
//! ```

use crate::date_stamp::DateStampOutcome;
use crate::errors::{RelayError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Request body accepted by the relay, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    #[serde(default, alias = "itemId", deserialize_with = "opt_id")]
    pub target_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub board_id: Option<String>,
    #[serde(default)]
    pub column_id: Option<String>,
    #[serde(default)]
    pub date_column_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, alias = "pdfBase64")]
    pub payload: Option<String>,
    #[serde(default, alias = "token")]
    pub auth_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

fn opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

/// Numeric identifier of a record or board in the target service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemId(u64);

impl ItemId {
    pub fn new(id: u64) -> Self {
        ItemId(id)
    }

    pub fn parse(field: &'static str, raw: &str) -> Result<Self> {
        raw.trim()
            .parse::<u64>()
            .map(ItemId)
            .map_err(|_| RelayError::InvalidIdentifier {
                field,
                value: raw.to_string(),
            })
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column identifier, restricted to characters that are safe inside a
/// GraphQL string literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn parse(field: &'static str, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RelayError::InvalidColumnId {
                field,
                value: raw.to_string(),
            });
        }
        Ok(ColumnId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request that passed validation. Identifiers are parsed, the file name
/// is sanitised and the payload is decoded.
#[derive(Clone, Debug)]
pub struct AttachmentJob {
    pub target_id: ItemId,
    pub parent_id: Option<ItemId>,
    pub board_id: Option<ItemId>,
    pub column_id: Option<ColumnId>,
    pub date_column_id: Option<ColumnId>,
    pub file_name: String,
    pub payload: Option<Bytes>,
    pub auth_token: Option<String>,
}

impl AttachmentJob {
    pub fn from_request(request: AttachmentRequest, default_file_name: &str) -> Result<Self> {
        let target_id = non_empty(request.target_id)
            .ok_or(RelayError::MissingField("targetId"))
            .and_then(|raw| ItemId::parse("targetId", &raw))?;
        let parent_id = non_empty(request.parent_id)
            .map(|raw| ItemId::parse("parentId", &raw))
            .transpose()?;
        let board_id = non_empty(request.board_id)
            .map(|raw| ItemId::parse("boardId", &raw))
            .transpose()?;
        let column_id = non_empty(request.column_id)
            .map(|raw| ColumnId::parse("columnId", &raw))
            .transpose()?;
        let date_column_id = non_empty(request.date_column_id)
            .map(|raw| ColumnId::parse("dateColumnId", &raw))
            .transpose()?;
        let payload = non_empty(request.payload)
            .map(|raw| decode_payload(&raw))
            .transpose()?;

        Ok(AttachmentJob {
            target_id,
            parent_id,
            board_id,
            column_id,
            date_column_id,
            file_name: sanitize_file_name(request.file_name.as_deref(), default_file_name),
            payload,
            auth_token: non_empty(request.auth_token),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decodes standard base64, tolerating a `data:...;base64,` prefix and
/// embedded line breaks.
pub fn decode_payload(raw: &str) -> Result<Bytes> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(Bytes::from(STANDARD.decode(compact)?))
}

/// Restricts a display name to `[A-Za-z0-9._ -]` and ensures a `.pdf`
/// extension.
pub fn sanitize_file_name(name: Option<&str>, default_file_name: &str) -> String {
    let cleaned: String = name
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ' ' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    let base = if cleaned.is_empty() || cleaned.chars().all(|c| c == '.' || c == '_') {
        default_file_name
    } else {
        cleaned
    };

    if base.to_ascii_lowercase().ends_with(".pdf") {
        base.to_string()
    } else {
        format!("{base}.pdf")
    }
}

/// How the file ended up attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachMethod {
    Column,
    Update,
    None,
}

impl AttachMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachMethod::Column => "column",
            AttachMethod::Update => "update",
            AttachMethod::None => "none",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_response: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_response: Option<JsonValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempted_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_stamp: Option<DateStampOutcome>,
}

/// Outcome of one relay invocation. Built fresh per call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_column_id: Option<String>,
    pub method: AttachMethod,
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttachmentResult {
    /// Nothing to upload; no remote call was made.
    pub fn nothing_to_attach() -> Self {
        AttachmentResult {
            success: true,
            target_item_id: None,
            target_column_id: None,
            method: AttachMethod::None,
            diagnostics: Diagnostics::default(),
            error: None,
        }
    }
}
