use crate::client::TargetService;
use crate::errors::{RelayError, Result};
use crate::multipart::MultipartBody;
use crate::protocol::{AttachmentJob, ItemId};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub enum Call {
    Query {
        token: String,
        query: String,
        variables: JsonValue,
    },
    Upload {
        token: String,
        content_type: String,
        boundary: String,
        body: Bytes,
    },
}

/// Scripted [`TargetService`]. Query and upload responses are handed out in
/// the order they were pushed; every call is recorded.
#[derive(Default)]
pub struct MockTargetService {
    query_responses: Mutex<VecDeque<Result<JsonValue>>>,
    upload_responses: Mutex<VecDeque<Result<JsonValue>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTargetService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_query(&self, response: Result<JsonValue>) {
        self.query_responses.lock().unwrap().push_back(response);
    }

    pub fn push_upload(&self, response: Result<JsonValue>) {
        self.upload_responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Query { query, .. } => Some(query),
                Call::Upload { .. } => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Upload { boundary, body, .. } => Some((boundary, body)),
                Call::Query { .. } => None,
            })
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries().len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads().len()
    }
}

#[async_trait]
impl TargetService for MockTargetService {
    async fn query(&self, token: &str, query: &str, variables: JsonValue) -> Result<JsonValue> {
        self.calls.lock().unwrap().push(Call::Query {
            token: token.to_string(),
            query: query.to_string(),
            variables,
        });
        self.query_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RelayError::InternalError("unscripted query".into())))
    }

    async fn upload(&self, token: &str, body: MultipartBody) -> Result<JsonValue> {
        self.calls.lock().unwrap().push(Call::Upload {
            token: token.to_string(),
            content_type: body.content_type(),
            boundary: body.boundary().to_string(),
            body: body.into_body(),
        });
        self.upload_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RelayError::InternalError("unscripted upload".into())))
    }
}

/// A schema response shaped like an `items` or `boards` query.
pub fn columns_response(kind: &str, board_id: &str, columns: &[(&str, &str, &str)]) -> JsonValue {
    let columns: Vec<JsonValue> = columns
        .iter()
        .map(|(id, title, ty)| json!({"id": id, "title": title, "type": ty}))
        .collect();
    let board = json!({"id": board_id, "columns": columns});
    match kind {
        "items" => json!({"data": {"items": [{"id": "1", "board": board}]}}),
        _ => json!({"data": {"boards": [board]}}),
    }
}

pub fn created(field: &str, id: &str) -> JsonValue {
    json!({"data": {field: {"id": id}}})
}

pub fn rejected(message: &str) -> JsonValue {
    json!({"errors": [{"message": message}], "data": null})
}

/// A valid job with a 10-byte payload and a credential.
pub fn job(target: u64) -> AttachmentJob {
    AttachmentJob {
        target_id: ItemId::new(target),
        parent_id: None,
        board_id: None,
        column_id: None,
        date_column_id: None,
        file_name: "a.pdf".to_string(),
        payload: Some(Bytes::from_static(b"%PDF-1.4\n%")),
        auth_token: Some("t".to_string()),
    }
}
