//! GraphQL documents sent to the target service and helpers to read the
//! responses.
//!
//! Only parsed [`ItemId`]s and validated [`ColumnId`]s are interpolated into
//! document text. Free text travels in variables.

use crate::protocol::{ColumnId, ItemId};
use serde_json::Value as JsonValue;

pub const ADD_FILE_TO_COLUMN: &str = "add_file_to_column";
pub const ADD_FILE_TO_UPDATE: &str = "add_file_to_update";
pub const CREATE_UPDATE: &str = "create_update";
pub const CHANGE_COLUMN_VALUE: &str = "change_column_value";

pub fn item_columns_query(item: ItemId) -> String {
    format!("query {{ items (ids: [{item}]) {{ id board {{ id columns {{ id title type }} }} }} }}")
}

pub fn board_columns_query(board: ItemId) -> String {
    format!("query {{ boards (ids: [{board}]) {{ id columns {{ id title type }} }} }}")
}

pub fn add_file_to_column_mutation(item: ItemId, column: &ColumnId) -> String {
    format!(
        "mutation ($file: File!) {{ {ADD_FILE_TO_COLUMN} (item_id: {item}, column_id: \"{column}\", file: $file) {{ id }} }}"
    )
}

pub fn create_update_mutation(item: ItemId) -> String {
    format!("mutation ($body: String!) {{ {CREATE_UPDATE} (item_id: {item}, body: $body) {{ id }} }}")
}

pub fn add_file_to_update_mutation(update: ItemId) -> String {
    format!(
        "mutation ($file: File!) {{ {ADD_FILE_TO_UPDATE} (update_id: {update}, file: $file) {{ id }} }}"
    )
}

pub fn change_date_mutation(board: ItemId, item: ItemId, column: &ColumnId) -> String {
    format!(
        "mutation ($value: JSON!) {{ {CHANGE_COLUMN_VALUE} (board_id: {board}, item_id: {item}, column_id: \"{column}\", value: $value) {{ id }} }}"
    )
}

/// What a mutation response says about the write.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    /// The service created or changed an object with this id.
    Created(String),
    /// The service answered but did not perform the write.
    Rejected(String),
}

/// Service-level error carried in a response, if any.
pub fn service_error(response: &JsonValue) -> Option<String> {
    if let Some(errors) = response.get("errors").and_then(JsonValue::as_array)
        && !errors.is_empty()
    {
        let message = errors[0]
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown service error");
        return Some(message.to_string());
    }

    if let Some(message) = response.get("error_message").and_then(JsonValue::as_str) {
        return Some(message.to_string());
    }

    response
        .get("error_code")
        .filter(|code| !code.is_null())
        .map(|code| format!("service error code {code}"))
}

/// Reads `data.<field>.id` out of a mutation response.
pub fn mutation_outcome(response: &JsonValue, field: &str) -> MutationOutcome {
    if let Some(message) = service_error(response) {
        return MutationOutcome::Rejected(message);
    }

    match response.pointer(&format!("/data/{field}/id")) {
        Some(JsonValue::String(id)) if !id.is_empty() => MutationOutcome::Created(id.clone()),
        Some(JsonValue::Number(id)) => MutationOutcome::Created(id.to_string()),
        _ => MutationOutcome::Rejected(format!("response carried no {field} id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_documents_interpolate_parsed_ids() {
        let column = ColumnId::parse("columnId", "file_col_9").unwrap();
        assert_eq!(
            add_file_to_column_mutation(ItemId::new(555), &column),
            r#"mutation ($file: File!) { add_file_to_column (item_id: 555, column_id: "file_col_9", file: $file) { id } }"#
        );
        assert_eq!(
            item_columns_query(ItemId::new(7)),
            "query { items (ids: [7]) { id board { id columns { id title type } } } }"
        );
        assert_eq!(
            board_columns_query(ItemId::new(9)),
            "query { boards (ids: [9]) { id columns { id title type } } }"
        );
        assert!(add_file_to_update_mutation(ItemId::new(3)).contains("update_id: 3"));
        assert!(
            change_date_mutation(ItemId::new(1), ItemId::new(2), &column)
                .contains(r#"board_id: 1, item_id: 2, column_id: "file_col_9""#)
        );
    }

    #[test]
    fn test_mutation_outcome() {
        let created = json!({"data": {"add_file_to_column": {"id": "9001"}}});
        assert_eq!(
            mutation_outcome(&created, ADD_FILE_TO_COLUMN),
            MutationOutcome::Created("9001".into())
        );

        let numeric = json!({"data": {"create_update": {"id": 77}}});
        assert_eq!(
            mutation_outcome(&numeric, CREATE_UPDATE),
            MutationOutcome::Created("77".into())
        );

        let rejected = json!({"errors": [{"message": "Column not found"}], "data": null});
        assert_eq!(
            mutation_outcome(&rejected, ADD_FILE_TO_COLUMN),
            MutationOutcome::Rejected("Column not found".into())
        );

        let legacy = json!({"error_code": "ColumnValueException", "error_message": "invalid column"});
        assert_eq!(
            mutation_outcome(&legacy, ADD_FILE_TO_COLUMN),
            MutationOutcome::Rejected("invalid column".into())
        );

        let empty = json!({"data": {"add_file_to_column": null}});
        assert!(matches!(
            mutation_outcome(&empty, ADD_FILE_TO_COLUMN),
            MutationOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_empty_errors_array_is_not_an_error() {
        let response = json!({"errors": [], "data": {"add_file_to_column": {"id": "1"}}});
        assert_eq!(service_error(&response), None);
    }
}
