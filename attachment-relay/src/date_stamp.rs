//! Date Stamper: sets a date column to today's UTC date. Best effort; the
//! outcome is reported, never raised.

use crate::client::TargetService;
use crate::graphql::{self, MutationOutcome};
use crate::metrics_defs::DATE_STAMP_FAILURES;
use crate::schema::ColumnTarget;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use shared::counter;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateStampOutcome {
    pub item_id: String,
    pub column_id: String,
    pub date: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonValue>,
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub struct DateStamper<'a> {
    service: &'a dyn TargetService,
    token: &'a str,
}

impl<'a> DateStamper<'a> {
    pub fn new(service: &'a dyn TargetService, token: &'a str) -> Self {
        DateStamper { service, token }
    }

    pub async fn stamp(&self, target: &ColumnTarget, date: NaiveDate) -> DateStampOutcome {
        let date = date.format("%Y-%m-%d").to_string();
        let mut outcome = DateStampOutcome {
            item_id: target.item_id.to_string(),
            column_id: target.column_id.to_string(),
            date: date.clone(),
            success: false,
            error: None,
            response: None,
        };

        let Some(board_id) = target.board_id else {
            outcome.error = Some("board id unknown, date not stamped".to_string());
            tracing::info!(item = %target.item_id, "skipping date stamp without board id");
            return outcome;
        };

        let mutation = graphql::change_date_mutation(board_id, target.item_id, &target.column_id);
        let variables = json!({ "value": json!({ "date": date }).to_string() });

        match self.service.query(self.token, &mutation, variables).await {
            Ok(response) => {
                match graphql::mutation_outcome(&response, graphql::CHANGE_COLUMN_VALUE) {
                    MutationOutcome::Created(_) => outcome.success = true,
                    MutationOutcome::Rejected(message) => outcome.error = Some(message),
                }
                outcome.response = Some(response);
            }
            Err(e) => outcome.error = Some(e.to_string()),
        }

        if !outcome.success {
            tracing::warn!(
                item = %target.item_id,
                column = %target.column_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "date stamp failed"
            );
            counter!(DATE_STAMP_FAILURES).increment(1);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RelayError;
    use crate::protocol::{ColumnId, ItemId};
    use crate::testutils::{Call, MockTargetService, created, rejected};

    fn target(board: Option<u64>) -> ColumnTarget {
        ColumnTarget {
            item_id: ItemId::new(555),
            board_id: board.map(ItemId::new),
            column_id: ColumnId::parse("column", "date4").unwrap(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
    }

    #[tokio::test]
    async fn test_stamp_sends_iso_date() {
        let service = MockTargetService::new();
        service.push_query(Ok(created("change_column_value", "555")));

        let outcome = DateStamper::new(&service, "t")
            .stamp(&target(Some(99)), date())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.date, "2026-03-07");
        assert_eq!(outcome.column_id, "date4");

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        let Call::Query {
            query, variables, ..
        } = &calls[0]
        else {
            panic!("expected a query call");
        };
        assert!(query.contains(r#"board_id: 99, item_id: 555, column_id: "date4""#));
        assert_eq!(variables["value"], r#"{"date":"2026-03-07"}"#);
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let service = MockTargetService::new();
        service.push_query(Ok(rejected("invalid value")));

        let outcome = DateStamper::new(&service, "t")
            .stamp(&target(Some(99)), date())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("invalid value"));
        assert!(outcome.response.is_some());
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let service = MockTargetService::new();
        service.push_query(Err(RelayError::UpstreamTimeout("api".into())));

        let outcome = DateStamper::new(&service, "t")
            .stamp(&target(Some(99)), date())
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_missing_board_skips_call() {
        let service = MockTargetService::new();

        let outcome = DateStamper::new(&service, "t").stamp(&target(None), date()).await;

        assert!(!outcome.success);
        assert_eq!(service.calls().len(), 0);
    }
}
