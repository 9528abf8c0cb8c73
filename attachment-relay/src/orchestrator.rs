//! Attachment Orchestrator: drives one relay invocation from request to
//! result.
//!
//! The invocation walks a fixed sequence of [`Stage`]s:
//!
//! ```text
//! Resolve ──► Primary ──► Done
//!    │           │          ▲
//!    │           ▼          │
//!    │        Fallback ─────┤
//!    └──────────────────────┘
//! ```
//!
//! * `Resolve` finds the file column (or takes the caller's). No column means
//!   `Done` with a business failure and no upload.
//! * `Primary` uploads to the column. A created attachment id means `Done`.
//!   Anything else (service errors, timeouts, non-2xx) moves to `Fallback`.
//! * `Fallback` opens an update on the same record and uploads to it, once.
//!
//! After `Done` the Date Stamper runs if a date column is known. Its outcome
//! is recorded but never changes `success`.
//!
//! Remote failures never escape as errors. Only validation and configuration
//! problems, which are detected before any remote call, are returned as
//! [`RelayError`].

use crate::client::TargetService;
use crate::config::UploadConfig;
use crate::date_stamp::{self, DateStamper};
use crate::errors::{RelayError, Result};
use crate::graphql::{self, MutationOutcome};
use crate::metrics_defs::{ATTACH_DURATION, ATTACH_OUTCOMES, FALLBACK_ATTEMPTS};
use crate::protocol::{
    AttachMethod, AttachmentJob, AttachmentRequest, AttachmentResult, Diagnostics, ItemId,
};
use crate::schema::{ColumnTarget, SchemaResolver};
use bytes::Bytes;
use serde_json::{Value as JsonValue, json};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

pub const NO_FILE_COLUMN: &str = "no file column found";

#[derive(Debug)]
enum Stage {
    Resolve,
    Primary {
        target: ColumnTarget,
    },
    Fallback {
        target: ColumnTarget,
        primary_error: String,
    },
    Done(AttachmentResult),
}

pub struct Orchestrator {
    service: Arc<dyn TargetService>,
    upload: UploadConfig,
    service_token: Option<String>,
}

impl Orchestrator {
    /// `service_token` is the process-wide credential used when a request
    /// brings none.
    pub fn new(
        service: Arc<dyn TargetService>,
        upload: UploadConfig,
        service_token: Option<String>,
    ) -> Self {
        Orchestrator {
            service,
            upload,
            service_token,
        }
    }

    /// Validates `request` and runs it.
    pub async fn attach(&self, request: AttachmentRequest) -> Result<AttachmentResult> {
        let job = AttachmentJob::from_request(request, &self.upload.default_file_name)?;
        self.attach_job(job).await
    }

    pub async fn attach_job(&self, job: AttachmentJob) -> Result<AttachmentResult> {
        let start = Instant::now();

        let Some(payload) = job.payload.clone() else {
            tracing::debug!(item = %job.target_id, "no payload, nothing to attach");
            record_outcome(&AttachmentResult::nothing_to_attach(), start);
            return Ok(AttachmentResult::nothing_to_attach());
        };

        let token = job
            .auth_token
            .clone()
            .or_else(|| self.service_token.clone())
            .ok_or(RelayError::MissingCredential)?;

        let mut invocation = Invocation {
            service: self.service.as_ref(),
            token: &token,
            job: &job,
            payload,
            upload: &self.upload,
            date_target: None,
            diagnostics: Diagnostics::default(),
        };

        let mut stage = Stage::Resolve;
        let mut result = loop {
            stage = match stage {
                Stage::Resolve => invocation.resolve().await,
                Stage::Primary { target } => invocation.primary(target).await,
                Stage::Fallback {
                    target,
                    primary_error,
                } => invocation.fallback(target, primary_error).await,
                Stage::Done(result) => break result,
            };
        };

        if self.upload.stamp_date
            && let Some(date_target) = invocation.date_target.take()
        {
            let outcome = DateStamper::new(self.service.as_ref(), &token)
                .stamp(&date_target, date_stamp::today())
                .await;
            result.diagnostics.date_stamp = Some(outcome);
        }

        tracing::info!(
            item = %job.target_id,
            success = result.success,
            method = result.method.as_str(),
            "relay invocation finished"
        );
        record_outcome(&result, start);

        Ok(result)
    }
}

fn record_outcome(result: &AttachmentResult, start: Instant) {
    let method = result.method.as_str();
    let success = if result.success { "true" } else { "false" };
    counter!(ATTACH_OUTCOMES, "method" => method, "success" => success).increment(1);
    histogram!(ATTACH_DURATION, "method" => method).record(start.elapsed().as_secs_f64());
}

/// State carried through the stages of one invocation.
struct Invocation<'a> {
    service: &'a dyn TargetService,
    token: &'a str,
    job: &'a AttachmentJob,
    payload: Bytes,
    upload: &'a UploadConfig,
    date_target: Option<ColumnTarget>,
    diagnostics: Diagnostics,
}

impl Invocation<'_> {
    async fn resolve(&mut self) -> Stage {
        let resolution = SchemaResolver::new(self.service, self.token)
            .resolve(self.job)
            .await;
        self.diagnostics.attempted_sources = resolution.attempted;
        self.date_target = resolution.date;

        match resolution.file {
            Some(target) => Stage::Primary { target },
            None => {
                tracing::warn!(
                    item = %self.job.target_id,
                    sources = ?self.diagnostics.attempted_sources,
                    "no file column found"
                );
                Stage::Done(self.finish(false, None, AttachMethod::None, Some(NO_FILE_COLUMN.into())))
            }
        }
    }

    async fn primary(&mut self, target: ColumnTarget) -> Stage {
        let mutation = graphql::add_file_to_column_mutation(target.item_id, &target.column_id);
        let (outcome, raw) = self.send_file(&mutation, graphql::ADD_FILE_TO_COLUMN).await;
        self.diagnostics.primary_response = Some(raw);

        match outcome {
            MutationOutcome::Created(asset_id) => {
                tracing::debug!(item = %target.item_id, column = %target.column_id, %asset_id, "attached to column");
                Stage::Done(self.finish(true, Some(&target), AttachMethod::Column, None))
            }
            MutationOutcome::Rejected(primary_error) => {
                tracing::warn!(
                    item = %target.item_id,
                    column = %target.column_id,
                    error = %primary_error,
                    "column upload rejected, falling back to update"
                );
                Stage::Fallback {
                    target,
                    primary_error,
                }
            }
        }
    }

    async fn fallback(&mut self, target: ColumnTarget, primary_error: String) -> Stage {
        counter!(FALLBACK_ATTEMPTS).increment(1);

        let update_id = match self.open_update(target.item_id).await {
            Ok(update_id) => update_id,
            Err((reason, raw)) => {
                self.diagnostics.fallback_response = Some(raw);
                return Stage::Done(self.fail_both(&target, &primary_error, &reason));
            }
        };

        let mutation = graphql::add_file_to_update_mutation(update_id);
        let (outcome, raw) = self.send_file(&mutation, graphql::ADD_FILE_TO_UPDATE).await;
        self.diagnostics.fallback_response = Some(raw);

        match outcome {
            MutationOutcome::Created(asset_id) => {
                tracing::debug!(item = %target.item_id, update = %update_id, %asset_id, "attached to update");
                Stage::Done(self.finish(true, Some(&target), AttachMethod::Update, None))
            }
            MutationOutcome::Rejected(reason) => {
                Stage::Done(self.fail_both(&target, &primary_error, &reason))
            }
        }
    }

    /// Creates an update on `item` to hang the file on.
    async fn open_update(&self, item: ItemId) -> std::result::Result<ItemId, (String, JsonValue)> {
        let mutation = graphql::create_update_mutation(item);
        let variables = json!({ "body": format!("Attached file: {}", self.job.file_name) });

        let response = match self.service.query(self.token, &mutation, variables).await {
            Ok(response) => response,
            Err(e) => return Err((e.to_string(), json!({ "error": e.to_string() }))),
        };

        match graphql::mutation_outcome(&response, graphql::CREATE_UPDATE) {
            MutationOutcome::Created(id) => match ItemId::parse("update", &id) {
                Ok(update_id) => Ok(update_id),
                Err(e) => Err((e.to_string(), response)),
            },
            MutationOutcome::Rejected(reason) => Err((reason, response)),
        }
    }

    /// Uploads the payload with `mutation`. Transport failures come back as a
    /// rejection plus an `{"error": ...}` diagnostic.
    async fn send_file(&self, mutation: &str, field: &str) -> (MutationOutcome, JsonValue) {
        let body = self
            .upload
            .layout
            .encode(mutation, &self.job.file_name, self.payload.clone());

        match self.service.upload(self.token, body).await {
            Ok(response) => (graphql::mutation_outcome(&response, field), response),
            Err(e) => (
                MutationOutcome::Rejected(e.to_string()),
                json!({ "error": e.to_string() }),
            ),
        }
    }

    fn fail_both(&mut self, target: &ColumnTarget, primary: &str, fallback: &str) -> AttachmentResult {
        tracing::warn!(item = %target.item_id, %primary, %fallback, "attachment failed");
        self.finish(
            false,
            Some(target),
            AttachMethod::None,
            Some(format!("attachment failed: {primary}; fallback failed: {fallback}")),
        )
    }

    fn finish(
        &mut self,
        success: bool,
        target: Option<&ColumnTarget>,
        method: AttachMethod,
        error: Option<String>,
    ) -> AttachmentResult {
        AttachmentResult {
            success,
            target_item_id: target.map(|t| t.item_id.to_string()),
            target_column_id: target.map(|t| t.column_id.to_string()),
            method,
            diagnostics: std::mem::take(&mut self.diagnostics),
            error,
        }
    }
}
