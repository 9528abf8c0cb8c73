pub mod client;
pub mod config;
pub mod date_stamp;
pub mod errors;
pub mod graphql;
pub mod metrics_defs;
pub mod multipart;
pub mod orchestrator;
pub mod protocol;
pub mod schema;
pub mod service;

#[cfg(test)]
mod testutils;

use client::HttpTargetService;
use errors::RelayError;
use orchestrator::Orchestrator;
use service::RelayService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<(), RelayError> {
    let target = Arc::new(HttpTargetService::new(&config.target)?);
    let orchestrator = Orchestrator::new(
        target,
        config.upload.clone(),
        config.target.service_token.clone(),
    );
    if config.target.service_token.is_none() {
        tracing::warn!("no service token configured, requests must bring their own");
    }

    let relay_service = RelayService::new(Arc::new(orchestrator), &config.path);
    run_http_service(&config.listener.host, config.listener.port, relay_service).await
}
