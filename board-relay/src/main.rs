mod config;

use attachment_relay::errors::RelayError;
use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "board_relay";

#[derive(Parser)]
#[command(name = "board-relay", about = "Relays file attachments to board items")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start the relay
    Run(RunArgs),
    /// Load and validate a config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Credential used when a request brings none
    #[arg(long, env = "RELAY_SERVICE_TOKEN", hide_env_values = true)]
    service_token: Option<String>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("relay failed: {0}")]
    Relay(#[from] RelayError),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Validate(args) => Config::from_file(&args.config)
            .map(|_| println!("{}: ok", args.config.display()))
            .map_err(CliError::from),
        CliCommand::Run(args) => run(args),
    };

    if let Err(e) = result {
        eprintln!("board-relay: {e}");
        process::exit(1);
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let mut config = Config::from_file(&args.config.config)?;
    config.relay.target.service_token = args.service_token.filter(|t| !t.trim().is_empty());

    // Must outlive the runtime so pending events get flushed on exit.
    let _sentry_guard = init_logging(config.common.logging.as_ref());

    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    tracing::info!(
        path = %config.relay.path,
        layout = config.relay.upload.layout.as_str(),
        "starting board-relay"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(attachment_relay::run(config.relay))?;

    Ok(())
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    shared::metrics_defs::describe_all(attachment_relay::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
