use crate::multipart::MultipartLayout;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Relay path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("Target api_version cannot be empty")]
    EmptyApiVersion,

    #[error("Target timeout_secs cannot be 0")]
    InvalidTimeout,

    #[error("Default file name cannot be empty")]
    EmptyDefaultFileName,
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming relay requests
    pub listener: Listener,
    /// Path the relay accepts POSTs on
    #[serde(default = "default_path")]
    pub path: String,
    /// Where and how to reach the target service
    pub target: TargetConfig,
    /// Upload behaviour
    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_path() -> String {
    "/attach".to_string()
}

impl Config {
    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }

        self.target.validate()?;

        if self.upload.default_file_name.trim().is_empty() {
            return Err(ValidationError::EmptyDefaultFileName);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Target service endpoints and credentials
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// GraphQL JSON endpoint, used for schema queries and plain mutations
    pub api_url: Url,
    /// GraphQL file endpoint, used for multipart uploads
    pub file_url: Url,
    /// Value sent in the `API-Version` header
    pub api_version: String,
    /// Timeout applied to every call against the target service
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Process-wide credential used when a request carries none.
    ///
    /// Never read from the config file; injected by the binary from its
    /// environment.
    #[serde(skip)]
    pub service_token: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl TargetConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_version.trim().is_empty() {
            return Err(ValidationError::EmptyApiVersion);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Multipart convention used for file uploads
    #[serde(default)]
    pub layout: MultipartLayout,
    /// Used when the request's file name sanitises to nothing
    #[serde(default = "default_file_name")]
    pub default_file_name: String,
    /// Whether to stamp a resolved date column after the upload
    #[serde(default = "default_stamp_date")]
    pub stamp_date: bool,
}

fn default_file_name() -> String {
    "estimate.pdf".to_string()
}

fn default_stamp_date() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            layout: MultipartLayout::default(),
            default_file_name: default_file_name(),
            stamp_date: default_stamp_date(),
        }
    }
}
