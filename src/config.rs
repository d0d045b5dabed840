//! Run configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default Document AI regional endpoint; `{location}` is substituted per resource.
pub const DEFAULT_DOCUMENTAI_ENDPOINT: &str = "https://{location}-documentai.googleapis.com/v1/";

/// Default Service Usage endpoint used to toggle the managed API.
pub const DEFAULT_SERVICE_USAGE_ENDPOINT: &str = "https://serviceusage.googleapis.com/v1/";

/// How merged results are grouped into artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputGranularity {
    /// One artifact per page unit
    #[default]
    Page,
    /// One artifact per document holding all of its page records
    Document,
}

/// Remote resource lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Toggle remote resources around the run (default: true)
    pub enabled: bool,
    /// Service API enabled before any processor, e.g. `documentai.googleapis.com`
    pub service_name: Option<String>,
    /// Bearer token for the remote APIs
    pub access_token: Option<String>,
    /// Document AI endpoint template
    pub documentai_endpoint: String,
    /// Service Usage endpoint
    pub service_usage_endpoint: String,
    /// Delay between long-running operation polls (default: 2s)
    pub poll_interval: Duration,
    /// Upper bound on waiting for a long-running operation (default: 300s)
    pub operation_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: Some("documentai.googleapis.com".to_string()),
            access_token: None,
            documentai_endpoint: DEFAULT_DOCUMENTAI_ENDPOINT.to_string(),
            service_usage_endpoint: DEFAULT_SERVICE_USAGE_ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(300),
        }
    }
}

/// Configuration for a single orchestration run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory scanned for input documents
    pub input_dir: PathBuf,
    /// Directory receiving merged artifacts
    pub output_dir: PathBuf,
    /// Directory holding worker descriptor files
    pub workers_dir: PathBuf,
    /// File name pattern selecting descriptor files (default: `*.json`)
    pub worker_pattern: String,
    /// Maximum number of dispatch tasks in flight across the run (default: 8)
    pub max_in_flight: usize,
    /// Timeout applied to workers that do not declare their own (default: 120s)
    pub default_worker_timeout: Duration,
    /// Artifact grouping (default: per page)
    pub granularity: OutputGranularity,
    /// Descend into subdirectories of the input location (default: false)
    pub recursive: bool,
    /// Parent directory for the run-scoped scratch directory (default: system temp)
    pub scratch_root: Option<PathBuf>,
    /// Maximum accepted HTTP worker response size (default: 32MB)
    pub max_response_bytes: u64,
    /// Remote resource lifecycle settings
    pub lifecycle: LifecycleConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input_data"),
            output_dir: PathBuf::from("output"),
            workers_dir: PathBuf::from("workers"),
            worker_pattern: "*.json".to_string(),
            max_in_flight: 8,
            default_worker_timeout: Duration::from_secs(120),
            granularity: OutputGranularity::Page,
            recursive: false,
            scratch_root: None,
            max_response_bytes: 32 * 1024 * 1024, // 32MB
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl RunConfig {
    /// Reject settings the run cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_in_flight must be at least 1".to_string(),
            });
        }
        if self.default_worker_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "default worker timeout must be non-zero".to_string(),
            });
        }
        if self.lifecycle.enabled && self.lifecycle.poll_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "operation poll interval must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
