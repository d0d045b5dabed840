//! Remote enable/disable calls

use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::lifecycle::ResourceId;
use crate::workers::documentai::regional_endpoint;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Outcome of a lifecycle call that did not succeed outright
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("already active")]
    AlreadyActive,

    #[error("already inactive")]
    AlreadyInactive,

    #[error("{reason}")]
    Failed { reason: String },
}

/// Toggles remote resources on and off
#[async_trait]
pub trait ResourceController: Send + Sync {
    async fn activate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError>;

    async fn deactivate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError>;
}

/// Controller used when lifecycle management is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResourceController;

#[async_trait]
impl ResourceController for NoopResourceController {
    async fn activate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
        tracing::debug!(%resource, "Lifecycle disabled, skipping activation");
        Ok(())
    }

    async fn deactivate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
        tracing::debug!(%resource, "Lifecycle disabled, skipping deactivation");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    Enable,
    Disable,
}

impl Toggle {
    fn verb(self) -> &'static str {
        match self {
            Toggle::Enable => "enable",
            Toggle::Disable => "disable",
        }
    }

    fn already(self) -> ControlError {
        match self {
            Toggle::Enable => ControlError::AlreadyActive,
            Toggle::Disable => ControlError::AlreadyInactive,
        }
    }
}

/// Long-running operation returned by enable/disable
#[derive(Debug, Default, Deserialize)]
struct Operation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Status,
}

/// gRPC code for FAILED_PRECONDITION, as reported inside operations
const FAILED_PRECONDITION_CODE: i64 = 9;

/// Controller backed by the Service Usage and Document AI REST APIs
#[derive(Debug, Clone)]
pub struct HttpResourceController {
    http: reqwest::Client,
    documentai_endpoint: String,
    service_usage_endpoint: Url,
    access_token: Option<String>,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl HttpResourceController {
    pub fn new(config: &LifecycleConfig) -> Result<Self> {
        let service_usage_endpoint = parse_base(&config.service_usage_endpoint)?;
        // Fail on a malformed template now rather than on the first call
        parse_base(&config.documentai_endpoint.replace("{location}", "us"))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            documentai_endpoint: config.documentai_endpoint.clone(),
            service_usage_endpoint,
            access_token: config.access_token.clone(),
            poll_interval: config.poll_interval,
            operation_timeout: config.operation_timeout,
        })
    }

    /// Base URL that the resource name and its operations resolve against.
    fn base_for(&self, resource: &ResourceId) -> std::result::Result<Url, ControlError> {
        match resource {
            ResourceId::Service { .. } => Ok(self.service_usage_endpoint.clone()),
            ResourceId::Processor { location, .. } => {
                regional_endpoint(&self.documentai_endpoint, location).map_err(|e| {
                    ControlError::Failed {
                        reason: format!("invalid endpoint: {}", e),
                    }
                })
            }
        }
    }

    async fn toggle(
        &self,
        resource: &ResourceId,
        toggle: Toggle,
    ) -> std::result::Result<(), ControlError> {
        let base = self.base_for(resource)?;
        let url = toggle_url(&base, resource, toggle)?;

        let mut request = self.http.post(url).json(&serde_json::json!({}));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(failed)?;
        let status = response.status();
        let body = response.text().await.map_err(failed)?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body, toggle));
        }

        let operation: Operation = if body.trim().is_empty() {
            Operation {
                done: true,
                ..Operation::default()
            }
        } else {
            serde_json::from_str(&body).map_err(failed)?
        };
        self.wait(&base, operation, toggle).await
    }

    async fn wait(
        &self,
        base: &Url,
        mut operation: Operation,
        toggle: Toggle,
    ) -> std::result::Result<(), ControlError> {
        let started = Instant::now();
        loop {
            if operation.done {
                return match operation.error {
                    None => Ok(()),
                    Some(status) => Err(classify_status(&status, toggle)),
                };
            }
            if operation.name.is_empty() {
                return Err(ControlError::Failed {
                    reason: "pending operation has no name".to_string(),
                });
            }
            if started.elapsed() >= self.operation_timeout {
                return Err(ControlError::Failed {
                    reason: format!(
                        "operation {} not done after {:?}",
                        operation.name, self.operation_timeout
                    ),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            tracing::debug!(operation = %operation.name, "Polling operation");

            let url = base.join(&operation.name).map_err(failed)?;
            let mut request = self.http.get(url);
            if let Some(token) = &self.access_token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(failed)?;
            let status = response.status();
            let body = response.text().await.map_err(failed)?;
            if !status.is_success() {
                return Err(classify_error(status.as_u16(), &body, toggle));
            }
            operation = serde_json::from_str(&body).map_err(failed)?;
        }
    }
}

#[async_trait]
impl ResourceController for HttpResourceController {
    async fn activate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
        self.toggle(resource, Toggle::Enable).await
    }

    async fn deactivate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
        self.toggle(resource, Toggle::Disable).await
    }
}

fn parse_base(endpoint: &str) -> Result<Url> {
    let mut endpoint = endpoint.to_string();
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    Url::parse(&endpoint).map_err(|e| crate::error::Error::InvalidConfig {
        reason: format!("invalid endpoint {}: {}", endpoint, e),
    })
}

fn toggle_url(
    base: &Url,
    resource: &ResourceId,
    toggle: Toggle,
) -> std::result::Result<Url, ControlError> {
    base.join(&format!("{}:{}", resource, toggle.verb()))
        .map_err(failed)
}

fn classify_error(status: u16, body: &str, toggle: Toggle) -> ControlError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => classify_status(&parsed.error, toggle),
        Err(_) => ControlError::Failed {
            reason: format!("HTTP {}: {}", status, body.chars().take(256).collect::<String>()),
        },
    }
}

fn classify_status(status: &Status, toggle: Toggle) -> ControlError {
    if status.status == "FAILED_PRECONDITION" || status.code == FAILED_PRECONDITION_CODE {
        toggle.already()
    } else {
        ControlError::Failed {
            reason: if status.status.is_empty() {
                status.message.clone()
            } else {
                format!("{}: {}", status.status, status.message)
            },
        }
    }
}

fn failed(e: impl std::fmt::Display) -> ControlError {
    ControlError::Failed {
        reason: e.to_string(),
    }
}
