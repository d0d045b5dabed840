//! Worker invocation
//!
//! A [`TaskExecutor`] runs one worker against one page and returns the raw
//! bytes it produced. Parsing, timeouts and failure isolation belong to the
//! dispatcher.

use crate::config::RunConfig;
use crate::error::Result;
use crate::pdf::PageUnit;
use crate::workers::documentai::{shape_payload, DocumentAiClient};
use crate::workers::{WorkerDescriptor, WorkerKind};
use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;

/// Failure of a single worker invocation
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response exceeds {max} bytes")]
    TooLarge { max: u64 },

    #[error("worker kind {kind} cannot run here")]
    Unsupported { kind: &'static str },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Runs one worker against one page
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Invoke `worker` on `page` and return its raw output.
    async fn execute(
        &self,
        worker: &WorkerDescriptor,
        page: &PageUnit,
    ) -> std::result::Result<Vec<u8>, WorkerError>;
}

/// Executor for the built-in worker kinds
#[derive(Debug, Clone)]
pub struct WorkerRuntime {
    http: reqwest::Client,
    documentai: DocumentAiClient,
    max_response_bytes: u64,
}

impl WorkerRuntime {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("pdf-extract-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let documentai = DocumentAiClient::new(
            http.clone(),
            config.lifecycle.documentai_endpoint.clone(),
            config.lifecycle.access_token.clone(),
        );
        Ok(Self {
            http,
            documentai,
            max_response_bytes: config.max_response_bytes,
        })
    }

    async fn run_process(
        &self,
        worker: &WorkerDescriptor,
        page: &PageUnit,
        program: &str,
        args: &[String],
        env: &std::collections::BTreeMap<String, String>,
        current_dir: Option<&Path>,
    ) -> std::result::Result<Vec<u8>, WorkerError> {
        let page_path = absolute(&page.path)?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .arg(&page_path)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the child running
            .kill_on_drop(true);
        if let Some(dir) = current_dir {
            command.current_dir(dir);
        }

        tracing::debug!(worker = %worker.name, unit = %page.identity(), program, "Spawning worker");

        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(WorkerError::Other("worker output pipes unavailable".to_string()));
        };

        // stderr is drained on its own task so the child never blocks on a full pipe
        let stderr_task = tokio::spawn(drain_stderr(stderr));

        let mut data = Vec::new();
        stdout
            .take(self.max_response_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .await?;
        if data.len() as u64 > self.max_response_bytes {
            // Dropping the child kills it
            stderr_task.abort();
            return Err(WorkerError::TooLarge {
                max: self.max_response_bytes,
            });
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(WorkerError::Exit {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(data)
    }

    async fn run_http(
        &self,
        page: &PageUnit,
        url: &str,
    ) -> std::result::Result<Vec<u8>, WorkerError> {
        let content = tokio::fs::read(&page.path).await?;
        let body = json!({
            "file_name": file_name(&page.path),
            "unit_identity": page.identity(),
            "page_index": page.index,
            "mime_type": "application/pdf",
            "content": base64::engine::general_purpose::STANDARD.encode(&content),
        });

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_response_bytes {
                return Err(WorkerError::TooLarge {
                    max: self.max_response_bytes,
                });
            }
        }

        // Stream with an incremental cap so a runaway worker cannot exhaust memory
        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
            if data.len() as u64 > self.max_response_bytes {
                return Err(WorkerError::TooLarge {
                    max: self.max_response_bytes,
                });
            }
        }
        Ok(data)
    }

    async fn run_document_ai(
        &self,
        worker: &WorkerDescriptor,
        page: &PageUnit,
        mode: crate::workers::DocumentAiMode,
    ) -> std::result::Result<Vec<u8>, WorkerError> {
        let binding = worker
            .resource
            .as_ref()
            .ok_or(WorkerError::Unsupported {
                kind: "document_ai without resource",
            })?;
        let content = tokio::fs::read(&page.path).await?;
        let document = self.documentai.process(binding, &content).await?;
        let payload = shape_payload(mode, &worker.name, &file_name(&page.path), &document);
        serde_json::to_vec(&payload).map_err(|e| WorkerError::Other(e.to_string()))
    }
}

#[async_trait]
impl TaskExecutor for WorkerRuntime {
    async fn execute(
        &self,
        worker: &WorkerDescriptor,
        page: &PageUnit,
    ) -> std::result::Result<Vec<u8>, WorkerError> {
        match &worker.kind {
            WorkerKind::Process {
                program,
                args,
                env,
                current_dir,
            } => {
                self.run_process(worker, page, program, args, env, current_dir.as_deref())
                    .await
            }
            WorkerKind::Http { url } => self.run_http(page, url).await,
            WorkerKind::DocumentAi { mode } => self.run_document_ai(worker, page, *mode).await,
        }
    }
}

/// Bytes of worker stderr kept for error messages
const STDERR_KEPT: u64 = 16 * 1024;

async fn drain_stderr(mut stderr: ChildStderr) -> Vec<u8> {
    let mut kept = Vec::new();
    if (&mut stderr).take(STDERR_KEPT).read_to_end(&mut kept).await.is_ok() {
        let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
    }
    kept
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Workers run in their own directory, so relative page paths must be resolved first.
fn absolute(path: &Path) -> std::io::Result<std::path::PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
