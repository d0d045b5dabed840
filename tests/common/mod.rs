//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pdf_extract_orchestrator::lifecycle::{ControlError, ResourceController, ResourceId};
use pdf_extract_orchestrator::pdf::PageUnit;
use pdf_extract_orchestrator::workers::{TaskExecutor, WorkerDescriptor, WorkerError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Build a PDF with `pages` blank pages and a correct xref table.
pub fn build_pdf(pages: usize) -> Vec<u8> {
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..pages)
                .map(|i| format!("{} 0 R", i + 3))
                .collect::<Vec<_>>()
                .join(" "),
            pages
        ),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

pub fn write_pdf(dir: &Path, name: &str, pages: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, build_pdf(pages)).unwrap();
    path
}

/// Write an HTTP worker descriptor bound to processor `processor`.
pub fn write_worker(dir: &Path, name: &str, pages: &str, processor: &str, timeout_secs: u64) {
    let descriptor = format!(
        r#"{{
            "name": "{name}",
            "pages": "{pages}",
            "timeout_secs": {timeout_secs},
            "kind": {{"type": "http", "url": "http://127.0.0.1:9/{name}"}},
            "resource": {{"PROJECT_ID": "acme", "LOCATION": "us", "PROCESSOR_ID": "{processor}"}}
        }}"#
    );
    std::fs::write(dir.join(format!("{}_config.json", name)), descriptor).unwrap();
}

/// Behavior of a worker under [`ScriptedExecutor`]
#[derive(Debug, Clone)]
pub enum Script {
    Respond(&'static str),
    Fail(&'static str),
    Hang,
    Panic,
}

/// Executor returning scripted results and recording every call
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: &[(&str, Script)]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(name, script)| (name.to_string(), script.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `(worker, unit)` pairs in sorted order.
    pub fn sorted_calls(&self) -> Vec<(String, String)> {
        let mut calls = self.calls.lock().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, worker: &WorkerDescriptor, page: &PageUnit) -> Result<Vec<u8>, WorkerError> {
        self.calls
            .lock()
            .push((worker.name.clone(), page.identity()));
        assert!(page.path.exists(), "page artifact missing: {}", page.path.display());

        match self.scripts.get(&worker.name) {
            Some(Script::Respond(body)) => Ok(body.as_bytes().to_vec()),
            Some(Script::Fail(stderr)) => Err(WorkerError::Exit {
                status: "exit status: 1".to_string(),
                stderr: stderr.to_string(),
            }),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(b"{}".to_vec())
            }
            Some(Script::Panic) => panic!("{} crashed", worker.name),
            None => Err(WorkerError::Other(format!("no script for {}", worker.name))),
        }
    }
}

/// Controller recording lifecycle calls, optionally failing activations
#[derive(Default)]
pub struct RecordingController {
    pub calls: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingController {
    pub fn failing_on(resource: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(resource.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResourceController for RecordingController {
    async fn activate(&self, resource: &ResourceId) -> Result<(), ControlError> {
        self.calls.lock().push(format!("activate {}", resource));
        if self.fail_on.as_deref() == Some(resource.to_string().as_str()) {
            return Err(ControlError::Failed {
                reason: "PERMISSION_DENIED: caller lacks documentai.processors.enable".to_string(),
            });
        }
        Ok(())
    }

    async fn deactivate(&self, resource: &ResourceId) -> Result<(), ControlError> {
        self.calls.lock().push(format!("deactivate {}", resource));
        Ok(())
    }
}

/// Artifact file names in `dir`, sorted.
pub fn artifacts(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
