//! Worker descriptors loaded from JSON files

use crate::error::{Error, Result};
use crate::pdf::PageRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which pages a worker is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSelector {
    #[default]
    Primary,
    Secondary,
    All,
}

impl PageSelector {
    pub fn applies_to(self, role: PageRole) -> bool {
        match self {
            PageSelector::All => true,
            PageSelector::Primary => role == PageRole::Primary,
            PageSelector::Secondary => role == PageRole::Secondary,
        }
    }
}

/// Remote processor a worker depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessorBinding {
    #[serde(alias = "PROJECT_ID")]
    pub project_id: String,
    #[serde(alias = "LOCATION")]
    pub location: String,
    #[serde(alias = "PROCESSOR_ID")]
    pub processor_id: String,
}

impl ProcessorBinding {
    /// Full resource name, `projects/{p}/locations/{l}/processors/{id}`.
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/processors/{}",
            self.project_id, self.location, self.processor_id
        )
    }
}

/// Output shape produced by a Document AI worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentAiMode {
    /// Every recognized entity with its text and confidence
    #[default]
    Entities,
    /// The highest-confidence entity as the document category
    Classify,
    /// Table, column, row and cell layout of every table on the page
    Tables,
}

/// How a worker is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerKind {
    /// External program; the page path is appended as the last argument
    Process {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Relative paths resolve against the descriptor's directory
        #[serde(default)]
        current_dir: Option<PathBuf>,
    },
    /// HTTP endpoint receiving the page as base64 JSON
    Http { url: String },
    /// Document AI online processing of the worker's resource
    DocumentAi {
        #[serde(default)]
        mode: DocumentAiMode,
    },
}

impl WorkerKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerKind::Process { .. } => "process",
            WorkerKind::Http { .. } => "http",
            WorkerKind::DocumentAi { .. } => "document_ai",
        }
    }
}

/// On-disk descriptor layout
#[derive(Debug, Deserialize)]
struct DescriptorFile {
    name: Option<String>,
    #[serde(default)]
    pages: PageSelector,
    timeout_secs: Option<u64>,
    kind: WorkerKind,
    resource: Option<ProcessorBinding>,
}

/// A validated, immutable worker description
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerDescriptor {
    pub name: String,
    pub kind: WorkerKind,
    pub pages: PageSelector,
    pub timeout: Duration,
    pub resource: Option<ProcessorBinding>,
    /// Descriptor file this worker was loaded from
    pub source: PathBuf,
}

impl WorkerDescriptor {
    pub fn applies_to(&self, role: PageRole) -> bool {
        self.pages.applies_to(role)
    }
}

/// Load and validate one descriptor file.
pub fn load_descriptor(path: &Path, default_timeout: Duration) -> Result<WorkerDescriptor> {
    let config_error = |reason: String| Error::ConfigLoad {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
    let file: DescriptorFile =
        serde_json::from_str(&content).map_err(|e| config_error(e.to_string()))?;

    let name = match file.name {
        Some(name) => name.trim().to_string(),
        None => default_worker_name(path),
    };
    if name.is_empty() {
        return Err(config_error("worker name is empty".to_string()));
    }

    let timeout = match file.timeout_secs {
        Some(0) => return Err(config_error("timeout_secs must be positive".to_string())),
        Some(secs) => Duration::from_secs(secs),
        None => default_timeout,
    };

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let kind = match file.kind {
        WorkerKind::Process {
            program,
            args,
            env,
            current_dir,
        } => {
            if program.trim().is_empty() {
                return Err(config_error("process worker needs a program".to_string()));
            }
            let current_dir = match current_dir {
                Some(dir) if dir.is_relative() => Some(base_dir.join(dir)),
                Some(dir) => Some(dir),
                None => Some(base_dir.to_path_buf()),
            };
            WorkerKind::Process {
                program,
                args,
                env,
                current_dir,
            }
        }
        WorkerKind::Http { url } => {
            url::Url::parse(&url).map_err(|e| config_error(format!("invalid url: {}", e)))?;
            WorkerKind::Http { url }
        }
        WorkerKind::DocumentAi { mode } => {
            if file.resource.is_none() {
                return Err(config_error(
                    "document_ai worker needs a resource".to_string(),
                ));
            }
            WorkerKind::DocumentAi { mode }
        }
    };

    Ok(WorkerDescriptor {
        name,
        kind,
        pages: file.pages,
        timeout,
        resource: file.resource,
        source: path.to_path_buf(),
    })
}

/// `ml_cat_prediction_config.json` names the worker `ml_cat_prediction`.
fn default_worker_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_suffix("_config").unwrap_or(&stem).to_string()
}
