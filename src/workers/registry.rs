//! Worker registry: the immutable set of workers for a run

use crate::error::{Error, Result};
use crate::pdf::PageRole;
use crate::workers::{load_descriptor, ProcessorBinding, WorkerDescriptor};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Workers available to a run, keyed by unique name
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<Arc<WorkerDescriptor>>,
    config_errors: usize,
}

impl WorkerRegistry {
    /// Build a registry from already loaded descriptors. Later duplicates of
    /// a name are dropped.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = WorkerDescriptor>) -> Self {
        let mut registry = Self::default();
        for descriptor in descriptors {
            registry.insert(descriptor);
        }
        registry
    }

    fn insert(&mut self, descriptor: WorkerDescriptor) -> bool {
        if self.get(&descriptor.name).is_some() {
            tracing::warn!(
                kind = "ConfigLoadError",
                worker = %descriptor.name,
                path = %descriptor.source.display(),
                "Duplicate worker name, descriptor ignored"
            );
            self.config_errors += 1;
            return false;
        }
        self.workers.push(Arc::new(descriptor));
        true
    }

    pub fn workers(&self) -> &[Arc<WorkerDescriptor>] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of descriptor files that were skipped.
    pub fn config_errors(&self) -> usize {
        self.config_errors
    }

    pub fn get(&self, name: &str) -> Option<&Arc<WorkerDescriptor>> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// Remote processor the named worker depends on.
    pub fn resource_for(&self, name: &str) -> Option<&ProcessorBinding> {
        self.get(name).and_then(|w| w.resource.as_ref())
    }

    /// Workers declared for pages of `role`.
    pub fn applicable(&self, role: PageRole) -> Vec<Arc<WorkerDescriptor>> {
        self.workers
            .iter()
            .filter(|w| w.applies_to(role))
            .cloned()
            .collect()
    }

    /// Distinct processors referenced by any worker.
    pub fn processor_bindings(&self) -> BTreeSet<ProcessorBinding> {
        self.workers
            .iter()
            .filter_map(|w| w.resource.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }
}

/// Load every descriptor matching `pattern` in `workers_dir`.
///
/// Unreadable or invalid descriptors are logged as `ConfigLoadError` and
/// skipped. Files are visited in sorted order so duplicate resolution is
/// stable.
pub fn load_workers(
    workers_dir: &Path,
    pattern: &str,
    default_timeout: Duration,
) -> Result<WorkerRegistry> {
    if !workers_dir.is_dir() {
        return Err(Error::WorkersNotFound {
            path: workers_dir.display().to_string(),
        });
    }

    let pattern = glob::Pattern::new(pattern).map_err(|e| Error::InvalidConfig {
        reason: format!("invalid worker pattern: {}", e),
    })?;

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(workers_dir).map_err(Error::Io)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if pattern.matches(&name) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut registry = WorkerRegistry::default();
    for path in paths {
        match load_descriptor(&path, default_timeout) {
            Ok(descriptor) => {
                let name = descriptor.name.clone();
                let kind = descriptor.kind.label();
                let pages = descriptor.pages;
                if registry.insert(descriptor) {
                    tracing::info!(worker = %name, kind, pages = ?pages, "Loaded worker");
                }
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "{}", e);
                registry.config_errors += 1;
            }
        }
    }

    Ok(registry)
}
