//! Activation bracket around a run

use crate::error::{Error, Result};
use crate::lifecycle::{ActivationLedger, ControlError, ResourceController, ResourceId};
use crate::workers::WorkerRegistry;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of a successful `activate_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub activated: usize,
    pub already_active: usize,
}

/// Result of `deactivate_all`; never an error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeactivationReport {
    pub deactivated: usize,
    pub already_inactive: usize,
    pub failed: usize,
}

/// Brackets a run with exactly one activation and one deactivation per resource
pub struct LifecycleManager {
    controller: Arc<dyn ResourceController>,
    ledger: ActivationLedger,
}

impl LifecycleManager {
    pub fn new(controller: Arc<dyn ResourceController>) -> Self {
        Self {
            controller,
            ledger: ActivationLedger::new(),
        }
    }

    /// Distinct resources the registry's workers depend on. The service API
    /// of each project is included when `service_name` is set.
    pub fn resources_for(
        registry: &WorkerRegistry,
        service_name: Option<&str>,
    ) -> BTreeSet<ResourceId> {
        let mut resources = BTreeSet::new();
        for binding in registry.processor_bindings() {
            if let Some(service) = service_name {
                resources.insert(ResourceId::service(binding.project_id.clone(), service));
            }
            resources.insert(ResourceId::from(&binding));
        }
        resources
    }

    /// Activate every resource, tier by tier.
    ///
    /// Resources of one tier are activated concurrently. The first tier with a
    /// failure other than `AlreadyActive` ends activation with
    /// `Error::ActivationFatal` once all of its calls have resolved.
    pub async fn activate_all(&self, resources: &BTreeSet<ResourceId>) -> Result<ActivationReport> {
        let mut report = ActivationReport::default();

        for (tier, tier_resources) in by_tier(resources.iter()) {
            let claimed: Vec<&ResourceId> = tier_resources
                .into_iter()
                .filter(|r| self.ledger.begin_activation(r))
                .collect();
            if claimed.is_empty() {
                continue;
            }

            tracing::info!(tier, count = claimed.len(), "Activating resources");
            let results = join_all(claimed.iter().map(|r| self.controller.activate(r))).await;

            let mut fatal: Option<Error> = None;
            for (resource, result) in claimed.into_iter().zip(results) {
                match result {
                    Ok(()) => {
                        tracing::info!(%resource, "Resource activated");
                        self.ledger.mark_active(resource);
                        report.activated += 1;
                    }
                    Err(ControlError::AlreadyActive) => {
                        tracing::info!(%resource, kind = "AlreadyActive", "Resource already active");
                        self.ledger.mark_active(resource);
                        report.already_active += 1;
                    }
                    Err(e) => {
                        tracing::error!(%resource, kind = "ActivationFatalError", error = %e, "Activation failed");
                        self.ledger.mark_failed(resource);
                        if fatal.is_none() {
                            fatal = Some(Error::ActivationFatal {
                                resource: resource.to_string(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e);
            }
        }

        Ok(report)
    }

    /// Deactivate every resource whose activation was attempted this run, in
    /// reverse tier order. Failures are logged and counted.
    pub async fn deactivate_all(&self) -> DeactivationReport {
        let mut report = DeactivationReport::default();
        let attempted = self.ledger.attempted();

        for (tier, tier_resources) in by_tier(attempted.iter()).into_iter().rev() {
            let claimed: Vec<&ResourceId> = tier_resources
                .into_iter()
                .filter(|r| self.ledger.begin_deactivation(r))
                .collect();
            if claimed.is_empty() {
                continue;
            }

            tracing::info!(tier, count = claimed.len(), "Deactivating resources");
            let results = join_all(claimed.iter().map(|r| self.controller.deactivate(r))).await;

            for (resource, result) in claimed.into_iter().zip(results) {
                match result {
                    Ok(()) => {
                        tracing::info!(%resource, "Resource deactivated");
                        report.deactivated += 1;
                    }
                    Err(ControlError::AlreadyInactive) => {
                        tracing::info!(%resource, kind = "AlreadyInactive", "Resource already inactive");
                        report.already_inactive += 1;
                    }
                    Err(e) => {
                        tracing::warn!(%resource, error = %e, "Deactivation failed");
                        report.failed += 1;
                    }
                }
                self.ledger.mark_deactivated(resource);
            }
        }

        report
    }
}

fn by_tier<'a>(resources: impl Iterator<Item = &'a ResourceId>) -> BTreeMap<u8, Vec<&'a ResourceId>> {
    let mut tiers: BTreeMap<u8, Vec<&ResourceId>> = BTreeMap::new();
    for resource in resources {
        tiers.entry(resource.tier()).or_default().push(resource);
    }
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{PageSelector, ProcessorBinding, WorkerDescriptor, WorkerKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_activation: Option<String>,
        already: bool,
    }

    #[async_trait]
    impl ResourceController for Recorder {
        async fn activate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
            self.calls.lock().push(format!("activate {}", resource));
            if self.fail_activation.as_deref() == Some(&resource.to_string()) {
                return Err(ControlError::Failed {
                    reason: "permission denied".to_string(),
                });
            }
            if self.already {
                return Err(ControlError::AlreadyActive);
            }
            Ok(())
        }

        async fn deactivate(&self, resource: &ResourceId) -> std::result::Result<(), ControlError> {
            self.calls.lock().push(format!("deactivate {}", resource));
            if self.already {
                return Err(ControlError::AlreadyInactive);
            }
            Ok(())
        }
    }

    fn worker(name: &str, processor: &str) -> WorkerDescriptor {
        WorkerDescriptor {
            name: name.to_string(),
            kind: WorkerKind::Http {
                url: "http://localhost/".to_string(),
            },
            pages: PageSelector::Primary,
            timeout: Duration::from_secs(1),
            resource: Some(ProcessorBinding {
                project_id: "acme".to_string(),
                location: "us".to_string(),
                processor_id: processor.to_string(),
            }),
            source: PathBuf::from(format!("{}.json", name)),
        }
    }

    const SERVICE: &str = "projects/acme/services/documentai.googleapis.com";
    const P1: &str = "projects/acme/locations/us/processors/p1";

    #[tokio::test]
    async fn test_shared_resource_toggled_once() {
        let registry = WorkerRegistry::from_descriptors(vec![
            worker("a", "p1"),
            worker("b", "p1"),
            worker("c", "p1"),
        ]);
        let resources =
            LifecycleManager::resources_for(&registry, Some("documentai.googleapis.com"));
        assert_eq!(resources.len(), 2);

        let recorder = Arc::new(Recorder::default());
        let manager = LifecycleManager::new(recorder.clone());

        let report = manager.activate_all(&resources).await.unwrap();
        assert_eq!(report.activated, 2);
        // A second bracket call within the run issues nothing new
        manager.activate_all(&resources).await.unwrap();

        let report = manager.deactivate_all().await;
        assert_eq!(report.deactivated, 2);
        assert_eq!(manager.deactivate_all().await, DeactivationReport::default());

        assert_eq!(
            *recorder.calls.lock(),
            vec![
                format!("activate {}", SERVICE),
                format!("activate {}", P1),
                format!("deactivate {}", P1),
                format!("deactivate {}", SERVICE),
            ]
        );
    }

    #[tokio::test]
    async fn test_already_active_is_not_fatal() {
        let registry = WorkerRegistry::from_descriptors(vec![worker("a", "p1")]);
        let resources = LifecycleManager::resources_for(&registry, None);
        let recorder = Arc::new(Recorder {
            already: true,
            ..Recorder::default()
        });
        let manager = LifecycleManager::new(recorder);

        let report = manager.activate_all(&resources).await.unwrap();
        assert_eq!(report.already_active, 1);
        let report = manager.deactivate_all().await;
        assert_eq!(report.already_inactive, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_fatal_activation_stops_later_tiers_and_still_deactivates() {
        let registry = WorkerRegistry::from_descriptors(vec![worker("a", "p1")]);
        let resources =
            LifecycleManager::resources_for(&registry, Some("documentai.googleapis.com"));
        let recorder = Arc::new(Recorder {
            fail_activation: Some(SERVICE.to_string()),
            ..Recorder::default()
        });
        let manager = LifecycleManager::new(recorder.clone());

        let err = manager.activate_all(&resources).await.unwrap_err();
        assert!(matches!(err, Error::ActivationFatal { ref resource, .. } if resource == SERVICE));

        manager.deactivate_all().await;
        assert_eq!(
            *recorder.calls.lock(),
            vec![
                format!("activate {}", SERVICE),
                format!("deactivate {}", SERVICE),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_resources_no_calls() {
        let recorder = Arc::new(Recorder::default());
        let manager = LifecycleManager::new(recorder.clone());
        manager.activate_all(&BTreeSet::new()).await.unwrap();
        manager.deactivate_all().await;
        assert!(recorder.calls.lock().is_empty());
    }
}
