//! Per-run record of which remote resources were toggled

use crate::lifecycle::ResourceId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Lifecycle state of one resource within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Activating,
    Active,
    ActivationFailed,
    Deactivating,
    Deactivated,
}

/// Hands out at most one activation and one deactivation claim per resource.
///
/// This is the only state shared between concurrent lifecycle calls; it is
/// never touched by dispatch tasks.
#[derive(Debug, Default)]
pub struct ActivationLedger {
    states: Mutex<HashMap<ResourceId, ActivationState>>,
}

impl ActivationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the activation call for `resource`. Returns false if it was
    /// already claimed this run.
    pub fn begin_activation(&self, resource: &ResourceId) -> bool {
        let mut states = self.states.lock();
        if states.contains_key(resource) {
            return false;
        }
        states.insert(resource.clone(), ActivationState::Activating);
        true
    }

    pub fn mark_active(&self, resource: &ResourceId) {
        self.set(resource, ActivationState::Active);
    }

    pub fn mark_failed(&self, resource: &ResourceId) {
        self.set(resource, ActivationState::ActivationFailed);
    }

    /// Claim the deactivation call. Only resources whose activation was
    /// attempted and that have not been claimed for deactivation qualify.
    pub fn begin_deactivation(&self, resource: &ResourceId) -> bool {
        let mut states = self.states.lock();
        match states.get(resource) {
            Some(
                ActivationState::Activating
                | ActivationState::Active
                | ActivationState::ActivationFailed,
            ) => {
                states.insert(resource.clone(), ActivationState::Deactivating);
                true
            }
            _ => false,
        }
    }

    pub fn mark_deactivated(&self, resource: &ResourceId) {
        self.set(resource, ActivationState::Deactivated);
    }

    pub fn state(&self, resource: &ResourceId) -> Option<ActivationState> {
        self.states.lock().get(resource).copied()
    }

    /// Resources whose activation was attempted, in tier then name order.
    pub fn attempted(&self) -> Vec<ResourceId> {
        let mut resources: Vec<ResourceId> = self.states.lock().keys().cloned().collect();
        resources.sort();
        resources
    }

    fn set(&self, resource: &ResourceId, state: ActivationState) {
        self.states.lock().insert(resource.clone(), state);
    }
}
