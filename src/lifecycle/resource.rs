use crate::workers::ProcessorBinding;
use serde::Serialize;
use std::fmt;

/// A remote resource toggled around a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceId {
    /// Managed API of a project; enabled before any processor
    Service { project: String, service: String },
    /// A single processor
    Processor {
        project: String,
        location: String,
        processor: String,
    },
}

impl ResourceId {
    pub fn service(project: impl Into<String>, service: impl Into<String>) -> Self {
        ResourceId::Service {
            project: project.into(),
            service: service.into(),
        }
    }

    /// Activation order; lower tiers are activated first and deactivated last.
    pub fn tier(&self) -> u8 {
        match self {
            ResourceId::Service { .. } => 0,
            ResourceId::Processor { .. } => 1,
        }
    }
}

impl From<&ProcessorBinding> for ResourceId {
    fn from(binding: &ProcessorBinding) -> Self {
        ResourceId::Processor {
            project: binding.project_id.clone(),
            location: binding.location.clone(),
            processor: binding.processor_id.clone(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Service { project, service } => {
                write!(f, "projects/{}/services/{}", project, service)
            }
            ResourceId::Processor {
                project,
                location,
                processor,
            } => write!(
                f,
                "projects/{}/locations/{}/processors/{}",
                project, location, processor
            ),
        }
    }
}
