//! Remote resource lifecycle
//!
//! Resources the workers depend on are activated once before dispatch and
//! deactivated once after it, whatever happened in between.

mod controller;
mod ledger;
mod manager;
mod resource;

pub use controller::{ControlError, HttpResourceController, NoopResourceController, ResourceController};
pub use ledger::{ActivationLedger, ActivationState};
pub use manager::{ActivationReport, DeactivationReport, LifecycleManager};
pub use resource::ResourceId;
