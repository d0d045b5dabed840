//! Extraction workers
//!
//! Descriptors are loaded once per run into a [`WorkerRegistry`]; the
//! [`TaskExecutor`] seam invokes them per page.

mod descriptor;
pub mod documentai;
mod executor;
mod registry;

pub use descriptor::{
    load_descriptor, DocumentAiMode, PageSelector, ProcessorBinding, WorkerDescriptor, WorkerKind,
};
pub use documentai::DocumentAiClient;
pub use executor::{TaskExecutor, WorkerError, WorkerRuntime};
pub use registry::{load_workers, WorkerRegistry};
