//! Dispatch of page units to workers and merging of their outcomes

mod merge;
mod orchestrator;

pub use merge::{
    merge, parse_payload, FailureKind, MergedResult, WorkerFailure, WorkerOutcome, WorkerOutput,
};
pub use orchestrator::Dispatcher;
