//! PDF Extraction Orchestrator Library
//!
//! Splits PDF documents into pages and routes each page through a set of
//! independent extraction workers:
//! - `source`: discovery of input documents
//! - `pdf`: page counting and splitting via qpdf
//! - `workers`: worker descriptors and their execution
//! - `lifecycle`: enabling and disabling the remote processors workers use
//! - `dispatch`: concurrent per-page fan-out and result merging
//! - `output`: merged artifacts on disk
//!
//! [`Pipeline`] ties these together into a single run.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod pdf;
pub mod run;
pub mod source;
pub mod workers;

pub use config::{LifecycleConfig, OutputGranularity, RunConfig};
pub use error::{Error, Result};
pub use run::{Pipeline, RunSummary};
