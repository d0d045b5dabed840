//! Output artifacts

mod writer;

pub use writer::{artifact_file_name, DocumentRecord, OutputWriter, ARTIFACT_SUFFIX};
