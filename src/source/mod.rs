//! Input document discovery

pub mod discovery;
pub mod document;

pub use discovery::{check_pdf_header, discover, Discovery, RejectReason, RejectedEntry};
pub use document::{Document, DocumentState};
