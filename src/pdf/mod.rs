//! PDF processing layer
//!
//! Page counting and splitting via qpdf, and segmentation of documents into
//! primary and secondary page units.

mod qpdf;
mod segmenter;

#[cfg(test)]
pub(crate) mod fixtures;

pub use qpdf::QpdfWrapper;
pub use segmenter::{unit_identity, PageRole, PageSegmenter, PageUnit, Segmentation};
