//! qpdf FFI wrapper for page counting and splitting
//!
//! All functions here are blocking; call them from `spawn_blocking`.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    Error::QpdfError {
        reason: e.to_string(),
    }
}

impl QpdfWrapper {
    /// Get the page count of a PDF
    pub fn get_page_count(input_data: &[u8]) -> Result<u32> {
        let qpdf = QPdf::read_from_memory(input_data).map_err(map_qpdf_error)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }

    /// Split a PDF into one standalone single-page PDF per page, in page order.
    pub fn split_into_pages(input_data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let source = QPdf::read_from_memory(input_data).map_err(map_qpdf_error)?;
        let num_pages = source.get_num_pages().map_err(map_qpdf_error)?;

        let mut pages = Vec::with_capacity(num_pages as usize);
        for idx in 0..num_pages {
            let page = source.get_page(idx).ok_or_else(|| Error::QpdfError {
                reason: format!("page {} of {} is missing", idx + 1, num_pages),
            })?;

            let dest = QPdf::empty();
            let copied = dest.copy_from_foreign(&page);
            dest.add_page(&copied, false).map_err(map_qpdf_error)?;

            let mut writer = dest.writer();
            writer.preserve_encryption(false);
            pages.push(writer.write_to_memory().map_err(map_qpdf_error)?);
        }

        Ok(pages)
    }
}
