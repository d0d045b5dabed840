//! Page segmentation: turn a document into independently dispatchable pages

use crate::error::{Error, Result};
use crate::pdf::QpdfWrapper;
use crate::source::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Role of a page within its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRole {
    /// The first page, used by classification-style workers
    Primary,
    /// Every page after the first
    Secondary,
}

impl fmt::Display for PageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRole::Primary => f.write_str("primary"),
            PageRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// A single page ready for dispatch
#[derive(Debug, Clone)]
pub struct PageUnit {
    /// Name of the owning document
    pub document: Arc<str>,
    /// 0-based index in the original document
    pub index: u32,
    pub role: PageRole,
    /// Single-page PDF handed to workers
    pub path: PathBuf,
}

impl PageUnit {
    /// Stable identity, e.g. `invoice-p1` for the first page of `invoice.pdf`.
    pub fn identity(&self) -> String {
        unit_identity(&self.document, self.index)
    }
}

/// Identity of page `index` (0-based) of `document`.
pub fn unit_identity(document: &str, index: u32) -> String {
    format!("{}-p{}", document, index + 1)
}

/// Pages of one document split by role
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub primary: PageUnit,
    pub secondary: Vec<PageUnit>,
    /// Page count reported by the document
    pub page_count: u32,
}

impl Segmentation {
    /// All units in page order.
    pub fn units(&self) -> impl Iterator<Item = &PageUnit> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    pub fn into_units(self) -> Vec<PageUnit> {
        let mut units = Vec::with_capacity(self.secondary.len() + 1);
        units.push(self.primary);
        units.extend(self.secondary);
        units
    }
}

/// Splits documents into single-page PDFs under a scratch directory
#[derive(Debug, Clone)]
pub struct PageSegmenter {
    scratch_dir: PathBuf,
}

impl PageSegmenter {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Segment a document on the blocking pool.
    ///
    /// A document with at most one page is handed through unchanged as its
    /// own primary page, with no secondary pages and no scratch file.
    pub async fn segment(&self, document: &Document) -> Result<Segmentation> {
        let path = document.path.clone();
        let name: Arc<str> = Arc::from(document.name.as_str());
        let scratch = self.scratch_dir.clone();

        let task_name = name.clone();
        tokio::task::spawn_blocking(move || segment_blocking(&path, task_name, &scratch))
            .await
            .map_err(|e| Error::TaskJoin {
                reason: e.to_string(),
            })?
            .map_err(|e| match e {
                Error::Segmentation { .. } => e,
                other => Error::Segmentation {
                    document: name.to_string(),
                    reason: other.to_string(),
                },
            })
    }
}

fn segment_blocking(path: &Path, name: Arc<str>, scratch: &Path) -> Result<Segmentation> {
    let data = std::fs::read(path)?;
    let page_count = QpdfWrapper::get_page_count(&data)?;
    if page_count <= 1 {
        tracing::debug!(document = %name, page_count, "Nothing to split, document passed through");
        return Ok(Segmentation {
            primary: PageUnit {
                document: name,
                index: 0,
                role: PageRole::Primary,
                path: path.to_path_buf(),
            },
            secondary: Vec::new(),
            page_count,
        });
    }

    let pages = QpdfWrapper::split_into_pages(&data)?;
    if pages.len() != page_count as usize {
        return Err(Error::Segmentation {
            document: name.to_string(),
            reason: format!("expected {} pages, split produced {}", page_count, pages.len()),
        });
    }

    std::fs::create_dir_all(scratch)?;

    let mut units = Vec::with_capacity(pages.len());
    for (index, bytes) in pages.into_iter().enumerate() {
        let index = index as u32;
        let page_path = scratch.join(format!("{}.pdf", unit_identity(&name, index)));
        std::fs::write(&page_path, bytes)?;
        units.push(PageUnit {
            document: name.clone(),
            index,
            role: if index == 0 {
                PageRole::Primary
            } else {
                PageRole::Secondary
            },
            path: page_path,
        });
    }

    tracing::debug!(document = %name, page_count, "Split document into pages");

    let mut units = units.into_iter();
    let primary = units.next().ok_or_else(|| Error::Segmentation {
        document: name.to_string(),
        reason: "split produced no pages".to_string(),
    })?;

    Ok(Segmentation {
        primary,
        secondary: units.collect(),
        page_count,
    })
}
