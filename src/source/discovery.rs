//! Input discovery: list candidate files and keep the recognizable PDFs

use crate::error::{Error, Result};
use crate::source::Document;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Why an input entry was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Not a PDF by extension or by header
    UnsupportedFormat(String),
    /// The file could not be read
    Unreadable(String),
}

/// An input entry that discovery skipped
#[derive(Debug, Clone)]
pub struct RejectedEntry {
    pub path: PathBuf,
    pub reason: RejectReason,
}

/// Outcome of scanning an input location
#[derive(Debug, Default)]
pub struct Discovery {
    /// Accepted documents, sorted by path
    pub documents: Vec<Document>,
    /// Skipped entries, sorted by path
    pub rejected: Vec<RejectedEntry>,
}

/// Scan `input_dir` for PDF documents.
///
/// Non-PDF and unreadable entries are logged and reported in
/// [`Discovery::rejected`]; they never fail the scan. An empty result is not
/// an error.
pub fn discover(input_dir: &Path, recursive: bool) -> Result<Discovery> {
    if !input_dir.is_dir() {
        return Err(Error::InputNotFound {
            path: input_dir.display().to_string(),
        });
    }

    let mut discovery = Discovery::default();
    collect(input_dir, input_dir, recursive, &mut discovery)?;

    discovery.documents.sort_by(|a, b| a.path.cmp(&b.path));
    discovery.rejected.sort_by(|a, b| a.path.cmp(&b.path));
    disambiguate(&mut discovery.documents);

    for entry in &discovery.rejected {
        match &entry.reason {
            RejectReason::UnsupportedFormat(reason) => tracing::warn!(
                kind = "UnsupportedFormat",
                path = %entry.path.display(),
                "Skipping input: {}",
                reason
            ),
            RejectReason::Unreadable(reason) => tracing::warn!(
                kind = "UnsupportedFormat",
                path = %entry.path.display(),
                "Skipping unreadable input: {}",
                reason
            ),
        }
    }

    tracing::info!(
        documents = discovery.documents.len(),
        rejected = discovery.rejected.len(),
        "Discovered input documents in {}",
        input_dir.display()
    );

    Ok(discovery)
}

fn collect(root: &Path, dir: &Path, recursive: bool, out: &mut Discovery) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(Error::Io)?;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Skipping unreadable directory entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();

        if path.is_dir() {
            if recursive {
                if let Err(e) = collect(root, &path, recursive, out) {
                    out.rejected.push(RejectedEntry {
                        path,
                        reason: RejectReason::Unreadable(e.to_string()),
                    });
                }
            }
            continue;
        }

        let has_pdf_extension = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if !has_pdf_extension {
            out.rejected.push(RejectedEntry {
                path,
                reason: RejectReason::UnsupportedFormat(
                    "file format is not recognized as a PDF".to_string(),
                ),
            });
            continue;
        }

        match check_pdf_header(&path) {
            Ok(true) => {
                let name = document_name(root, &path);
                out.documents.push(Document::new(path, name));
            }
            Ok(false) => out.rejected.push(RejectedEntry {
                path,
                reason: RejectReason::UnsupportedFormat(
                    "missing %PDF header".to_string(),
                ),
            }),
            Err(e) => out.rejected.push(RejectedEntry {
                path,
                reason: RejectReason::Unreadable(e.to_string()),
            }),
        }
    }

    Ok(())
}

/// Check the PDF container signature at the start of the file.
pub fn check_pdf_header(path: &Path) -> std::io::Result<bool> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == b"%PDF"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Name a document after its path relative to the input root, without the
/// extension. Nested paths are flattened with `_` so names stay unique and
/// usable as file names.
fn document_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let stem = relative.with_extension("");
    stem.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_")
}

/// Give every document a distinct name.
///
/// Names feed unit identities, scratch files and artifact paths, so two inputs
/// such as `doc.pdf` and `doc.PDF` must not share one. Names are compared
/// without case since artifacts may land on a case-insensitive filesystem.
/// Documents keep their sorted order and the first one keeps its name.
fn disambiguate(documents: &mut [Document]) {
    let mut taken: HashSet<String> = documents.iter().map(|d| d.name.to_lowercase()).collect();
    let mut seen: HashSet<String> = HashSet::with_capacity(documents.len());

    for document in documents.iter_mut() {
        if seen.insert(document.name.to_lowercase()) {
            continue;
        }
        let renamed = (2..)
            .map(|n| format!("{}_{}", document.name, n))
            .find(|candidate| !taken.contains(&candidate.to_lowercase()))
            .unwrap_or_else(|| document.name.clone());
        tracing::warn!(
            path = %document.path.display(),
            name = %document.name,
            renamed = %renamed,
            "Document name already taken, renaming"
        );
        taken.insert(renamed.to_lowercase());
        seen.insert(renamed.to_lowercase());
        document.name = renamed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_discover_filters_non_pdf() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.pdf", b"%PDF-1.4\n");
        write(tmp.path(), "B.PDF", b"%PDF-1.7\n");
        write(tmp.path(), "notes.txt", b"hello");
        write(tmp.path(), "scan.png", b"\x89PNG");

        let discovery = discover(tmp.path(), false).unwrap();
        let names: Vec<_> = discovery.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["B", "a"]);
        assert_eq!(discovery.rejected.len(), 2);
        assert!(discovery
            .rejected
            .iter()
            .all(|r| matches!(r.reason, RejectReason::UnsupportedFormat(_))));
    }

    #[test]
    fn test_discover_rejects_fake_pdf() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "fake.pdf", b"Hello World");
        write(tmp.path(), "tiny.pdf", b"%P");

        let discovery = discover(tmp.path(), false).unwrap();
        assert!(discovery.documents.is_empty());
        assert_eq!(discovery.rejected.len(), 2);
    }

    #[test]
    fn test_discover_empty_is_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let discovery = discover(tmp.path(), false).unwrap();
        assert!(discovery.documents.is_empty());
        assert!(discovery.rejected.is_empty());
    }

    #[test]
    fn test_discover_missing_dir() {
        let result = discover(Path::new("/nonexistent/input"), false);
        assert!(matches!(result, Err(Error::InputNotFound { .. })));
    }

    #[test]
    fn test_discover_recursive_names_are_flattened() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("2024");
        fs::create_dir(&nested).unwrap();
        write(&nested, "form.pdf", b"%PDF-1.4\n");
        write(tmp.path(), "form.pdf", b"%PDF-1.4\n");

        let flat = discover(tmp.path(), false).unwrap();
        assert_eq!(flat.documents.len(), 1);

        let deep = discover(tmp.path(), true).unwrap();
        let names: Vec<_> = deep.documents.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["2024_form".to_string(), "form".to_string()]);
    }

    // Needs a case-sensitive filesystem to hold both doc.pdf and doc.PDF
    #[cfg(target_os = "linux")]
    #[test]
    fn test_colliding_names_are_made_unique() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "doc.pdf", b"%PDF-1.4\n");
        write(tmp.path(), "doc.PDF", b"%PDF-1.4\n");
        write(tmp.path(), "doc_2.pdf", b"%PDF-1.4\n");
        let nested = tmp.path().join("2024");
        fs::create_dir(&nested).unwrap();
        write(&nested, "form.pdf", b"%PDF-1.4\n");
        write(tmp.path(), "2024_form.pdf", b"%PDF-1.4\n");

        let discovery = discover(tmp.path(), true).unwrap();
        let named: Vec<(String, String)> = discovery
            .documents
            .iter()
            .map(|d| {
                let relative = d.path.strip_prefix(tmp.path()).unwrap();
                (relative.display().to_string(), d.name.clone())
            })
            .collect();
        assert_eq!(
            named,
            vec![
                ("2024/form.pdf".to_string(), "2024_form".to_string()),
                ("2024_form.pdf".to_string(), "2024_form_2".to_string()),
                ("doc.PDF".to_string(), "doc".to_string()),
                ("doc.pdf".to_string(), "doc_3".to_string()),
                ("doc_2.pdf".to_string(), "doc_2".to_string()),
            ]
        );
    }
}
