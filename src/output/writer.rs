//! Persistence of merged results

use crate::dispatch::MergedResult;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Suffix appended to a unit identity to form its artifact file name
pub const ARTIFACT_SUFFIX: &str = "_extraction_output.json";

/// All page records of one document, ordered by page index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub unit_identity: String,
    pub pages: Vec<MergedResult>,
}

/// Deterministic artifact file name for a unit.
pub fn artifact_file_name(unit_identity: &str) -> String {
    format!("{}{}", unit_identity, ARTIFACT_SUFFIX)
}

/// Writes one JSON artifact per unit into the output location
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    /// Create the writer, creating the output location if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| Error::InvalidConfig {
            reason: format!(
                "cannot create output location {}: {}",
                output_dir.display(),
                e
            ),
        })?;
        Ok(Self { output_dir })
    }

    pub fn path_for(&self, unit_identity: &str) -> PathBuf {
        self.output_dir.join(artifact_file_name(unit_identity))
    }

    /// Write the record for a page unit.
    pub async fn write_page(&self, result: &MergedResult) -> Result<PathBuf> {
        self.write(&result.unit_identity, result).await
    }

    /// Write the record for a whole document.
    pub async fn write_document(&self, record: &DocumentRecord) -> Result<PathBuf> {
        self.write(&record.unit_identity, record).await
    }

    /// Serialize `record` and replace the unit's artifact.
    ///
    /// The data goes to a temporary sibling first and is renamed into place,
    /// so an existing artifact is either fully replaced or left untouched.
    pub async fn write<T: Serialize>(&self, unit_identity: &str, record: &T) -> Result<PathBuf> {
        let path = self.path_for(unit_identity);
        let data = serde_json::to_vec_pretty(record)?;

        let tmp = self
            .output_dir
            .join(format!(".{}.tmp", artifact_file_name(unit_identity)));
        let write_error = |source: std::io::Error| Error::Write {
            path: path.display().to_string(),
            source,
        };

        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_error(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_error(e));
        }

        tracing::debug!(unit = unit_identity, path = %path.display(), bytes = data.len(), "Artifact written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{merge, FailureKind, WorkerOutcome};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn page_result(identity: &str) -> MergedResult {
        merge(
            identity,
            vec![WorkerOutcome::failed("W2", FailureKind::WorkerFailure, "boom")],
        )
    }

    #[tokio::test]
    async fn test_write_page_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(tmp.path().join("out")).unwrap();

        let path = writer.write_page(&page_result("doc1-p1")).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "doc1-p1_extraction_output.json"
        );

        let value: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "unitIdentity": "doc1-p1",
                "workerOutputs": {"W2": {"error": {"kind": "WorkerFailure", "message": "boom"}}}
            })
        );
    }

    #[tokio::test]
    async fn test_rewrite_overwrites_instead_of_duplicating() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(tmp.path()).unwrap();

        writer.write_page(&MergedResult::empty("doc1-p1")).await.unwrap();
        writer.write_page(&page_result("doc1-p1")).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_write_document_record() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(tmp.path()).unwrap();
        let record = DocumentRecord {
            unit_identity: "doc1".to_string(),
            pages: vec![page_result("doc1-p1"), MergedResult::empty("doc1-p2")],
        };

        let path = writer.write_document(&record).await.unwrap();
        assert!(path.ends_with("doc1_extraction_output.json"));
        let read: DocumentRecord = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(read, record);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(tmp.path()).unwrap();
        // A directory squatting on the artifact name makes the rename fail
        std::fs::create_dir(writer.path_for("doc1-p1")).unwrap();
        std::fs::write(writer.path_for("doc1-p1").join("keep"), b"x").unwrap();

        let err = writer.write_page(&page_result("doc1-p1")).await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(err.kind(), "WriteError");
    }
}
