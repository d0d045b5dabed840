//! Error types for the extraction orchestrator

use thiserror::Error;

/// Result type alias for the extraction orchestrator
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the extraction orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Input location does not exist or is not a directory
    #[error("Input location not found: {path}")]
    InputNotFound { path: String },

    /// Workers location does not exist or is not a directory
    #[error("Workers location not found: {path}")]
    WorkersNotFound { path: String },

    /// No worker descriptor could be loaded
    #[error("No usable worker descriptors in {path}")]
    NoWorkers { path: String },

    /// Invalid run configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// File is not in a recognized document format
    #[error("Unsupported format for {path}: {reason}")]
    UnsupportedFormat { path: String, reason: String },

    /// Document could not be split into pages
    #[error("Failed to segment {document}: {reason}")]
    Segmentation { document: String, reason: String },

    /// Worker descriptor could not be loaded
    #[error("Failed to load worker config {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    /// A required remote resource could not be activated
    #[error("Activation of {resource} failed: {reason}")]
    ActivationFatal { resource: String, reason: String },

    /// Merged artifact could not be persisted
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Background task failed to complete
    #[error("Task join error: {reason}")]
    TaskJoin { reason: String },

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Taxonomy name used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InputNotFound { .. }
            | Error::WorkersNotFound { .. }
            | Error::NoWorkers { .. }
            | Error::InvalidConfig { .. } => "ConfigurationError",
            Error::UnsupportedFormat { .. } => "UnsupportedFormat",
            Error::Segmentation { .. } | Error::QpdfError { .. } => "SegmentationError",
            Error::ConfigLoad { .. } => "ConfigLoadError",
            Error::ActivationFatal { .. } => "ActivationFatalError",
            Error::Write { .. } => "WriteError",
            Error::TaskJoin { .. } => "TaskJoinError",
            Error::HttpRequest(_) => "HttpError",
            Error::Io(_) => "IoError",
            Error::Serialization(_) => "SerializationError",
        }
    }

    /// Process exit code for an error that ended the run.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InputNotFound { .. }
            | Error::WorkersNotFound { .. }
            | Error::NoWorkers { .. }
            | Error::InvalidConfig { .. } => 2,
            Error::ActivationFatal { .. } => 3,
            _ => 1,
        }
    }
}
