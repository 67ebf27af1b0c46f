//! Pipeline error types
//!
//! The variants mirror the failure taxonomy of the pipeline: `Init` and
//! `Value` are non-retryable caller/configuration faults, `Recoverable`
//! bubbles up unchanged so a surrounding retry policy may act, `Service`
//! covers external HTTP failures, `Template` marks an unusable template
//! structure (the template gets blacklisted), and `ModelRun` marks a failed
//! or inconsistent modeling-engine run.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the modeling pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Recoverable error: {0}")]
    Recoverable(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Model run error: {0}")]
    ModelRun(String),

    #[error("Value error: {0}")]
    Value(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML deserialization error: {0}")]
    XmlDe(#[from] quick_xml::DeError),

    #[error(transparent)]
    Common(#[from] templar_common::CommonError),
}

impl PipelineError {
    /// True for transient subordinate failures a retry policy may act on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Recoverable(_))
    }
}
