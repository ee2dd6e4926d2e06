//! Structural failures of a pipeline run.
//!
//! Stage functions return `anyhow::Result`; the variants below are
//! raised for problems in the data itself so that callers can
//! `downcast_ref::<PipelineError>()` and report them. None of them is
//! retried.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("[{stage}] malformed input for batch `{batch}` ({file}): {message}")]
    Format {
        stage: &'static str,
        batch: Box<str>,
        file: Box<str>,
        message: String,
    },

    #[error("[merge] features of batch `{batch}` differ from batch `{reference}`: {detail}")]
    SchemaMismatch {
        batch: Box<str>,
        reference: Box<str>,
        detail: String,
    },

    #[error("[merge] cannot disambiguate `{identifier}` in batch `{batch}`: {reason}")]
    IdentifierCollision {
        batch: Box<str>,
        identifier: Box<str>,
        reason: String,
    },

    #[error(
        "[metadata] identifier `{identifier}` of batch `{batch}` splits into {found} fields, \
         expected {expected} ({fields})"
    )]
    MetadataParse {
        batch: Box<str>,
        identifier: Box<str>,
        expected: usize,
        found: usize,
        fields: String,
    },

    #[error(
        "[anchors] batches `{batch_a}` and `{batch_b}`: {found} anchors found, \
         {retained} retained: {reason}"
    )]
    InsufficientAnchors {
        batch_a: Box<str>,
        batch_b: Box<str>,
        found: usize,
        retained: usize,
        reason: String,
    },

    #[error("[{stage}] {what} needs {requested_bytes} bytes, over the limit of {limit_bytes} bytes")]
    ResourceExhausted {
        stage: &'static str,
        what: String,
        requested_bytes: u64,
        limit_bytes: u64,
    },

    #[error("[{stage}] cancelled")]
    Cancelled { stage: &'static str },
}

impl PipelineError {
    /// Short name of the error class for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Format { .. } => "FormatError",
            PipelineError::SchemaMismatch { .. } => "SchemaMismatchError",
            PipelineError::IdentifierCollision { .. } => "IdentifierCollisionError",
            PipelineError::MetadataParse { .. } => "MetadataParseError",
            PipelineError::InsufficientAnchors { .. } => "InsufficientAnchorsError",
            PipelineError::ResourceExhausted { .. } => "ResourceExhaustedError",
            PipelineError::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Find a `PipelineError` behind an `anyhow::Error`
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.downcast_ref::<PipelineError>()
}
