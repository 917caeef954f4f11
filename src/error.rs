//! Error taxonomy for resource mutations and pipeline actions
//!
//! Mutation errors (`InvalidValue`, `NotConfigured`) are surfaced
//! synchronously to the caller and leave the resource untouched.
//! `PipelineTransitionFailed` is raised by the live backend; the pipeline
//! controller logs it and carries on, since the document mutation that
//! triggered the action has already committed.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A document value does not map onto any known enum/path/angle.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// An operation was attempted before a required dependency was initialized.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The native engine did not confirm a requested state transition.
    #[error("pipeline state transition failed: {0}")]
    PipelineTransitionFailed(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }
}
