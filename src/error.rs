//! Error types for pipeline construction, ordering and execution.
//!
//! Validation and ordering failures are raised at the point of detection.
//! Failures coming out of a step's work item are carried in
//! [`PipelineError::StepFailure`] untouched, so the caller sees the original
//! message and can recover the original [`anyhow::Error`].

use thiserror::Error;

/// Coarse classification of a [`PipelineError`], for callers that only need
/// to branch on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    CyclicDependency,
    PipelineEmpty,
    StepFailure,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed construction input: bad step collection shape or a value
    /// that is not a step.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The dependency mapping contains a cycle.
    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency { cycle: String },

    /// The materialized step collection is empty.
    #[error("Pipeline {pipeline} has no steps to run.")]
    PipelineEmpty { pipeline: String },

    /// A step's work item failed. Displays the original failure unchanged.
    #[error("{source}")]
    StepFailure {
        step: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PipelineError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            PipelineError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            PipelineError::PipelineEmpty { .. } => ErrorKind::PipelineEmpty,
            PipelineError::StepFailure { .. } => ErrorKind::StepFailure,
        }
    }

    /// Name of the step that failed, for [`PipelineError::StepFailure`].
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            PipelineError::StepFailure { step, .. } => Some(step),
            _ => None,
        }
    }

    /// An equivalent error of the same variant. A step failure's source
    /// cannot be cloned, so the copy carries its rendered message instead.
    pub fn replay(&self) -> Self {
        match self {
            PipelineError::InvalidArgument { message } => PipelineError::InvalidArgument {
                message: message.clone(),
            },
            PipelineError::CyclicDependency { cycle } => PipelineError::CyclicDependency {
                cycle: cycle.clone(),
            },
            PipelineError::PipelineEmpty { pipeline } => PipelineError::PipelineEmpty {
                pipeline: pipeline.clone(),
            },
            PipelineError::StepFailure { step, source } => PipelineError::StepFailure {
                step: step.clone(),
                source: anyhow::anyhow!("{source}"),
            },
        }
    }

    /// Unwraps the work item's own error. Other variants are returned as-is
    /// inside an [`anyhow::Error`].
    pub fn into_step_source(self) -> anyhow::Error {
        match self {
            PipelineError::StepFailure { source, .. } => source,
            other => anyhow::Error::new(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
