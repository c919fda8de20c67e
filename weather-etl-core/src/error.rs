use std::time::Duration;

use thiserror::Error;

/// Failure of one pipeline step. City-scoped variants carry the city name.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("weather source is not serving '{city}': {reason}")]
    SourceUnavailable { city: String, reason: String },

    #[error("fetch for '{city}' failed after {attempts} attempt(s): {reason}")]
    FetchFailed { city: String, attempts: u32, reason: String },

    #[error("unexpected payload shape for '{city}': {reason}")]
    SchemaMismatch { city: String, reason: String },

    #[error("failed to write {destination}: {reason}")]
    WriteFailed { destination: String, reason: String },

    #[error("run did not finish within {0:?}")]
    RunTimeout(Duration),

    #[error("batch already written to {destination} in this run")]
    AlreadyWritten { destination: String },
}

impl PipelineError {
    /// City the failure is attributed to, if it is city-scoped.
    pub fn city(&self) -> Option<&str> {
        match self {
            PipelineError::SourceUnavailable { city, .. }
            | PipelineError::FetchFailed { city, .. }
            | PipelineError::SchemaMismatch { city, .. } => Some(city),
            PipelineError::WriteFailed { .. }
            | PipelineError::RunTimeout(_)
            | PipelineError::AlreadyWritten { .. } => None,
        }
    }
}

/// Why a run did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("{} of {total} cities failed: {}", .failures.len(), join(.failures))]
    Cities { total: usize, failures: Vec<PipelineError> },

    #[error(transparent)]
    Fatal(#[from] PipelineError),
}

fn join(failures: &[PipelineError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
