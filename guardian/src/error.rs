//! Failure taxonomy for a subject's pipeline.
//!
//! Plumbing errors travel as `anyhow::Error`. When a failure must be classified
//! (for the run log, or to decide whether a loop gives up), it is raised as a
//! [`GuardianError`] and recovered with [`failure_kind`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::FinalStatus;

/// Why a subject did not end in success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The generator collaborator was unreachable, errored, or timed out.
    GeneratorFailure,
    /// The generator response contained no fenced code block.
    ExtractionEmpty,
    /// The test directory or file could not be written, or two subjects
    /// would share a test file.
    IoFailure,
    /// The generated test did not exit before its deadline.
    ExecutionTimeout,
    /// The test process could not be launched.
    ExecutionError,
    /// The test process ran and exited non-zero.
    TestFailure,
    /// The subject could not be described (name, docs, source).
    ReflectionFailure,
    /// The run was stopped before the subject finished.
    RunCancelled,
    /// A worker panicked or hit an unclassified error.
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::GeneratorFailure => "generator_failure",
            FailureKind::ExtractionEmpty => "extraction_empty",
            FailureKind::IoFailure => "io_failure",
            FailureKind::ExecutionTimeout => "execution_timeout",
            FailureKind::ExecutionError => "execution_error",
            FailureKind::TestFailure => "test_failure",
            FailureKind::ReflectionFailure => "reflection_failure",
            FailureKind::RunCancelled => "run_cancelled",
            FailureKind::Internal => "internal",
        }
    }

    /// Terminal record status for a subject that stopped with this kind.
    ///
    /// Loops that give up on their own report `failure`. Subjects that never
    /// got a fair run (undescribable, cancelled, worker faults) report `error`.
    pub fn final_status(self) -> FinalStatus {
        match self {
            FailureKind::ReflectionFailure | FailureKind::RunCancelled | FailureKind::Internal => {
                FinalStatus::Error
            }
            _ => FinalStatus::Failure,
        }
    }

    /// Whether a new candidate may fix this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::TestFailure | FailureKind::ExtractionEmpty | FailureKind::ExecutionTimeout
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GuardianError {
    pub kind: FailureKind,
    pub message: String,
}

impl GuardianError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RunCancelled, message)
    }
}

/// Classify an error chain, falling back to `fallback` when no
/// [`GuardianError`] is attached.
pub fn failure_kind(err: &anyhow::Error, fallback: FailureKind) -> FailureKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GuardianError>())
        .map_or(fallback, |classified| classified.kind)
}
