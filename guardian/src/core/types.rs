//! Shared data model for a guardian run.
//!
//! These types carry no I/O. Records serialize into the run log, so field names
//! and enum spellings are part of the output format.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Immutable description of one code unit to synthesize tests for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub docstring: String,
    pub source_text: String,
}

impl Subject {
    pub fn new(
        name: impl Into<String>,
        docstring: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            docstring: docstring.into(),
            source_text: source_text.into(),
        }
    }
}

/// A manifest entry after the describe step.
///
/// Entries that could not be described still flow to the orchestrator so that
/// every configured subject ends up with exactly one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspected {
    Ready(Subject),
    Failed { name: String, reason: String },
}

impl From<Subject> for Inspected {
    fn from(subject: Subject) -> Self {
        Inspected::Ready(subject)
    }
}

/// One generate step of a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub prompt: String,
    pub raw_response: String,
    /// Empty when the response held no fenced block.
    pub extracted_code: String,
}

/// How a test process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// Exited with status 0.
    Success,
    /// Exited non-zero.
    Failure,
    /// Killed after exceeding its wall-clock budget.
    Timeout,
    /// Could not be launched.
    ProcessError,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Success => "success",
            ExecStatus::Failure => "failure",
            ExecStatus::Timeout => "timeout",
            ExecStatus::ProcessError => "process_error",
        }
    }
}

/// Captured result of running one persisted test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ExecStatus,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Launch failure description (only for `ProcessError`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn process_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::ProcessError,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            error: Some(message.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

/// Terminal status of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Success,
    Failure,
    Error,
}

impl FinalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::Failure => "failure",
            FinalStatus::Error => "error",
        }
    }
}

/// Durable outcome for one subject. Created once, never mutated after it is
/// appended to the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArtifactRecord {
    pub subject_name: String,
    pub docstring: String,
    pub source_text: String,
    /// Absolute path of the last persisted candidate, if any was written.
    pub test_file_path: Option<PathBuf>,
    /// Content at `test_file_path` (empty when nothing was written).
    pub test_file_content: String,
    pub final_status: FinalStatus,
    pub message: String,
    /// Number of generator calls made for this subject.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl TestArtifactRecord {
    /// A record for a subject that never produced a candidate.
    pub fn without_candidate(
        subject: &Subject,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subject_name: subject.name.clone(),
            docstring: subject.docstring.clone(),
            source_text: subject.source_text.clone(),
            test_file_path: None,
            test_file_content: String::new(),
            final_status: kind.final_status(),
            message: message.into(),
            attempts: 0,
            kind: Some(kind),
        }
    }

    /// A record for a manifest entry that could not be described.
    pub fn reflection_failure(name: &str, reason: &str) -> Self {
        Self::without_candidate(
            &Subject::new(name, "", ""),
            FailureKind::ReflectionFailure,
            format!("could not describe subject: {reason}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_snake_case_statuses() {
        let record = TestArtifactRecord::without_candidate(
            &Subject::new("Adder", "adds", "def add(): ..."),
            FailureKind::RunCancelled,
            "cancelled",
        );
        let value = serde_json::to_value(&record).expect("json");
        assert_eq!(value["final_status"], "error");
        assert_eq!(value["kind"], "run_cancelled");
        assert_eq!(value["test_file_path"], serde_json::Value::Null);
    }

    #[test]
    fn successful_records_omit_kind() {
        let record = TestArtifactRecord {
            subject_name: "Adder".to_string(),
            docstring: String::new(),
            source_text: String::new(),
            test_file_path: Some(PathBuf::from("/tmp/test_adder.py")),
            test_file_content: "# Adder\n".to_string(),
            final_status: FinalStatus::Success,
            message: "ok".to_string(),
            attempts: 1,
            kind: None,
        };
        let value = serde_json::to_value(&record).expect("json");
        assert!(value.get("kind").is_none());
        assert_eq!(value["final_status"], "success");
    }

    #[test]
    fn reflection_failures_keep_the_manifest_name() {
        let record = TestArtifactRecord::reflection_failure("Ghost", "missing source");
        assert_eq!(record.subject_name, "Ghost");
        assert_eq!(record.kind, Some(FailureKind::ReflectionFailure));
        assert!(record.message.contains("missing source"));
    }
}
