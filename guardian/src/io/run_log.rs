//! Run-level document collecting one record per subject.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::core::types::{FinalStatus, TestArtifactRecord};
use crate::io::config::{GuardianConfig, write_atomic};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Serialized as `{ timestamp, dir_path, package_name, module_name, tests }`.
///
/// Only the orchestrator's collector appends; readers see the log after all
/// workers have joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub timestamp: String,
    pub dir_path: PathBuf,
    pub package_name: String,
    pub module_name: String,
    pub tests: Vec<TestArtifactRecord>,
}

/// Record counts per final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub failure: usize,
    pub error: usize,
}

impl RunLog {
    pub fn new(dir_path: PathBuf, package_name: String, module_name: String) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            dir_path,
            package_name,
            module_name,
            tests: Vec::new(),
        }
    }

    pub fn for_config(cfg: &GuardianConfig) -> Self {
        Self::new(
            cfg.dir_path.clone(),
            cfg.package_name.clone(),
            cfg.module_name.clone(),
        )
    }

    pub fn append(&mut self, record: TestArtifactRecord) {
        self.tests.push(record);
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.tests {
            match record.final_status {
                FinalStatus::Success => counts.success += 1,
                FinalStatus::Failure => counts.failure += 1,
                FinalStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// True when every record succeeded (vacuously true for an empty run).
    pub fn all_succeeded(&self) -> bool {
        self.tests
            .iter()
            .all(|record| record.final_status == FinalStatus::Success)
    }

    /// One line per record: `<name> - <status>: <message>`, with the message's
    /// non-blank lines joined by ` | `.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for record in &self.tests {
            out.push_str(&format!(
                "{} - {}: {}\n",
                record.subject_name,
                record.final_status.as_str(),
                one_line(&record.message)
            ));
        }
        out
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize run log")
    }
}

fn one_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Write the run log as pretty JSON, replacing any previous file atomically.
pub fn write_run_log(path: &Path, log: &RunLog) -> Result<()> {
    let mut json = log.to_json_pretty()?;
    json.push('\n');
    write_atomic(path, &json).with_context(|| format!("write run log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Subject;
    use crate::error::FailureKind;

    fn success(name: &str) -> TestArtifactRecord {
        TestArtifactRecord {
            subject_name: name.to_string(),
            docstring: String::new(),
            source_text: String::new(),
            test_file_path: Some(PathBuf::from(format!("/tmp/test_{name}.py"))),
            test_file_content: "# test\n".to_string(),
            final_status: FinalStatus::Success,
            message: "test passed on attempt 1".to_string(),
            attempts: 1,
            kind: None,
        }
    }

    fn sample_log() -> RunLog {
        let mut log = RunLog::new(
            PathBuf::from("tests/memory"),
            "swarms".to_string(),
            "swarms.memory".to_string(),
        );
        log.append(success("Adder"));
        log.append(TestArtifactRecord::without_candidate(
            &Subject::new("Broken", "", ""),
            FailureKind::GeneratorFailure,
            "generator exited with status Some(1)\nmore detail",
        ));
        log
    }

    #[test]
    fn timestamp_uses_date_time_format() {
        let log = sample_log();
        assert_eq!(log.timestamp.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&log.timestamp[4..5], "-");
        assert_eq!(&log.timestamp[10..11], " ");
    }

    #[test]
    fn summary_lists_each_record_once() {
        let summary = sample_log().summary();
        assert_eq!(
            summary,
            "Adder - success: test passed on attempt 1\nBroken - failure: generator exited with status Some(1) | more detail\n"
        );
    }

    #[test]
    fn summary_keeps_the_assertion_after_a_traceback() {
        let mut log = RunLog::new(PathBuf::from("tests"), "pkg".to_string(), "pkg.mod".to_string());
        log.append(TestArtifactRecord::without_candidate(
            &Subject::new("Adder", "", ""),
            FailureKind::TestFailure,
            "gave up after 3 attempt(s): test exited with code 1: Traceback (most recent call last):\n  File \"test_adder.py\", line 3, in <module>\n\nAssertionError: add(2, 3) != 6\n",
        ));

        let summary = log.summary();

        assert_eq!(summary.lines().count(), 1);
        assert!(summary.contains("AssertionError: add(2, 3) != 6"), "{summary}");
        assert!(summary.contains("Traceback (most recent call last): | File"), "{summary}");
    }

    #[test]
    fn counts_and_success_flag() {
        let log = sample_log();
        assert_eq!(
            log.counts(),
            StatusCounts {
                success: 1,
                failure: 1,
                error: 0
            }
        );
        assert!(!log.all_succeeded());
    }

    #[test]
    fn json_document_has_expected_top_level_keys() {
        let json = sample_log().to_json_pretty().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        for key in ["timestamp", "dir_path", "package_name", "module_name", "tests"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["tests"][1]["kind"], "generator_failure");
    }

    #[test]
    fn write_run_log_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out/run.json");
        let log = sample_log();
        write_run_log(&path, &log).expect("write");
        let loaded: RunLog =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded, log);
    }
}
