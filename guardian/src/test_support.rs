//! Test-only collaborators and fixtures for driving retry loops and runs.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::types::{ExecStatus, ExecutionReport, Subject};
use crate::error::{FailureKind, GuardianError};
use crate::io::config::{GuardianConfig, TestConfig};
use crate::io::generator::{GenerateRequest, Generator};
use crate::io::test_exec::{TestExecutor, TestRunRequest};

/// One scripted generator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Return this text as the response.
    Text(String),
    /// Fail the call as a generator failure with this message.
    Fail(String),
    /// Panic inside the call.
    Panic(String),
    /// Block until the run is cancelled.
    Stall,
}

/// A generator call as observed by [`ScriptedGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub subject: String,
    pub attempt: u32,
    pub prompt: String,
}

/// Generator with per-subject reply queues.
///
/// Once a subject's queue is empty the fallback reply is used.
#[derive(Debug)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    fallback: ScriptedResponse,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: ScriptedResponse::Fail("no scripted response".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: ScriptedResponse) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn script(self, subject: &str, responses: Vec<ScriptedResponse>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(subject.to_string(), responses.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, subject: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.subject == subject)
            .count()
    }

    pub fn prompts_for(&self, subject: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.subject == subject)
            .map(|call| call.prompt)
            .collect()
    }

    fn next_response(&self, subject: &str) -> ScriptedResponse {
        self.scripts
            .lock()
            .expect("scripts lock")
            .get_mut(subject)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            subject: request.subject.to_string(),
            attempt: request.attempt,
            prompt: request.prompt.to_string(),
        });
        match self.next_response(request.subject) {
            ScriptedResponse::Text(text) => Ok(text),
            ScriptedResponse::Fail(message) => {
                Err(GuardianError::new(FailureKind::GeneratorFailure, message).into())
            }
            ScriptedResponse::Panic(message) => panic!("{message}"),
            ScriptedResponse::Stall => {
                while !request.cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(GuardianError::cancelled("generator call cancelled").into())
            }
        }
    }
}

/// Executor that replays canned reports in call order, then the fallback.
#[derive(Debug)]
pub struct ScriptedTestExecutor {
    reports: Mutex<VecDeque<ExecutionReport>>,
    fallback: ExecutionReport,
    runs: Mutex<Vec<PathBuf>>,
}

impl ScriptedTestExecutor {
    /// Replays `reports`; further runs pass.
    pub fn new(reports: Vec<ExecutionReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            fallback: report_passed(),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Every run returns `fallback`.
    pub fn with_fallback(fallback: ExecutionReport) -> Self {
        Self {
            fallback,
            ..Self::new(Vec::new())
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }

    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().expect("runs lock").clone()
    }
}

impl TestExecutor for ScriptedTestExecutor {
    fn run(&self, request: &TestRunRequest<'_>) -> Result<ExecutionReport> {
        self.runs
            .lock()
            .expect("runs lock")
            .push(request.path.to_path_buf());
        let report = self
            .reports
            .lock()
            .expect("reports lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(report)
    }
}

/// Wrap code in a fenced block the way a model would reply.
pub fn fenced(code: &str) -> String {
    format!("Here is the test:\n\n```sh\n{code}\n```\n")
}

pub fn subject(name: &str) -> Subject {
    Subject::new(
        name,
        format!("{name} docs"),
        format!("class {name}:\n    pass\n"),
    )
}

pub fn report_passed() -> ExecutionReport {
    ExecutionReport {
        status: ExecStatus::Success,
        exit_code: Some(0),
        stdout: "ok\n".to_string(),
        stderr: String::new(),
        duration_ms: 1,
        error: None,
    }
}

pub fn report_failed(stderr: &str) -> ExecutionReport {
    ExecutionReport {
        status: ExecStatus::Failure,
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration_ms: 1,
        error: None,
    }
}

pub fn report_timed_out() -> ExecutionReport {
    ExecutionReport {
        status: ExecStatus::Timeout,
        exit_code: None,
        stdout: String::new(),
        stderr: "[test killed after timeout]\n".to_string(),
        duration_ms: 1_000,
        error: None,
    }
}

pub fn report_process_error(message: &str) -> ExecutionReport {
    ExecutionReport::process_error(message)
}

/// Scratch directory laid out for a run whose tests are shell scripts.
#[derive(Debug)]
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir().context("create temp dir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.path().join("tests")
    }

    /// Config that runs candidates with `sh` and short timeouts.
    pub fn sh_config(&self) -> GuardianConfig {
        GuardianConfig {
            dir_path: self.tests_dir(),
            package_name: "demo".to_string(),
            module_name: "demo.units".to_string(),
            test: TestConfig {
                command: vec!["sh".to_string()],
                extension: "sh".to_string(),
                comment_prefix: "#".to_string(),
                timeout_secs: 10,
            },
            ..GuardianConfig::default()
        }
    }

    /// Write `contents` to a file relative to the workspace root.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
