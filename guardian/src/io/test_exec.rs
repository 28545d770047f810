//! Isolated execution of persisted test files.
//!
//! Each run is a fresh process with its own capture buffers. The exit code
//! alone decides pass or fail; output text is never inspected for keywords.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::types::{ExecStatus, ExecutionReport};
use crate::error::GuardianError;
use crate::io::process::run_command_with_timeout;

/// Parameters for running one test file.
#[derive(Debug, Clone)]
pub struct TestRunRequest<'a> {
    pub path: &'a Path,
    pub timeout: Duration,
    pub cancel: &'a CancelToken,
}

/// Runs a persisted test and reports how it ended.
pub trait TestExecutor: Send + Sync {
    /// Launch failures are reported as [`ExecStatus::ProcessError`]. The only
    /// error is cancellation of the run.
    fn run(&self, request: &TestRunRequest<'_>) -> Result<ExecutionReport>;
}

/// Runs `<command...> <path>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTestExecutor {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl ProcessTestExecutor {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }
}

impl TestExecutor for ProcessTestExecutor {
    #[instrument(skip_all, fields(path = %request.path.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &TestRunRequest<'_>) -> Result<ExecutionReport> {
        let Some(program) = self.command.first() else {
            return Ok(ExecutionReport::process_error("test command is empty"));
        };
        if !request.path.is_file() {
            return Ok(ExecutionReport::process_error(format!(
                "test file not found: {}",
                request.path.display()
            )));
        }

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]).arg(request.path);

        let output = match run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            self.output_limit_bytes,
            request.cancel,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test process could not be launched");
                return Ok(ExecutionReport::process_error(format!(
                    "launch `{program}`: {err:#}"
                )));
            }
        };

        if output.cancelled {
            return Err(GuardianError::cancelled("test execution cancelled").into());
        }

        let status = if output.timed_out {
            ExecStatus::Timeout
        } else if output.status.success() {
            ExecStatus::Success
        } else {
            ExecStatus::Failure
        };
        let mut stderr = output.stderr_text();
        if output.timed_out {
            stderr.push_str(&format!(
                "\n[test killed after {:?} wall-clock timeout]\n",
                request.timeout
            ));
        }

        let report = ExecutionReport {
            status,
            exit_code: output.status.code(),
            stdout: output.stdout_text(),
            stderr,
            duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
            error: None,
        };
        debug!(status = status.as_str(), exit_code = ?report.exit_code, duration_ms = report.duration_ms, "test finished");
        Ok(report)
    }
}
