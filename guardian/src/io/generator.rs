//! Generator abstraction for candidate test synthesis.
//!
//! The [`Generator`] trait decouples the retry loop from the text model backend.
//! The production backend pipes the prompt into a configured command; tests use
//! scripted generators that return predetermined responses without spawning
//! processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::error::{FailureKind, GuardianError};
use crate::io::process::run_command_with_timeout;

/// Parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    /// Subject the prompt was composed for (diagnostics and scripting).
    pub subject: &'a str,
    /// 1-indexed attempt number within the subject's loop.
    pub attempt: u32,
    pub prompt: &'a str,
    /// Maximum time to wait for the response.
    pub timeout: Duration,
    pub cancel: &'a CancelToken,
}

/// Text-in, text-out model collaborator. Shared by all workers of a run.
pub trait Generator: Send + Sync {
    /// Produce a raw response for the prompt. Any error ends the subject's loop.
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String>;
}

/// Generator that runs a command with the prompt on stdin and reads the
/// response from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("generator command must not be empty"));
        }
        Ok(Self {
            command,
            output_limit_bytes,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(subject = request.subject, attempt = request.attempt, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String> {
        info!(program = %self.command[0], "requesting candidate");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
            request.cancel,
        )
        .map_err(|err| {
            GuardianError::new(
                FailureKind::GeneratorFailure,
                format!("run generator `{}`: {err:#}", self.command[0]),
            )
        })?;

        if output.cancelled {
            return Err(GuardianError::cancelled("generator call cancelled").into());
        }
        if output.timed_out {
            warn!("generator timed out");
            return Err(GuardianError::new(
                FailureKind::GeneratorFailure,
                format!("generator timed out after {:?}", request.timeout),
            )
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(GuardianError::new(
                FailureKind::GeneratorFailure,
                format!(
                    "generator exited with status {:?}: {}",
                    output.status.code(),
                    output.stderr_text().trim()
                ),
            )
            .into());
        }

        let response = String::from_utf8(output.stdout)
            .context("generator response is not valid UTF-8")
            .map_err(|err| GuardianError::new(FailureKind::GeneratorFailure, format!("{err:#}")))?;
        debug!(bytes = response.len(), "candidate received");
        Ok(response)
    }
}
