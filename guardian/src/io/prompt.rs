//! Prompt composition for test generation.
//!
//! The instructional template is rendered fresh for every attempt. Prior
//! attempts are appended from the subject's [`PromptContext`], windowed and
//! trimmed to fit the configured byte budget.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::context::{ContextWindow, PromptContext};
use crate::core::types::Subject;
use crate::io::config::GuardianConfig;

const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");

const HISTORY_HEADER: &str = "\n\n## Previous attempts\n\nEach earlier candidate is followed by what happened when it ran. Fix the problems reported and return the full corrected test file.\n\n";

/// Renders generator prompts. Shared read-only by all workers.
#[derive(Debug)]
pub struct PromptComposer {
    env: Environment<'static>,
    package_name: String,
    module_name: String,
    window: ContextWindow,
    budget_bytes: usize,
}

impl PromptComposer {
    pub fn new(cfg: &GuardianConfig) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("test_writer", TEST_WRITER_TEMPLATE)
            .context("load test writer template")?;
        Ok(Self {
            env,
            package_name: cfg.package_name.clone(),
            module_name: cfg.module_name.clone(),
            window: cfg.context.window(),
            budget_bytes: cfg.prompt_budget_bytes,
        })
    }

    /// Prompt for the next attempt on `subject`.
    ///
    /// A fresh context yields the bare template. Otherwise the windowed history
    /// follows, trimmed to what the budget leaves after the template.
    pub fn compose(&self, subject: &Subject, history: &PromptContext) -> Result<String> {
        let template = self.env.get_template("test_writer")?;
        let mut prompt = template
            .render(context! {
                package_name => &self.package_name,
                module_name => &self.module_name,
                subject => subject,
            })
            .with_context(|| format!("render prompt for {}", subject.name))?;

        if history.is_fresh() {
            debug!(bytes = prompt.len(), "composed initial prompt");
            return Ok(prompt);
        }

        let remaining = self
            .budget_bytes
            .saturating_sub(prompt.len() + HISTORY_HEADER.len());
        let rendered = history.render(self.window, remaining);
        prompt.push_str(HISTORY_HEADER);
        prompt.push_str(&rendered);
        prompt.push('\n');
        debug!(
            bytes = prompt.len(),
            history_bytes = rendered.len(),
            "composed retry prompt"
        );
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::failure_report;
    use crate::core::types::{ExecStatus, ExecutionReport};
    use crate::error::FailureKind;
    use crate::io::config::{ContextConfig, WindowMode};

    fn subject() -> Subject {
        Subject::new(
            "Adder",
            "Adds two integers.",
            "class Adder:\n    def add(self, a, b):\n        return a + b\n",
        )
    }

    fn failed(attempt: u32, stderr: &str) -> String {
        failure_report(
            attempt,
            FailureKind::TestFailure,
            Some(&ExecutionReport {
                status: ExecStatus::Failure,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: stderr.to_string(),
                duration_ms: 3,
                error: None,
            }),
        )
    }

    #[test]
    fn initial_prompt_embeds_subject_and_names() {
        let composer = PromptComposer::new(&GuardianConfig::default()).expect("composer");
        let mut history = PromptContext::new();
        history.push_prompt("ignored");

        let prompt = composer.compose(&subject(), &history).expect("compose");
        assert!(prompt.contains("`swarms` package"));
        assert!(prompt.contains("swarms.memory"));
        assert!(prompt.contains("Adds two integers."));
        assert!(prompt.contains("return a + b"));
        assert!(!prompt.contains("Previous attempts"));
    }

    #[test]
    fn missing_docstring_is_called_out() {
        let composer = PromptComposer::new(&GuardianConfig::default()).expect("composer");
        let prompt = composer
            .compose(&Subject::new("Bare", "", "def bare(): pass"), &PromptContext::new())
            .expect("compose");
        assert!(prompt.contains("(no documentation available)"));
    }

    #[test]
    fn retry_prompt_appends_history_after_template() {
        let composer = PromptComposer::new(&GuardianConfig::default()).expect("composer");
        let mut history = PromptContext::new();
        history.push_candidate(1, "assert add(2, 2) == 5");
        history.push_report(1, failed(1, "AssertionError: 4 != 5"));

        let prompt = composer.compose(&subject(), &history).expect("compose");
        let template_end = prompt.find("## Previous attempts").expect("history header");
        let candidate = prompt.find("assert add(2, 2) == 5").expect("candidate");
        assert!(template_end < candidate);
        assert!(prompt.contains("AssertionError: 4 != 5"));
    }

    #[test]
    fn latest_window_drops_older_attempts() {
        let cfg = GuardianConfig {
            context: ContextConfig {
                window: WindowMode::Latest,
                latest_attempts: 1,
            },
            ..GuardianConfig::default()
        };
        let composer = PromptComposer::new(&cfg).expect("composer");
        let mut history = PromptContext::new();
        history.push_candidate(1, "first candidate");
        history.push_report(1, failed(1, "first error"));
        history.push_candidate(2, "second candidate");
        history.push_report(2, failed(2, "second error"));

        let prompt = composer.compose(&subject(), &history).expect("compose");
        assert!(!prompt.contains("first candidate"));
        assert!(prompt.contains("second candidate"));
        assert!(prompt.contains("second error"));
    }

    #[test]
    fn budget_limits_replayed_history() {
        let base = PromptComposer::new(&GuardianConfig::default())
            .expect("composer")
            .compose(&subject(), &PromptContext::new())
            .expect("compose")
            .len();
        let cfg = GuardianConfig {
            prompt_budget_bytes: base + HISTORY_HEADER.len() + 400,
            ..GuardianConfig::default()
        };
        let composer = PromptComposer::new(&cfg).expect("composer");
        let mut history = PromptContext::new();
        history.push_candidate(1, "old ".repeat(200));
        history.push_report(1, failed(1, "old error"));
        history.push_candidate(2, "new candidate");
        history.push_report(2, failed(2, "new error"));

        let prompt = composer.compose(&subject(), &history).expect("compose");
        assert!(!prompt.contains("old error"));
        assert!(prompt.contains("new error"));
    }
}
