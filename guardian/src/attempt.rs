//! Per-subject retry loop: compose, generate, extract, persist, execute, evaluate.
//!
//! Attempts are strictly sequential. Every loop terminates with exactly one
//! [`TestArtifactRecord`], after at most `max_attempts` generator calls.

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::budget::{deadline_reached, step_timeout};
use crate::core::cancel::CancelToken;
use crate::core::context::{PromptContext, failure_report};
use crate::core::extract::extract_code;
use crate::core::types::{
    ExecStatus, ExecutionReport, FinalStatus, GenerationAttempt, Subject, TestArtifactRecord,
};
use crate::error::{FailureKind, failure_kind};
use crate::io::generator::{GenerateRequest, Generator};
use crate::io::prompt::PromptComposer;
use crate::io::store::{StoredTest, TestFileStore};
use crate::io::test_exec::{TestExecutor, TestRunRequest};

/// Collaborators shared by every loop of a run.
pub struct LoopDeps<'a, G: ?Sized, X: ?Sized> {
    pub composer: &'a PromptComposer,
    pub generator: &'a G,
    pub store: &'a TestFileStore,
    pub executor: &'a X,
    pub cancel: &'a CancelToken,
}

/// Limits applied to one subject's loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Generator calls allowed before giving up. At least 1.
    pub max_attempts: u32,
    pub generator_timeout: Duration,
    pub test_timeout: Duration,
    /// Run deadline; step timeouts are clamped to it.
    pub deadline: Option<Instant>,
}

/// Result of driving one subject to a terminal state.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub record: TestArtifactRecord,
    /// Responses received, oldest first.
    pub attempts: Vec<GenerationAttempt>,
}

/// What the evaluation step looks at.
#[derive(Debug)]
enum Evaluation {
    Executed {
        stored: StoredTest,
        report: ExecutionReport,
    },
    /// The response had no fenced code; nothing was written or run.
    NoCode,
}

#[derive(Debug)]
enum LoopState {
    Composing,
    Generating { prompt: String },
    Extracting { prompt: String, response: String },
    Persisting { code: String },
    Executing { stored: StoredTest },
    Evaluating(Evaluation),
    Retrying { kind: FailureKind },
    Succeeded { stored: StoredTest },
    GivingUp { kind: FailureKind, message: String },
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::Composing => "composing",
            LoopState::Generating { .. } => "generating",
            LoopState::Extracting { .. } => "extracting",
            LoopState::Persisting { .. } => "persisting",
            LoopState::Executing { .. } => "executing",
            LoopState::Evaluating(_) => "evaluating",
            LoopState::Retrying { .. } => "retrying",
            LoopState::Succeeded { .. } => "succeeded",
            LoopState::GivingUp { .. } => "giving_up",
        }
    }
}

/// Drive `subject` until its test passes or the policy gives up.
#[instrument(skip_all, fields(subject = %subject.name, max_attempts = policy.max_attempts))]
pub fn run_retry_loop<G, X>(
    subject: &Subject,
    deps: &LoopDeps<'_, G, X>,
    policy: &RetryPolicy,
) -> LoopOutcome
where
    G: Generator + ?Sized,
    X: TestExecutor + ?Sized,
{
    RetryLoop {
        subject,
        deps,
        policy,
        context: PromptContext::new(),
        attempt: 0,
        attempts: Vec::new(),
        last_stored: None,
    }
    .run()
}

struct RetryLoop<'a, 'd, G: ?Sized, X: ?Sized> {
    subject: &'a Subject,
    deps: &'a LoopDeps<'d, G, X>,
    policy: &'a RetryPolicy,
    context: PromptContext,
    /// Generator calls made so far.
    attempt: u32,
    attempts: Vec<GenerationAttempt>,
    last_stored: Option<StoredTest>,
}

impl<G, X> RetryLoop<'_, '_, G, X>
where
    G: Generator + ?Sized,
    X: TestExecutor + ?Sized,
{
    fn run(mut self) -> LoopOutcome {
        let mut state = LoopState::Composing;
        loop {
            debug!(attempt = self.attempt, state = state.name(), "retry loop transition");
            state = match state {
                LoopState::Composing => self.compose(),
                LoopState::Generating { prompt } => self.generate(prompt),
                LoopState::Extracting { prompt, response } => self.extract(prompt, response),
                LoopState::Persisting { code } => self.persist(code),
                LoopState::Executing { stored } => self.execute(stored),
                LoopState::Evaluating(evaluation) => self.evaluate(evaluation),
                LoopState::Retrying { kind } => {
                    info!(attempt = self.attempt, kind = %kind, "attempt failed, retrying");
                    LoopState::Composing
                }
                LoopState::Succeeded { stored } => return self.succeed(stored),
                LoopState::GivingUp { kind, message } => return self.give_up(kind, message),
            };
        }
    }

    fn compose(&mut self) -> LoopState {
        if self.cut_off() {
            let reason = if self.deps.cancel.is_cancelled() {
                "run cancelled"
            } else {
                "run deadline reached"
            };
            return LoopState::GivingUp {
                kind: FailureKind::RunCancelled,
                message: format!("{reason} after {} attempt(s)", self.attempt),
            };
        }
        match self.deps.composer.compose(self.subject, &self.context) {
            Ok(prompt) => {
                if self.context.is_fresh() && self.context.entries().is_empty() {
                    self.context.push_prompt(prompt.clone());
                }
                LoopState::Generating { prompt }
            }
            Err(err) => LoopState::GivingUp {
                kind: FailureKind::Internal,
                message: format!("compose prompt: {err:#}"),
            },
        }
    }

    fn generate(&mut self, prompt: String) -> LoopState {
        let timeout = match step_timeout(self.policy.generator_timeout, self.policy.deadline) {
            Ok(timeout) => timeout,
            Err(err) => return self.stopped(&err, FailureKind::RunCancelled),
        };
        self.attempt += 1;
        let request = GenerateRequest {
            subject: &self.subject.name,
            attempt: self.attempt,
            prompt: &prompt,
            timeout,
            cancel: self.deps.cancel,
        };
        match self.deps.generator.generate(&request) {
            Ok(response) => LoopState::Extracting { prompt, response },
            Err(err) => {
                warn!(attempt = self.attempt, err = %format!("{err:#}"), "generator call failed");
                self.stopped(&err, FailureKind::GeneratorFailure)
            }
        }
    }

    fn extract(&mut self, prompt: String, response: String) -> LoopState {
        let code = extract_code(&response);
        self.attempts.push(GenerationAttempt {
            attempt: self.attempt,
            prompt,
            raw_response: response,
            extracted_code: code.clone(),
        });
        if code.is_empty() {
            debug!(attempt = self.attempt, "response held no fenced code");
            return LoopState::Evaluating(Evaluation::NoCode);
        }
        self.context.push_candidate(self.attempt, code.clone());
        LoopState::Persisting { code }
    }

    fn persist(&mut self, code: String) -> LoopState {
        match self.deps.store.write(&self.subject.name, &code) {
            Ok(stored) => {
                self.last_stored = Some(stored.clone());
                LoopState::Executing { stored }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not persist candidate");
                self.stopped(&err, FailureKind::IoFailure)
            }
        }
    }

    fn execute(&mut self, stored: StoredTest) -> LoopState {
        let timeout = match step_timeout(self.policy.test_timeout, self.policy.deadline) {
            Ok(timeout) => timeout,
            Err(err) => return self.stopped(&err, FailureKind::RunCancelled),
        };
        let request = TestRunRequest {
            path: &stored.path,
            timeout,
            cancel: self.deps.cancel,
        };
        match self.deps.executor.run(&request) {
            Ok(report) => LoopState::Evaluating(Evaluation::Executed { stored, report }),
            Err(err) => self.stopped(&err, FailureKind::Internal),
        }
    }

    fn evaluate(&mut self, evaluation: Evaluation) -> LoopState {
        let (kind, report) = match evaluation {
            Evaluation::Executed { stored, report } => match kind_for_status(report.status) {
                None => return LoopState::Succeeded { stored },
                Some(kind) => (kind, Some(report)),
            },
            Evaluation::NoCode => (FailureKind::ExtractionEmpty, None),
        };

        self.context.push_report(
            self.attempt,
            failure_report(self.attempt, kind, report.as_ref()),
        );
        let detail = failure_detail(kind, report.as_ref());

        if !kind.is_retryable() {
            return LoopState::GivingUp {
                kind,
                message: detail,
            };
        }
        if self.attempt >= self.policy.max_attempts || self.cut_off() {
            return LoopState::GivingUp {
                kind,
                message: format!("gave up after {} attempt(s): {detail}", self.attempt),
            };
        }
        LoopState::Retrying { kind }
    }

    /// The run was cancelled or its deadline has passed.
    fn cut_off(&self) -> bool {
        self.deps.cancel.is_cancelled() || deadline_reached(self.policy.deadline)
    }

    /// Terminal transition for an error raised by a collaborator.
    fn stopped(&self, err: &anyhow::Error, fallback: FailureKind) -> LoopState {
        LoopState::GivingUp {
            kind: failure_kind(err, fallback),
            message: format!("{err:#}"),
        }
    }

    fn succeed(self, stored: StoredTest) -> LoopOutcome {
        info!(attempt = self.attempt, path = %stored.path.display(), "test passed");
        let record = TestArtifactRecord {
            subject_name: self.subject.name.clone(),
            docstring: self.subject.docstring.clone(),
            source_text: self.subject.source_text.clone(),
            test_file_path: Some(stored.path),
            test_file_content: stored.content,
            final_status: FinalStatus::Success,
            message: format!("test passed on attempt {}", self.attempt),
            attempts: self.attempt,
            kind: None,
        };
        LoopOutcome {
            record,
            attempts: self.attempts,
        }
    }

    fn give_up(self, kind: FailureKind, message: String) -> LoopOutcome {
        // Step timeouts are clamped to the deadline, so a step that ran out
        // of time once the run was over was stopped by the run, not by itself.
        let (kind, message) = match kind {
            FailureKind::ExecutionTimeout | FailureKind::GeneratorFailure if self.cut_off() => (
                FailureKind::RunCancelled,
                format!("run deadline reached during attempt {}: {message}", self.attempt),
            ),
            _ => (kind, message),
        };
        warn!(attempt = self.attempt, kind = %kind, "giving up on subject");
        let (test_file_path, test_file_content) = match self.last_stored {
            Some(stored) => (Some(stored.path), stored.content),
            None => (None, String::new()),
        };
        let record = TestArtifactRecord {
            subject_name: self.subject.name.clone(),
            docstring: self.subject.docstring.clone(),
            source_text: self.subject.source_text.clone(),
            test_file_path,
            test_file_content,
            final_status: kind.final_status(),
            message,
            attempts: self.attempt,
            kind: Some(kind),
        };
        LoopOutcome {
            record,
            attempts: self.attempts,
        }
    }
}

fn kind_for_status(status: ExecStatus) -> Option<FailureKind> {
    match status {
        ExecStatus::Success => None,
        ExecStatus::Failure => Some(FailureKind::TestFailure),
        ExecStatus::Timeout => Some(FailureKind::ExecutionTimeout),
        ExecStatus::ProcessError => Some(FailureKind::ExecutionError),
    }
}

/// Human-readable description of the last failure, for the record message.
fn failure_detail(kind: FailureKind, report: Option<&ExecutionReport>) -> String {
    let Some(report) = report else {
        return "generator response contained no fenced code block".to_string();
    };
    if let Some(error) = &report.error {
        return format!("could not run test: {error}");
    }
    let output = match (report.stderr.trim(), report.stdout.trim()) {
        ("", "") => "no output",
        ("", stdout) => stdout,
        (stderr, _) => stderr,
    };
    match (kind, report.exit_code) {
        (FailureKind::ExecutionTimeout, _) => format!("test timed out: {output}"),
        (_, Some(code)) => format!("test exited with code {code}: {output}"),
        (_, None) => format!("test was terminated: {output}"),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::GuardianError;
    use crate::io::config::GuardianConfig;
    use crate::test_support::{
        ScriptedGenerator, ScriptedResponse, ScriptedTestExecutor, fenced, report_failed,
        report_passed, report_process_error, report_timed_out,
    };

    struct Harness {
        _temp: tempfile::TempDir,
        composer: PromptComposer,
        store: TestFileStore,
        cancel: CancelToken,
    }

    impl Harness {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let cfg = GuardianConfig::default();
            let store = TestFileStore::new(&temp.path().join("tests"), &cfg.test).expect("store");
            Self {
                _temp: temp,
                composer: PromptComposer::new(&cfg).expect("composer"),
                store,
                cancel: CancelToken::new(),
            }
        }

        fn run(
            &self,
            generator: &ScriptedGenerator,
            executor: &ScriptedTestExecutor,
            max_attempts: u32,
        ) -> LoopOutcome {
            let policy = RetryPolicy {
                max_attempts,
                generator_timeout: Duration::from_secs(5),
                test_timeout: Duration::from_secs(5),
                deadline: None,
            };
            self.run_with(generator, executor, &policy)
        }

        fn run_with<G, X>(&self, generator: &G, executor: &X, policy: &RetryPolicy) -> LoopOutcome
        where
            G: Generator + ?Sized,
            X: TestExecutor + ?Sized,
        {
            let deps = LoopDeps {
                composer: &self.composer,
                generator,
                store: &self.store,
                executor,
                cancel: &self.cancel,
            };
            run_retry_loop(&adder(), &deps, policy)
        }
    }

    /// Uses up whatever timeout it is given, like a process that never exits.
    struct Hangs;

    impl TestExecutor for Hangs {
        fn run(&self, request: &TestRunRequest<'_>) -> anyhow::Result<ExecutionReport> {
            thread::sleep(request.timeout);
            Ok(report_timed_out())
        }
    }

    impl Generator for Hangs {
        fn generate(&self, request: &GenerateRequest<'_>) -> anyhow::Result<String> {
            thread::sleep(request.timeout);
            Err(GuardianError::new(FailureKind::GeneratorFailure, "generator timed out").into())
        }
    }

    fn deadline_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            generator_timeout: Duration::from_secs(30),
            test_timeout: Duration::from_secs(30),
            deadline: Some(Instant::now() + Duration::from_millis(200)),
        }
    }

    fn adder() -> Subject {
        Subject::new("Adder", "adds two ints", "def add(a, b): return a + b")
    }

    #[test]
    fn first_passing_candidate_succeeds() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new()
            .script("Adder", vec![ScriptedResponse::Text(fenced("assert add(2, 3) == 5"))]);
        let executor = ScriptedTestExecutor::new(vec![report_passed()]);

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(outcome.record.final_status, FinalStatus::Success);
        assert_eq!(outcome.record.attempts, 1);
        assert_eq!(outcome.record.kind, None);
        let path = outcome.record.test_file_path.expect("path");
        assert_eq!(executor.runs(), vec![path.clone()]);
        assert!(path.ends_with("test_adder.py"));
        assert_eq!(outcome.record.test_file_content, "# Adder\n\nassert add(2, 3) == 5\n");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].extracted_code, "assert add(2, 3) == 5");
    }

    #[test]
    fn persistent_failure_stops_after_max_attempts() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("assert False")));
        let executor = ScriptedTestExecutor::with_fallback(report_failed("AssertionError: boom"));

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(generator.calls_for("Adder"), 3);
        assert_eq!(executor.run_count(), 3);
        assert_eq!(outcome.record.final_status, FinalStatus::Failure);
        assert_eq!(outcome.record.kind, Some(FailureKind::TestFailure));
        assert_eq!(outcome.record.attempts, 3);
        assert!(outcome.record.message.contains("AssertionError: boom"));
    }

    #[test]
    fn retry_prompts_carry_previous_failure() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new().script(
            "Adder",
            vec![
                ScriptedResponse::Text(fenced("assert add(2, 2) == 5")),
                ScriptedResponse::Text(fenced("assert add(2, 2) == 4")),
            ],
        );
        let executor = ScriptedTestExecutor::new(vec![
            report_failed("AssertionError: 4 != 5"),
            report_passed(),
        ]);

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(outcome.record.final_status, FinalStatus::Success);
        assert_eq!(outcome.record.attempts, 2);
        let prompts = generator.prompts_for("Adder");
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("Previous attempts"));
        assert!(prompts[1].contains("assert add(2, 2) == 5"));
        assert!(prompts[1].contains("AssertionError: 4 != 5"));
        assert!(outcome.record.test_file_content.contains("== 4"));
    }

    #[test]
    fn empty_extraction_is_retried_without_execution() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new().script(
            "Adder",
            vec![
                ScriptedResponse::Text("I cannot help with that.".to_string()),
                ScriptedResponse::Text(fenced("assert True")),
            ],
        );
        let executor = ScriptedTestExecutor::new(vec![report_passed()]);

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(outcome.record.final_status, FinalStatus::Success);
        assert_eq!(executor.run_count(), 1);
        assert!(generator.prompts_for("Adder")[1].contains("no code returned"));
    }

    #[test]
    fn empty_extraction_on_last_attempt_gives_up() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text("no code".to_string()));
        let executor = ScriptedTestExecutor::new(Vec::new());

        let outcome = harness.run(&generator, &executor, 2);

        assert_eq!(generator.calls_for("Adder"), 2);
        assert_eq!(executor.run_count(), 0);
        assert_eq!(outcome.record.kind, Some(FailureKind::ExtractionEmpty));
        assert_eq!(outcome.record.final_status, FinalStatus::Failure);
        assert_eq!(outcome.record.test_file_path, None);
    }

    #[test]
    fn generator_failure_is_not_retried() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new()
            .script("Adder", vec![ScriptedResponse::Fail("quota exceeded".to_string())]);
        let executor = ScriptedTestExecutor::new(Vec::new());

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(generator.calls_for("Adder"), 1);
        assert_eq!(outcome.record.kind, Some(FailureKind::GeneratorFailure));
        assert_eq!(outcome.record.final_status, FinalStatus::Failure);
        assert!(outcome.record.message.contains("quota exceeded"));
        assert!(outcome.attempts.is_empty());
    }

    #[test]
    fn timeouts_are_retried() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("sleep")));
        let executor = ScriptedTestExecutor::new(vec![report_timed_out(), report_passed()]);

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(outcome.record.final_status, FinalStatus::Success);
        assert_eq!(outcome.record.attempts, 2);
    }

    #[test]
    fn launch_errors_end_the_loop() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("assert True")));
        let executor =
            ScriptedTestExecutor::new(vec![report_process_error("interpreter not found")]);

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(generator.calls_for("Adder"), 1);
        assert_eq!(outcome.record.kind, Some(FailureKind::ExecutionError));
        assert!(outcome.record.message.contains("interpreter not found"));
        assert!(outcome.record.test_file_path.is_some());
    }

    #[test]
    fn cancelled_run_stops_before_generating() {
        let harness = Harness::new();
        harness.cancel.cancel();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("assert True")));
        let executor = ScriptedTestExecutor::new(Vec::new());

        let outcome = harness.run(&generator, &executor, 3);

        assert_eq!(generator.calls_for("Adder"), 0);
        assert_eq!(outcome.record.kind, Some(FailureKind::RunCancelled));
        assert_eq!(outcome.record.final_status, FinalStatus::Error);
    }

    #[test]
    fn expired_deadline_is_recorded_as_cancellation() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("assert True")));
        let executor = ScriptedTestExecutor::new(Vec::new());
        let deps = LoopDeps {
            composer: &harness.composer,
            generator: &generator,
            store: &harness.store,
            executor: &executor,
            cancel: &harness.cancel,
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            generator_timeout: Duration::from_secs(5),
            test_timeout: Duration::from_secs(5),
            deadline: Some(Instant::now() - Duration::from_millis(1)),
        };

        let outcome = run_retry_loop(&adder(), &deps, &policy);

        assert_eq!(generator.calls_for("Adder"), 0);
        assert_eq!(outcome.record.kind, Some(FailureKind::RunCancelled));
        assert!(outcome.record.message.contains("deadline"));
    }

    #[test]
    fn run_cut_short_by_deadline_is_cancelled_not_failed() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("sleep 30")));

        let outcome = harness.run_with(&generator, &Hangs, &deadline_policy(1));

        assert_eq!(outcome.record.kind, Some(FailureKind::RunCancelled));
        assert_eq!(outcome.record.final_status, FinalStatus::Error);
        assert!(outcome.record.message.contains("run deadline reached"));
    }

    #[test]
    fn run_cut_short_by_deadline_is_not_retried() {
        let harness = Harness::new();
        let generator =
            ScriptedGenerator::new().with_fallback(ScriptedResponse::Text(fenced("sleep 30")));

        let outcome = harness.run_with(&generator, &Hangs, &deadline_policy(3));

        assert_eq!(generator.calls_for("Adder"), 1);
        assert_eq!(outcome.record.kind, Some(FailureKind::RunCancelled));
        assert_eq!(outcome.record.final_status, FinalStatus::Error);
    }

    #[test]
    fn generator_cut_short_by_deadline_is_cancelled() {
        let harness = Harness::new();
        let executor = ScriptedTestExecutor::new(Vec::new());

        let outcome = harness.run_with(&Hangs, &executor, &deadline_policy(1));

        assert_eq!(executor.run_count(), 0);
        assert_eq!(outcome.record.kind, Some(FailureKind::RunCancelled));
        assert_eq!(outcome.record.final_status, FinalStatus::Error);
        assert!(outcome.record.message.contains("generator timed out"));
    }
}
