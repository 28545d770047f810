//! Runs one retry loop per subject on a bounded pool of worker threads.
//!
//! Workers pull subject indices from a shared queue and send finished records
//! over a channel to a single collector, which owns the [`RunLog`]. A panic in
//! one worker becomes an `error` record for its subject and never reaches the
//! siblings. When the run deadline passes the collector cancels the shared
//! token; in-flight child processes are killed and unstarted subjects are
//! recorded as cancelled.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::attempt::{LoopDeps, RetryPolicy, run_retry_loop};
use crate::core::cancel::CancelToken;
use crate::core::sanitize::{find_collisions, test_file_name};
use crate::core::types::{Inspected, Subject, TestArtifactRecord};
use crate::error::FailureKind;
use crate::io::config::GuardianConfig;
use crate::io::generator::Generator;
use crate::io::prompt::PromptComposer;
use crate::io::run_log::RunLog;
use crate::io::store::TestFileStore;
use crate::io::test_exec::TestExecutor;

pub struct Orchestrator<G, X> {
    cfg: GuardianConfig,
    composer: PromptComposer,
    store: TestFileStore,
    generator: G,
    executor: X,
    cancel: CancelToken,
}

impl<G, X> Orchestrator<G, X>
where
    G: Generator,
    X: TestExecutor,
{
    pub fn new(cfg: GuardianConfig, generator: G, executor: X) -> Result<Self> {
        cfg.validate()?;
        let composer = PromptComposer::new(&cfg)?;
        let store = TestFileStore::new(&cfg.dir_path, &cfg.test)?;
        Ok(Self {
            cfg,
            composer,
            store,
            generator,
            executor,
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the run when cancelled. Completed records are kept.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Run every subject to a terminal record. Records keep input order.
    #[instrument(skip_all, fields(subjects = subjects.len()))]
    pub fn run_all(&self, subjects: Vec<Inspected>) -> RunLog {
        let started = Instant::now();
        let mut log = RunLog::for_config(&self.cfg);
        let deadline = self.cfg.run_timeout().map(|timeout| started + timeout);
        let mut slots: Vec<Option<TestArtifactRecord>> = vec![None; subjects.len()];
        let mut queue = VecDeque::new();

        let ready: Vec<(usize, &Subject)> = subjects
            .iter()
            .enumerate()
            .filter_map(|(index, inspected)| match inspected {
                Inspected::Ready(subject) => Some((index, subject)),
                Inspected::Failed { name, reason } => {
                    warn!(subject = %name, reason = %reason, "subject could not be described");
                    slots[index] = Some(TestArtifactRecord::reflection_failure(name, reason));
                    None
                }
            })
            .collect();
        let names: Vec<&str> = ready.iter().map(|(_, subject)| subject.name.as_str()).collect();
        for ((index, subject), owner) in ready.iter().zip(find_collisions(&names)) {
            match owner {
                Some(owner) => {
                    let file_name = test_file_name(&subject.name, &self.cfg.test.extension);
                    warn!(subject = %subject.name, owner, file_name = %file_name, "test file name collision");
                    slots[*index] = Some(TestArtifactRecord::without_candidate(
                        subject,
                        FailureKind::IoFailure,
                        format!("file name collision with {owner}: both map to {file_name}"),
                    ));
                }
                None => queue.push_back(*index),
            }
        }

        if !queue.is_empty() {
            let workers = self.cfg.worker_count(queue.len());
            info!(jobs = queue.len(), workers, "starting workers");
            self.run_workers(&subjects, queue, workers, deadline, &mut slots);
        }

        for (slot, inspected) in slots.into_iter().zip(&subjects) {
            let record = slot.unwrap_or_else(|| cancelled_before_start(inspected));
            log.append(record);
        }
        let counts = log.counts();
        info!(
            success = counts.success,
            failure = counts.failure,
            error = counts.error,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "run finished"
        );
        log
    }

    fn run_workers(
        &self,
        subjects: &[Inspected],
        queue: VecDeque<usize>,
        workers: usize,
        deadline: Option<Instant>,
        slots: &mut [Option<TestArtifactRecord>],
    ) {
        let queue = Mutex::new(queue);
        let policy = RetryPolicy {
            max_attempts: self.cfg.max_attempts,
            generator_timeout: self.cfg.generator_timeout(),
            test_timeout: self.cfg.test_timeout(),
            deadline,
        };
        let (tx, rx) = mpsc::channel::<(usize, TestArtifactRecord)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let policy = &policy;
                scope.spawn(move || {
                    loop {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let Some(index) = next_job(queue) else {
                            break;
                        };
                        let Inspected::Ready(subject) = &subjects[index] else {
                            continue;
                        };
                        let record = self.run_guarded(subject, policy);
                        if tx.send((index, record)).is_err() {
                            break;
                        }
                    }
                    debug!(worker, "worker exiting");
                });
            }
            drop(tx);

            let mut deadline = deadline;
            loop {
                let received = match deadline {
                    Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => {
                            warn!("run deadline reached, cancelling remaining subjects");
                            self.cancel.cancel();
                            deadline = None;
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => None,
                    },
                    None => rx.recv().ok(),
                };
                let Some((index, record)) = received else {
                    break;
                };
                slots[index] = Some(record);
            }
        });
    }

    /// Drive one subject, turning a panic into an `error` record.
    fn run_guarded(&self, subject: &Subject, policy: &RetryPolicy) -> TestArtifactRecord {
        let deps = LoopDeps {
            composer: &self.composer,
            generator: &self.generator,
            store: &self.store,
            executor: &self.executor,
            cancel: &self.cancel,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| run_retry_loop(subject, &deps, policy))) {
            Ok(outcome) => outcome.record,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(subject = %subject.name, panic = %message, "worker panicked");
                TestArtifactRecord::without_candidate(
                    subject,
                    FailureKind::Internal,
                    format!("worker panicked: {message}"),
                )
            }
        }
    }
}

fn next_job(queue: &Mutex<VecDeque<usize>>) -> Option<usize> {
    // A poisoned queue only means another worker panicked mid-pop.
    let mut guard = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.pop_front()
}

fn cancelled_before_start(inspected: &Inspected) -> TestArtifactRecord {
    let subject = match inspected {
        Inspected::Ready(subject) => subject.clone(),
        Inspected::Failed { name, .. } => Subject::new(name.clone(), "", ""),
    };
    TestArtifactRecord::without_candidate(
        &subject,
        FailureKind::RunCancelled,
        "run cancelled before start",
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
