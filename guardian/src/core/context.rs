//! Accumulated prompt context for one subject's retry loop.
//!
//! The context is append-only and owned by a single loop. Each attempt adds the
//! candidate it produced and, when it failed, a failure report. Later prompts
//! re-render a window of these entries after the instructional template.

use tracing::debug;

use crate::core::types::ExecutionReport;
use crate::error::FailureKind;

/// Which prior attempts are replayed into a retry prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextWindow {
    /// Every prior candidate and failure report.
    Full,
    /// Only the most recent `n` attempts (at least one).
    Latest(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEntry {
    /// The first prompt sent for the subject.
    Prompt(String),
    Candidate { attempt: u32, code: String },
    Report { attempt: u32, text: String },
}

impl ContextEntry {
    fn attempt(&self) -> Option<u32> {
        match self {
            ContextEntry::Prompt(_) => None,
            ContextEntry::Candidate { attempt, .. } | ContextEntry::Report { attempt, .. } => {
                Some(*attempt)
            }
        }
    }

    fn render(&self) -> String {
        match self {
            ContextEntry::Prompt(text) => text.clone(),
            ContextEntry::Candidate { attempt, code } => {
                format!("### Attempt {attempt}: generated test\n\n```\n{code}\n```")
            }
            ContextEntry::Report { text, .. } => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    entries: Vec<ContextEntry>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// True until the first candidate has been recorded.
    pub fn is_fresh(&self) -> bool {
        self.entries.iter().all(|entry| entry.attempt().is_none())
    }

    pub fn push_prompt(&mut self, prompt: impl Into<String>) {
        self.entries.push(ContextEntry::Prompt(prompt.into()));
    }

    pub fn push_candidate(&mut self, attempt: u32, code: impl Into<String>) {
        self.entries.push(ContextEntry::Candidate {
            attempt,
            code: code.into(),
        });
    }

    pub fn push_report(&mut self, attempt: u32, text: impl Into<String>) {
        self.entries.push(ContextEntry::Report {
            attempt,
            text: text.into(),
        });
    }

    /// Render the attempt history selected by `window`, within `budget_bytes`.
    ///
    /// The initial prompt is not replayed; composers put the template in front.
    /// Oldest attempts are dropped first. The newest attempt is always kept,
    /// truncated if it alone exceeds the budget.
    pub fn render(&self, window: ContextWindow, budget_bytes: usize) -> String {
        let mut attempts = self.attempt_blocks();
        if let ContextWindow::Latest(n) = window {
            let keep = n.max(1);
            if attempts.len() > keep {
                attempts.drain(..attempts.len() - keep);
            }
        }

        let total = |blocks: &[(u32, String)]| -> usize {
            blocks.iter().map(|(_, text)| text.len() + 2).sum()
        };
        while attempts.len() > 1 && total(&attempts) > budget_bytes {
            let (attempt, dropped) = attempts.remove(0);
            debug!(
                attempt,
                bytes_dropped = dropped.len(),
                "dropped attempt from prompt context"
            );
        }

        let mut rendered = attempts
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n");
        if rendered.len() > budget_bytes {
            let before_len = rendered.len();
            truncate_to_char_boundary(&mut rendered, budget_bytes.saturating_sub(12));
            rendered.push_str("\n[truncated]");
            debug!(
                before_len,
                after_len = rendered.len(),
                "truncated prompt context"
            );
        }
        rendered
    }

    /// Entries grouped per attempt, oldest first.
    fn attempt_blocks(&self) -> Vec<(u32, String)> {
        let mut blocks: Vec<(u32, String)> = Vec::new();
        for entry in &self.entries {
            let Some(attempt) = entry.attempt() else {
                continue;
            };
            match blocks.last_mut() {
                Some((last, text)) if *last == attempt => {
                    text.push_str("\n\n");
                    text.push_str(&entry.render());
                }
                _ => blocks.push((attempt, entry.render())),
            }
        }
        blocks
    }
}

/// Failure report appended to the context after a failed attempt.
pub fn failure_report(attempt: u32, kind: FailureKind, report: Option<&ExecutionReport>) -> String {
    let mut buf = format!("### Attempt {attempt}: {}\n\n", headline(kind, report));
    match report {
        Some(report) => {
            if let Some(error) = &report.error {
                buf.push_str(&format!("launch error: {error}\n\n"));
            }
            buf.push_str("stderr:\n```\n");
            buf.push_str(report.stderr.trim_end());
            buf.push_str("\n```\n");
            if !report.stdout.trim().is_empty() {
                buf.push_str("\nstdout:\n```\n");
                buf.push_str(report.stdout.trim_end());
                buf.push_str("\n```\n");
            }
        }
        None => {
            buf.push_str("The response contained no fenced code block. Reply with the complete test file inside a single fenced block.\n");
        }
    }
    buf
}

fn headline(kind: FailureKind, report: Option<&ExecutionReport>) -> String {
    match (kind, report) {
        (FailureKind::ExtractionEmpty, _) => "no code returned".to_string(),
        (_, Some(report)) => match report.exit_code {
            Some(code) => format!("test {} (exit code {code})", report.status.as_str()),
            None => format!("test {}", report.status.as_str()),
        },
        (kind, None) => kind.to_string(),
    }
}

fn truncate_to_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
