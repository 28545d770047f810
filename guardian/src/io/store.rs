//! Persistence of generated test candidates, one file per subject.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::sanitize::test_file_name;
use crate::error::{FailureKind, GuardianError};
use crate::io::config::TestConfig;

/// A candidate as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTest {
    pub path: PathBuf,
    pub content: String,
}

/// Writes candidates under a root directory as `test_<sanitized>.<ext>`.
///
/// Each write replaces the subject's previous candidate.
#[derive(Debug, Clone)]
pub struct TestFileStore {
    dir: PathBuf,
    extension: String,
    comment_prefix: String,
}

impl TestFileStore {
    /// Create a store rooted at `dir` (made absolute against the working directory).
    pub fn new(dir: &Path, layout: &TestConfig) -> Result<Self> {
        let dir = std::path::absolute(dir)
            .with_context(|| format!("resolve test directory {}", dir.display()))?;
        Ok(Self {
            dir,
            extension: layout.extension.trim_start_matches('.').to_string(),
            comment_prefix: layout.comment_prefix.clone(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, subject_name: &str) -> PathBuf {
        self.dir.join(test_file_name(subject_name, &self.extension))
    }

    /// File body: a header comment naming the subject, then the code.
    pub fn render(&self, subject_name: &str, code: &str) -> String {
        format!("{} {subject_name}\n\n{code}\n", self.comment_prefix)
    }

    /// Write the candidate, creating the directory if needed.
    ///
    /// Failures are classified as [`FailureKind::IoFailure`].
    pub fn write(&self, subject_name: &str, code: &str) -> Result<StoredTest> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            GuardianError::new(
                FailureKind::IoFailure,
                format!("create test directory {}: {err}", self.dir.display()),
            )
        })?;

        let path = self.path_for(subject_name);
        let content = self.render(subject_name, code);
        fs::write(&path, &content).map_err(|err| {
            GuardianError::new(
                FailureKind::IoFailure,
                format!("write test file {}: {err}", path.display()),
            )
        })?;

        debug!(path = %path.display(), bytes = content.len(), "test file written");
        Ok(StoredTest { path, content })
    }
}
