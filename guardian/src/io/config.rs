//! Guardian configuration stored in `guardian.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::context::ContextWindow;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "guardian.toml";

/// Guardian configuration (TOML).
///
/// Missing fields default to the values of [`GuardianConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardianConfig {
    /// Directory receiving the generated test files.
    pub dir_path: PathBuf,

    /// Package the tests are written for (template substitution).
    pub package_name: String,

    /// Import path of the module under test (template substitution).
    pub module_name: String,

    /// Generations per subject before giving up. Must be >= 1.
    pub max_attempts: u32,

    /// Worker count. `0` means one worker per subject, capped by `max_workers`.
    pub concurrency: usize,

    /// Upper bound on concurrent workers.
    pub max_workers: usize,

    /// Overall run deadline in seconds. `0` disables the deadline.
    pub run_timeout_secs: u64,

    /// Prompt size budget in bytes. Older attempts are dropped first.
    pub prompt_budget_bytes: usize,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    /// Optional file receiving a copy of the diagnostic log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    pub context: ContextConfig,
    pub generator: GeneratorConfig,
    pub test: TestConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    Full,
    Latest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Replay every prior attempt (`full`) or only the most recent ones (`latest`).
    pub window: WindowMode,
    /// Attempts kept by the `latest` window.
    pub latest_attempts: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window: WindowMode::Full,
            latest_attempts: 1,
        }
    }
}

impl ContextConfig {
    pub fn window(&self) -> ContextWindow {
        match self.window {
            WindowMode::Full => ContextWindow::Full,
            WindowMode::Latest => ContextWindow::Latest(self.latest_attempts),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and prints the response on stdout.
    pub command: Vec<String>,
    /// Per-attempt wall-clock budget for one generation.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Entry point; the test file path is appended as the last argument.
    pub command: Vec<String>,
    /// Test file extension without the dot.
    pub extension: String,
    /// Line comment marker for the header naming the subject.
    pub comment_prefix: String,
    /// Per-execution wall-clock budget.
    pub timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string()],
            extension: "py".to_string(),
            comment_prefix: "#".to_string(),
            timeout_secs: 2 * 60,
        }
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("tests/memory"),
            package_name: "swarms".to_string(),
            module_name: "swarms.memory".to_string(),
            max_attempts: 3,
            concurrency: 0,
            max_workers: 16,
            run_timeout_secs: 0,
            prompt_budget_bytes: 200_000,
            output_limit_bytes: 100_000,
            log_file: None,
            context: ContextConfig::default(),
            generator: GeneratorConfig::default(),
            test: TestConfig::default(),
        }
    }
}

impl GuardianConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.dir_path.as_os_str().is_empty() {
            return Err(anyhow!("dir_path must not be empty"));
        }
        if self.context.latest_attempts == 0 {
            return Err(anyhow!("context.latest_attempts must be > 0"));
        }
        validate_command("generator.command", &self.generator.command)?;
        validate_command("test.command", &self.test.command)?;
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        let extension = self.test.extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(anyhow!("test.extension must be non-empty and alphanumeric"));
        }
        Ok(())
    }

    /// Number of workers for a run over `subject_count` subjects.
    pub fn worker_count(&self, subject_count: usize) -> usize {
        let wanted = if self.concurrency == 0 {
            subject_count
        } else {
            self.concurrency
        };
        wanted.min(self.max_workers).min(subject_count).max(1)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test.timeout_secs)
    }
}

fn validate_command(label: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{label} must be a non-empty array"));
    }
    Ok(())
}

/// Command-line overrides applied on top of the file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub dir_path: Option<PathBuf>,
    pub package_name: Option<String>,
    pub module_name: Option<String>,
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
    pub run_timeout_secs: Option<u64>,
}

/// Apply overrides to a base configuration and re-validate.
pub fn apply_overrides(
    mut base: GuardianConfig,
    overrides: &ConfigOverrides,
) -> Result<GuardianConfig> {
    if let Some(dir_path) = &overrides.dir_path {
        base.dir_path = dir_path.clone();
    }
    if let Some(package_name) = &overrides.package_name {
        base.package_name = package_name.clone();
    }
    if let Some(module_name) = &overrides.module_name {
        base.module_name = module_name.clone();
    }
    if let Some(max_attempts) = overrides.max_attempts {
        base.max_attempts = max_attempts;
    }
    if let Some(concurrency) = overrides.concurrency {
        base.concurrency = concurrency;
    }
    if let Some(run_timeout_secs) = overrides.run_timeout_secs {
        base.run_timeout_secs = run_timeout_secs;
    }
    base.validate()?;
    Ok(base)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GuardianConfig::default()`.
pub fn load_config(path: &Path) -> Result<GuardianConfig> {
    if !path.exists() {
        let cfg = GuardianConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GuardianConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GuardianConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
