//! Test generation guardian.
//!
//! Reads a subject manifest, drives a generate/run/repair loop per subject
//! and reports one record per subject as JSON or as a plain summary.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use guardian::core::sanitize::find_collisions;
use guardian::core::types::Inspected;
use guardian::exit_codes;
use guardian::io::config::{
    ConfigOverrides, DEFAULT_CONFIG_FILE, GuardianConfig, apply_overrides, load_config,
    write_config,
};
use guardian::io::generator::CommandGenerator;
use guardian::io::run_log::write_run_log;
use guardian::io::store::TestFileStore;
use guardian::io::subjects::SubjectManifest;
use guardian::io::test_exec::ProcessTestExecutor;
use guardian::logging;
use guardian::orchestrator::Orchestrator;

const DEFAULT_MANIFEST_FILE: &str = "subjects.toml";

#[derive(Parser)]
#[command(
    name = "guardian",
    version,
    about = "Generate, run and repair unit tests with a text generator"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug-level diagnostics on stderr (unless RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and verify a test for every subject in the manifest.
    Run {
        /// Subject manifest.
        #[arg(long, default_value = DEFAULT_MANIFEST_FILE)]
        manifest: PathBuf,

        /// Write the run log JSON to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print one line per subject instead of JSON.
        #[arg(long)]
        summary: bool,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate config and manifest and show where each test would be written.
    Check {
        /// Subject manifest.
        #[arg(long, default_value = DEFAULT_MANIFEST_FILE)]
        manifest: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Directory for generated test files.
    #[arg(long = "dir")]
    dir_path: Option<PathBuf>,

    /// Package name used in prompts.
    #[arg(long = "package")]
    package_name: Option<String>,

    /// Module import path used in prompts.
    #[arg(long = "module")]
    module_name: Option<String>,

    /// Generations per subject before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Concurrent workers (0 = one per subject, capped).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Overall run deadline in seconds (0 = none).
    #[arg(long = "timeout-secs")]
    run_timeout_secs: Option<u64>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dir_path: self.dir_path.clone(),
            package_name: self.package_name.clone(),
            module_name: self.module_name.clone(),
            max_attempts: self.max_attempts,
            concurrency: self.concurrency,
            run_timeout_secs: self.run_timeout_secs,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Command::Run {
            manifest,
            output,
            summary,
            overrides,
        } => {
            let cfg = resolve_config(&cli.config, overrides)?;
            logging::init(cli.verbose, cfg.log_file.as_deref())?;
            cmd_run(cfg, manifest, output.as_deref(), *summary)
        }
        Command::Init { force } => {
            logging::init(cli.verbose, None)?;
            cmd_init(&cli.config, *force)
        }
        Command::Check {
            manifest,
            overrides,
        } => {
            let cfg = resolve_config(&cli.config, overrides)?;
            logging::init(cli.verbose, cfg.log_file.as_deref())?;
            cmd_check(&cfg, manifest)
        }
    }
}

fn resolve_config(path: &Path, overrides: &OverrideArgs) -> Result<GuardianConfig> {
    let cfg = load_config(path)?;
    apply_overrides(cfg, &overrides.to_overrides())
}

fn cmd_run(
    cfg: GuardianConfig,
    manifest_path: &Path,
    output: Option<&Path>,
    summary: bool,
) -> Result<i32> {
    let subjects = SubjectManifest::load(manifest_path)?.inspect();
    let generator = CommandGenerator::new(cfg.generator.command.clone(), cfg.output_limit_bytes)?;
    let executor = ProcessTestExecutor::new(cfg.test.command.clone(), cfg.output_limit_bytes);
    let orchestrator = Orchestrator::new(cfg, generator, executor)?;

    let log = orchestrator.run_all(subjects);

    if let Some(path) = output {
        write_run_log(path, &log)?;
    }
    if summary {
        print!("{}", log.summary());
    } else if output.is_none() {
        println!("{}", log.to_json_pretty()?);
    }

    Ok(if log.all_succeeded() {
        exit_codes::OK
    } else {
        exit_codes::FAILURES
    })
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GuardianConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(cfg: &GuardianConfig, manifest_path: &Path) -> Result<i32> {
    let subjects = SubjectManifest::load(manifest_path)?.inspect();
    let store = TestFileStore::new(&cfg.dir_path, &cfg.test)?;
    let names: Vec<&str> = subjects
        .iter()
        .filter_map(|inspected| match inspected {
            Inspected::Ready(subject) => Some(subject.name.as_str()),
            Inspected::Failed { .. } => None,
        })
        .collect();
    let mut collisions = find_collisions(&names).into_iter();

    let mut problems = 0usize;
    for inspected in &subjects {
        let subject = match inspected {
            Inspected::Failed { name, reason } => {
                problems += 1;
                println!("{name} -> cannot describe: {reason}");
                continue;
            }
            Inspected::Ready(subject) => subject,
        };
        let path = store.path_for(&subject.name);
        match collisions.next().flatten() {
            Some(owner) => {
                problems += 1;
                println!("{} -> collides with {owner} at {}", subject.name, path.display());
            }
            None => println!("{} -> {}", subject.name, path.display()),
        }
    }

    if problems > 0 {
        eprintln!("{problems} subject(s) cannot run");
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["guardian", "run"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        match cli.command {
            Command::Run {
                manifest,
                output,
                summary,
                overrides,
            } => {
                assert_eq!(manifest, PathBuf::from(DEFAULT_MANIFEST_FILE));
                assert_eq!(output, None);
                assert!(!summary);
                assert_eq!(overrides.to_overrides(), ConfigOverrides::default());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "guardian",
            "run",
            "--dir",
            "out/tests",
            "--max-attempts",
            "5",
            "--concurrency",
            "2",
            "--timeout-secs",
            "60",
            "-v",
        ]);
        assert!(cli.verbose);
        let Command::Run { overrides, .. } = cli.command else {
            panic!("expected run");
        };
        let overrides = overrides.to_overrides();
        assert_eq!(overrides.dir_path, Some(PathBuf::from("out/tests")));
        assert_eq!(overrides.max_attempts, Some(5));
        assert_eq!(overrides.concurrency, Some(2));
        assert_eq!(overrides.run_timeout_secs, Some(60));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["guardian", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }
}
