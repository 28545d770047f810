//! Subject manifest (`subjects.toml`).
//!
//! Each `[[subjects]]` entry names a code unit and provides its source inline
//! or by path. Describing entries never fails the run: unreadable sources turn
//! into [`Inspected::Failed`] and later into a `reflection_failure` record.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::types::{Inspected, Subject};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubjectEntry {
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// Relative paths resolve against the manifest's directory.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubjectManifest {
    #[serde(default)]
    pub subjects: Vec<SubjectEntry>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SubjectManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let mut manifest: SubjectManifest =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        manifest
            .validate()
            .with_context(|| format!("validate {}", path.display()))?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!(path = %path.display(), subjects = manifest.subjects.len(), "loaded subject manifest");
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.subjects {
            if entry.name.trim().is_empty() {
                return Err(anyhow!("subject name must not be empty"));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(anyhow!("duplicate subject name: {}", entry.name));
            }
            match (&entry.source, &entry.source_path) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(anyhow!(
                        "subject {} must set exactly one of source or source_path",
                        entry.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Describe every entry, in manifest order.
    pub fn inspect(&self) -> Vec<Inspected> {
        self.subjects
            .iter()
            .map(|entry| inspect_entry(entry, &self.base_dir))
            .collect()
    }
}

fn inspect_entry(entry: &SubjectEntry, base_dir: &Path) -> Inspected {
    let source_text = match (&entry.source, &entry.source_path) {
        (Some(source), _) => source.clone(),
        (None, Some(path)) => {
            let path = base_dir.join(path);
            match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    warn!(subject = %entry.name, path = %path.display(), err = %err, "could not read subject source");
                    return Inspected::Failed {
                        name: entry.name.clone(),
                        reason: format!("read {}: {err}", path.display()),
                    };
                }
            }
        }
        (None, None) => {
            return Inspected::Failed {
                name: entry.name.clone(),
                reason: "no source provided".to_string(),
            };
        }
    };

    Inspected::Ready(Subject::new(
        entry.name.clone(),
        entry.docstring.clone().unwrap_or_default(),
        source_text,
    ))
}
