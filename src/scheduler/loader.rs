//! Loads cron task definitions from a workspace.
//!
//! Each `<workspace>/.tower/cron/*.toml` file describes one task:
//!
//! ```toml
//! name = "nightly-tests"        # defaults to the file stem
//! schedule = "0 3 * * *"
//! command = "cargo test --workspace"
//! enabled = true                # default
//! target = "architect"          # optional
//! timeout_seconds = 300         # default
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use super::cron::parse_cron_expression;
use crate::{AppError, Result};

/// Directory holding task files, relative to the workspace root.
pub const CRON_DIR: &str = ".tower/cron";

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// One task definition as written on disk.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CronTaskDefinition {
    /// Task name, unique per workspace.
    #[serde(default)]
    pub name: String,
    /// Cron expression.
    pub schedule: String,
    /// Shell command line.
    pub command: String,
    /// Whether the task may run.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Session that receives a one-line result summary.
    #[serde(default)]
    pub target: Option<String>,
    /// Run timeout.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl CronTaskDefinition {
    /// Parse one definition. `fallback_name` is used when `name` is omitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cron` for malformed TOML, a bad schedule, an empty
    /// command, an invalid name, or a zero timeout.
    pub fn from_toml_str(raw: &str, fallback_name: &str) -> Result<Self> {
        let mut definition: Self =
            toml::from_str(raw).map_err(|err| AppError::Cron(format!("invalid task file: {err}")))?;
        if definition.name.trim().is_empty() {
            fallback_name.clone_into(&mut definition.name);
        }
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_task_name(&self.name) {
            return Err(AppError::Cron(format!(
                "invalid task name '{}'; use letters, digits, '-', '_' or '.'",
                self.name
            )));
        }
        parse_cron_expression(&self.schedule)?;
        if self.command.trim().is_empty() {
            return Err(AppError::Cron(format!("task '{}' has an empty command", self.name)));
        }
        if self.timeout_seconds == 0 {
            return Err(AppError::Cron(format!(
                "task '{}' timeout_seconds must be greater than zero",
                self.name
            )));
        }
        if let Some(ref target) = self.target {
            if target.trim().is_empty() {
                return Err(AppError::Cron(format!("task '{}' has an empty target", self.name)));
            }
        }
        Ok(())
    }
}

/// Task names appear in URL paths.
#[must_use]
pub fn is_valid_task_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Task files of a workspace, sorted by path.
#[must_use]
pub fn definition_files(workspace: &Path) -> Vec<PathBuf> {
    let dir = workspace.join(CRON_DIR);
    let pattern = format!(
        "{}/*.toml",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let Ok(paths) = glob::glob(&pattern) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = paths.filter_map(std::result::Result::ok).collect();
    files.sort();
    files
}

/// Load every valid definition of a workspace. Invalid files and duplicate
/// names are logged and skipped; the first file wins on duplicates.
#[must_use]
pub fn load_definitions(workspace: &Path) -> Vec<CronTaskDefinition> {
    let mut definitions: Vec<CronTaskDefinition> = Vec::new();
    for file in definition_files(workspace) {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = std::fs::read_to_string(&file)
            .map_err(AppError::from)
            .and_then(|raw| CronTaskDefinition::from_toml_str(&raw, &stem));
        match parsed {
            Ok(definition) => {
                if definitions.iter().any(|d| d.name == definition.name) {
                    warn!(file = %file.display(), name = %definition.name, "duplicate cron task name, skipping");
                } else {
                    definitions.push(definition);
                }
            }
            Err(err) => {
                warn!(file = %file.display(), %err, "invalid cron task definition, skipping");
            }
        }
    }
    definitions
}
