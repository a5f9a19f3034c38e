//! Orchestrator configuration parsing, defaults, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{AppError, Result};

/// Environment variable overriding [`TowerConfig::socket_dir`].
pub const ENV_SOCKET_DIR: &str = "TOWER_SOCKET_DIR";
/// Environment variable overriding [`TowerConfig::sweep_interval_seconds`].
pub const ENV_SWEEP_INTERVAL: &str = "TOWER_SWEEP_INTERVAL_SECS";
/// Environment variable overriding the durable-store file.
pub const ENV_DB_PATH: &str = "TOWER_DB_PATH";

/// File name of the Shellper binary looked up next to the orchestrator.
const SHELLPER_BIN_NAME: &str = "agent-tower-shellper";

fn state_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(".agent-tower")
}

fn default_http_port() -> u16 {
    4100
}

fn default_socket_dir() -> PathBuf {
    state_root().join("sockets")
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_orphan_grace() -> u64 {
    60
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_spawn_timeout() -> u64 {
    10
}

fn default_scheduler_interval() -> u64 {
    30
}

fn default_port_range_start() -> u16 {
    4200
}

fn default_port_block_size() -> u16 {
    100
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_scrollback_bytes() -> usize {
    64 * 1024
}

fn default_project_markers() -> Vec<String> {
    vec![".tower".into()]
}

fn default_transient_prefixes() -> Vec<PathBuf> {
    vec![env::temp_dir()]
}

/// Orchestrator configuration parsed from `tower.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TowerConfig {
    /// Loopback port of the control API and reverse proxy.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory holding Shellper socket and log files.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Durable-store file; derived from the state root when absent.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Explicit Shellper binary; defaults to the sibling of the running executable.
    #[serde(default)]
    pub shellper_bin: Option<PathBuf>,
    /// Seconds between cleanup sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Age below which an unowned socket is left alone by the sweeper.
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_seconds: u64,
    /// Bound on a single socket liveness probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Bound on waiting for a Shellper readiness line.
    #[serde(default = "default_spawn_timeout")]
    pub spawn_timeout_seconds: u64,
    /// Seconds between scheduler passes.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_seconds: u64,
    /// First dashboard base port handed to an activated workspace.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    /// Ports reserved per workspace (dashboard, architect, builders).
    #[serde(default = "default_port_block_size")]
    pub port_block_size: u16,
    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Output retained by each Shellper for replay.
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: usize,
    /// File or directory names that mark a directory as a workspace.
    #[serde(default = "default_project_markers")]
    pub project_markers: Vec<String>,
    /// Path prefixes treated as transient (temp or test) locations.
    #[serde(default = "default_transient_prefixes")]
    pub transient_prefixes: Vec<PathBuf>,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            socket_dir: default_socket_dir(),
            db_path: None,
            shellper_bin: None,
            sweep_interval_seconds: default_sweep_interval(),
            orphan_grace_seconds: default_orphan_grace(),
            probe_timeout_ms: default_probe_timeout_ms(),
            spawn_timeout_seconds: default_spawn_timeout(),
            scheduler_interval_seconds: default_scheduler_interval(),
            port_range_start: default_port_range_start(),
            port_block_size: default_port_block_size(),
            max_body_bytes: default_max_body_bytes(),
            scrollback_bytes: default_scrollback_bytes(),
            project_markers: default_project_markers(),
            transient_prefixes: default_transient_prefixes(),
        }
    }
}

impl TowerConfig {
    /// Load configuration from an optional TOML file, then apply the process
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, is invalid
    /// TOML, an override is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TOWER_*` overrides using `lookup` as the environment source.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the sweep interval override is not a
    /// positive integer.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_SOCKET_DIR).filter(|v| !v.is_empty()) {
            info!(socket_dir = %dir, "socket directory overridden from environment");
            self.socket_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL).filter(|v| !v.is_empty()) {
            let seconds = raw.trim().parse::<u64>().map_err(|err| {
                AppError::Config(format!("{ENV_SWEEP_INTERVAL} must be an integer: {err}"))
            })?;
            self.sweep_interval_seconds = seconds;
        }

        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            info!(db_path = %path, "durable store overridden from environment");
            self.db_path = Some(PathBuf::from(path));
        }

        self.validate()
    }

    /// Resolved durable-store file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| state_root().join("tower.db"))
    }

    /// Resolve the Shellper binary to launch for persistent sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no explicit binary is configured and the
    /// running executable's location cannot be determined.
    pub fn shellper_bin(&self) -> Result<PathBuf> {
        if let Some(ref bin) = self.shellper_bin {
            return Ok(bin.clone());
        }
        let exe = env::current_exe()
            .map_err(|err| AppError::Config(format!("cannot locate current executable: {err}")))?;
        let dir = exe
            .parent()
            .ok_or_else(|| AppError::Config("current executable has no parent".into()))?;
        Ok(dir.join(format!("{SHELLPER_BIN_NAME}{}", env::consts::EXE_SUFFIX)))
    }

    /// Interval between cleanup sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Bound on one socket liveness probe.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Grace period for unowned sockets.
    #[must_use]
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_seconds)
    }

    /// Bound on waiting for a Shellper to report readiness.
    #[must_use]
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_seconds)
    }

    /// Interval between scheduler passes.
    #[must_use]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.scheduler_interval_seconds == 0 {
            return Err(AppError::Config(
                "scheduler_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_ms == 0 || self.spawn_timeout_seconds == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".into()));
        }
        // Dashboard, architect, and at least one builder.
        if self.port_block_size < 3 {
            return Err(AppError::Config(
                "port_block_size must be at least 3".into(),
            ));
        }
        if self.project_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(AppError::Config(
                "project_markers must name at least one marker".into(),
            ));
        }
        Ok(())
    }
}
