//! Scheduled workspace tasks.

use serde::{Deserialize, Serialize};

use crate::scheduler::cron::{parse_cron_expression, CronSchedule};
use crate::{AppError, Result};

/// Outcome of the most recent task run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CronResult {
    /// Command exited with status zero.
    Success,
    /// Command exited non-zero or could not start.
    Failure,
    /// Command exceeded its timeout and was killed.
    Timeout,
}

impl CronResult {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for an unknown result.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            other => Err(AppError::Db(format!("invalid cron result: {other}"))),
        }
    }
}

/// A scheduled task with its run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronTask {
    /// Task name, unique per workspace.
    pub name: String,
    /// Owning workspace.
    pub workspace_path: String,
    /// Raw cron expression.
    pub schedule: String,
    /// Whether the scheduler may run the task.
    pub enabled: bool,
    /// Shell command line.
    pub command: String,
    /// Session that receives a result summary (`architect` or a builder id).
    pub target: Option<String>,
    /// Run timeout in seconds.
    pub timeout_seconds: u64,
    /// Epoch seconds of the last run.
    pub last_run: Option<i64>,
    /// Outcome of the last run.
    pub last_result: Option<CronResult>,
    /// Truncated output of the last run.
    pub last_output: Option<String>,
}

impl CronTask {
    /// Parse the stored schedule.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cron` if the stored expression is malformed.
    pub fn parsed_schedule(&self) -> Result<CronSchedule> {
        parse_cron_expression(&self.schedule)
    }
}
