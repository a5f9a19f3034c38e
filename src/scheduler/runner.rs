//! Executes one cron task command.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::models::cron::CronResult;

/// Output kept from one run.
pub const MAX_OUTPUT_BYTES: usize = 4096;

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Classified result.
    pub result: CronResult,
    /// Combined stdout and stderr, truncated.
    pub output: String,
}

impl RunOutcome {
    /// One-line summary for delivery to a session.
    #[must_use]
    pub fn summary(&self, task_name: &str) -> String {
        let first_line = self
            .output
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim();
        if first_line.is_empty() {
            format!("[cron {task_name}] {}", self.result.as_str())
        } else {
            format!("[cron {task_name}] {}: {first_line}", self.result.as_str())
        }
    }
}

/// Truncate to at most `max` bytes on a character boundary.
#[must_use]
pub fn truncate_output(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

/// Run `command` through `sh -c` in `cwd`, killing it after `timeout`.
pub async fn run_command(command: &str, cwd: &Path, timeout: Duration) -> RunOutcome {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) => {
            warn!(command, %err, "failed to start cron command");
            return RunOutcome {
                result: CronResult::Failure,
                output: truncate_output(&format!("failed to start: {err}"), MAX_OUTPUT_BYTES),
            };
        }
    };

    // Dropping the future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            let result = if output.status.success() {
                CronResult::Success
            } else {
                CronResult::Failure
            };
            info!(command, code = ?output.status.code(), "cron command finished");
            RunOutcome {
                result,
                output: truncate_output(&text, MAX_OUTPUT_BYTES),
            }
        }
        Ok(Err(err)) => RunOutcome {
            result: CronResult::Failure,
            output: truncate_output(&format!("wait failed: {err}"), MAX_OUTPUT_BYTES),
        },
        Err(_elapsed) => {
            warn!(command, ?timeout, "cron command timed out");
            RunOutcome {
                result: CronResult::Timeout,
                output: format!("timed out after {}s", timeout.as_secs()),
            }
        }
    }
}
