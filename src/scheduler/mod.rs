//! Cron-style task scheduling for workspaces.

pub mod cron;
pub mod loader;
pub mod runner;
pub mod service;

pub use service::{spawn_scheduler, Scheduler, TaskRun};
