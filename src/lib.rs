#![forbid(unsafe_code)]

//! `agent-tower`: local orchestrator for AI-agent terminal sessions.
//!
//! Sessions run either as direct children or behind a detached Shellper
//! process that outlives the orchestrator. On restart the orchestrator
//! reconciles its durable records with the Shellper sockets it finds.

pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod proxy;
pub mod scheduler;
pub mod shellper;
pub mod workspace;

pub use config::TowerConfig;
pub use errors::{AppError, Result};
