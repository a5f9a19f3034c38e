//! Domain model module declarations.

pub mod builder;
pub mod cron;
pub mod file_tab;
pub mod registration;
pub mod terminal;
pub mod workspace;
