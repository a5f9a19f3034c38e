//! Session orchestration modules.
//!
//! Covers the session registry, backing-process spawning, liveness probing,
//! startup reconciliation, and the periodic cleanup sweeper.

pub mod liveness;
pub mod reconcile;
pub mod registry;
pub mod spawner;
pub mod sweeper;
