//! Pending device registrations keyed by a single-use nonce.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of an unconsumed nonce.
pub const NONCE_TTL_SECONDS: i64 = 5 * 60;

/// A registration waiting for its nonce to be redeemed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    /// Single-use token.
    pub nonce: String,
    /// Device name being registered.
    pub name: String,
    /// Server the device registers with.
    pub server_url: String,
    /// Issue time.
    pub created_at: DateTime<Utc>,
}

impl PendingRegistration {
    /// Issue a new registration with a random nonce.
    #[must_use]
    pub fn new(name: String, server_url: String) -> Self {
        Self {
            nonce: Uuid::new_v4().to_string(),
            name,
            server_url,
            created_at: Utc::now(),
        }
    }

    /// Whether the nonce has outlived its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= Duration::seconds(NONCE_TTL_SECONDS)
    }
}
