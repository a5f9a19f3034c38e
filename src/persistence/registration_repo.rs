//! Pending registration (nonce) repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::registration::{PendingRegistration, NONCE_TTL_SECONDS};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for single-use registration nonces.
#[derive(Clone)]
pub struct RegistrationRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct RegistrationRow {
    nonce: String,
    name: String,
    server_url: String,
    created_at: String,
}

impl RegistrationRow {
    fn into_registration(self) -> Result<PendingRegistration> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(PendingRegistration {
            nonce: self.nonce,
            name: self.name,
            server_url: self.server_url,
            created_at,
        })
    }
}

impl RegistrationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue and store a new nonce.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, name: &str, server_url: &str) -> Result<PendingRegistration> {
        let registration = PendingRegistration::new(name.to_owned(), server_url.to_owned());
        self.insert(&registration).await?;
        Ok(registration)
    }

    /// Store an already-built registration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, registration: &PendingRegistration) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_registration (nonce, name, server_url, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&registration.nonce)
        .bind(&registration.name)
        .bind(&registration.server_url)
        .bind(registration.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Redeem a nonce at `now`. The row is removed in the same transaction,
    /// so a nonce is returned at most once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the nonce is unknown, already used,
    /// or expired; `AppError::Db` if the transaction fails.
    pub async fn consume(&self, nonce: &str, now: DateTime<Utc>) -> Result<PendingRegistration> {
        let mut tx = self.db.begin().await?;

        let row: Option<RegistrationRow> = sqlx::query_as(
            "SELECT nonce, name, server_url, created_at FROM pending_registration WHERE nonce = ?1",
        )
        .bind(nonce)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(AppError::NotFound("registration nonce not found".into()));
        };

        sqlx::query("DELETE FROM pending_registration WHERE nonce = ?1")
            .bind(nonce)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let registration = row.into_registration()?;
        if registration.is_expired(now) {
            return Err(AppError::NotFound("registration nonce not found".into()));
        }
        Ok(registration)
    }

    /// Delete nonces older than the TTL at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = (now - Duration::seconds(NONCE_TTL_SECONDS)).to_rfc3339();
        let result = sqlx::query("DELETE FROM pending_registration WHERE created_at <= ?1")
            .bind(&cutoff)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
