use std::sync::Arc;

use agent_tower::models::registration::{PendingRegistration, NONCE_TTL_SECONDS};
use agent_tower::persistence::db;
use agent_tower::persistence::registration_repo::RegistrationRepo;
use agent_tower::AppError;
use chrono::{Duration, Utc};

#[tokio::test]
async fn nonce_is_consumed_once() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let repo = RegistrationRepo::new(db);

    let issued = repo
        .create("laptop", "https://tower.example")
        .await
        .expect("create");
    let redeemed = repo
        .consume(&issued.nonce, Utc::now())
        .await
        .expect("first redeem");
    assert_eq!(redeemed.name, "laptop");
    assert_eq!(redeemed.server_url, "https://tower.example");

    let err = repo.consume(&issued.nonce, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn expired_nonce_is_rejected_and_removed() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let repo = RegistrationRepo::new(db);

    let mut stale = PendingRegistration::new("phone".into(), "https://tower.example".into());
    stale.created_at = Utc::now() - Duration::seconds(NONCE_TTL_SECONDS + 1);
    repo.insert(&stale).await.expect("insert");

    let err = repo.consume(&stale.nonce, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(repo.consume(&stale.nonce, Utc::now()).await.is_err());
}

#[tokio::test]
async fn purge_removes_only_expired() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let repo = RegistrationRepo::new(db);

    let fresh = repo.create("fresh", "https://a").await.expect("create");
    let mut stale = PendingRegistration::new("stale".into(), "https://b".into());
    stale.created_at = Utc::now() - Duration::seconds(NONCE_TTL_SECONDS * 2);
    repo.insert(&stale).await.expect("insert");

    assert_eq!(repo.purge_expired(Utc::now()).await.expect("purge"), 1);
    assert!(repo.consume(&fresh.nonce, Utc::now()).await.is_ok());
}

#[test]
fn expiry_boundary() {
    let issued = PendingRegistration::new("n".into(), "u".into());
    let just_before = issued.created_at + Duration::seconds(NONCE_TTL_SECONDS - 1);
    let at_ttl = issued.created_at + Duration::seconds(NONCE_TTL_SECONDS);
    assert!(!issued.is_expired(just_before));
    assert!(issued.is_expired(at_ttl));
}
