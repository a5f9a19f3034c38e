use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_tower::persistence::db;
use agent_tower::persistence::workspace_repo::WorkspaceRepo;
use agent_tower::workspace::{
    activate_workspace, canonicalize_workspace, find_workspace, is_excluded_workspace,
    recent_workspaces,
};
use agent_tower::{AppError, TowerConfig};

fn markers() -> Vec<String> {
    vec![".tower".into()]
}

fn project(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join(".tower")).expect("mkdir");
    dir
}

#[test]
fn canonicalize_requires_marker() {
    let root = tempfile::tempdir().expect("tempdir");
    let bare = root.path().join("bare");
    std::fs::create_dir_all(&bare).expect("mkdir");
    let err = canonicalize_workspace(&bare.to_string_lossy(), &markers()).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let ok = project(root.path(), "app");
    let canonical = canonicalize_workspace(&ok.to_string_lossy(), &markers()).expect("valid");
    assert_eq!(canonical, ok.canonicalize().expect("canonical"));
}

#[test]
fn canonicalize_rejects_relative_and_missing() {
    assert!(canonicalize_workspace("relative/app", &markers()).is_err());
    assert!(canonicalize_workspace("/definitely/not/here/app", &markers()).is_err());
}

#[test]
fn transient_and_missing_paths_are_excluded() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = project(root.path(), "app");
    let prefixes = vec![root.path().to_path_buf()];
    assert!(is_excluded_workspace(&app, &prefixes));
    assert!(!is_excluded_workspace(&app, &[]));
    assert!(is_excluded_workspace(&root.path().join("gone"), &[]));
}

#[tokio::test]
async fn activation_allocates_distinct_port_blocks() {
    let root = tempfile::tempdir().expect("tempdir");
    let a = project(root.path(), "a");
    let b = project(root.path(), "b");
    let repo = WorkspaceRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    let config = TowerConfig::default();

    let wa = activate_workspace(&repo, &config, &a.to_string_lossy())
        .await
        .expect("activate a");
    let wb = activate_workspace(&repo, &config, &b.to_string_lossy())
        .await
        .expect("activate b");
    assert_eq!(wa.base_port, config.port_range_start);
    assert_eq!(wb.base_port, config.port_range_start + config.port_block_size);

    // Reactivation keeps the block.
    repo.deactivate(&wa.path).await.expect("deactivate");
    let again = activate_workspace(&repo, &config, &a.to_string_lossy())
        .await
        .expect("reactivate");
    assert!(again.active);
    assert_eq!(again.base_port, wa.base_port);
}

#[tokio::test]
async fn find_and_list_workspaces() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = project(root.path(), "app");
    let repo = WorkspaceRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    activate_workspace(&repo, &TowerConfig::default(), &app.to_string_lossy())
        .await
        .expect("activate");

    let found = find_workspace(&repo, &app.to_string_lossy()).await.expect("find");
    assert!(found.active);
    assert!(matches!(
        find_workspace(&repo, "/nowhere").await,
        Err(AppError::NotFound(_))
    ));

    assert_eq!(recent_workspaces(&repo, &[]).await.expect("list").len(), 1);
    let prefixes = vec![root.path().to_path_buf()];
    assert!(recent_workspaces(&repo, &prefixes).await.expect("list").is_empty());
}
