//! Startup reconciliation against real Shellpers.

use std::sync::Arc;

use agent_tower::models::builder::{Builder, BuilderStatus, BuilderType};
use agent_tower::models::terminal::{TerminalRecord, TerminalRole};
use agent_tower::orchestrator::reconcile::reconcile;
use agent_tower::persistence::builder_repo::BuilderRepo;
use agent_tower::persistence::terminal_repo::TerminalRepo;
use agent_tower::shellper::socket_path_for;
use chrono::Utc;

use super::test_helpers::TestEnv;

fn stale_record(env: &TestEnv, id: &str, persistent: bool) -> TerminalRecord {
    TerminalRecord {
        id: id.into(),
        command: "sleep".into(),
        args: vec!["30".into()],
        cwd: env.workspace.path.clone(),
        label: "stale".into(),
        role: TerminalRole::Shell,
        role_id: None,
        workspace_path: Some(env.workspace.path.clone()),
        pid: 999_999,
        persistent,
        socket_path: persistent.then(|| {
            socket_path_for(env.socket_dir(), id)
                .to_string_lossy()
                .into_owned()
        }),
        shellper_pid: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn surviving_shellper_is_readmitted_under_new_id() {
    let env = TestEnv::new().await;
    let original = env
        .create("sleep", &["30"], true, TerminalRole::Builder, Some("b1"))
        .await;
    BuilderRepo::new(Arc::clone(&env.db))
        .upsert(&Builder {
            id: "b1".into(),
            workspace_path: env.workspace.path.clone(),
            name: "b1".into(),
            port: None,
            status: BuilderStatus::Implementing,
            phase: None,
            worktree: format!("{}/.worktrees/b1", env.workspace.path),
            branch: None,
            terminal_id: Some(original.id.clone()),
            cli_session_id: None,
            builder_type: BuilderType::Task,
            issue_number: None,
            gate: None,
        })
        .await
        .expect("upsert builder");

    // Simulated restart: a fresh registry over the same store.
    let restarted = env.restarted_registry();
    let report = reconcile(&restarted, Arc::clone(&env.db), &env.config.transient_prefixes)
        .await
        .expect("reconcile");

    assert_eq!(report.readmitted.len(), 1);
    let (old_id, new_id) = report.readmitted[0].clone();
    assert_eq!(old_id, original.id);
    assert_ne!(new_id, original.id);
    assert!(report.orphan_sockets_removed.is_empty());

    let admitted = restarted.get_live(&new_id).await.expect("live after restart");
    assert_eq!(admitted.pid, original.pid);
    assert_eq!(admitted.socket_path, original.socket_path);

    let repo = TerminalRepo::new(Arc::clone(&env.db));
    assert!(repo.get(&original.id).await.expect("get").is_none());
    assert!(repo.get(&new_id).await.expect("get").is_some());
    let builder = BuilderRepo::new(Arc::clone(&env.db))
        .get(&env.workspace.path, "b1")
        .await
        .expect("get builder")
        .expect("builder");
    assert_eq!(builder.terminal_id.as_deref(), Some(new_id.as_str()));

    restarted.delete(&new_id).await.expect("cleanup");
}

#[tokio::test]
async fn dead_and_non_persistent_rows_are_dropped() {
    let env = TestEnv::new().await;
    let repo = TerminalRepo::new(Arc::clone(&env.db));
    repo.insert(&stale_record(&env, "dead", true)).await.expect("insert");
    repo.insert(&stale_record(&env, "direct", false)).await.expect("insert");

    let mut excluded = stale_record(&env, "excluded", true);
    excluded.workspace_path = Some("/no/longer/exists".into());
    repo.insert(&excluded).await.expect("insert");

    let report = reconcile(&env.registry, Arc::clone(&env.db), &env.config.transient_prefixes)
        .await
        .expect("reconcile");

    assert_eq!(report.dropped_dead, vec!["dead".to_owned()]);
    assert_eq!(report.dropped_non_persistent, vec!["direct".to_owned()]);
    assert_eq!(report.dropped_excluded, vec!["excluded".to_owned()]);
    assert!(report.readmitted.is_empty());
    assert!(repo.list_all().await.expect("list").is_empty());
    assert!(env.registry.list().await.is_empty());
}

#[tokio::test]
async fn orphan_sockets_are_removed() {
    let env = TestEnv::new().await;
    std::fs::create_dir_all(env.socket_dir()).expect("mkdir");
    let orphan = socket_path_for(env.socket_dir(), "orphan");
    std::fs::write(&orphan, b"").expect("write");
    let log = orphan.with_extension("log");
    std::fs::write(&log, b"old log").expect("write");

    let report = reconcile(&env.registry, Arc::clone(&env.db), &env.config.transient_prefixes)
        .await
        .expect("reconcile");

    assert_eq!(report.orphan_sockets_removed, vec![orphan.clone()]);
    assert!(!orphan.exists());
    assert!(!log.exists());
}

#[tokio::test]
async fn live_orphan_shellper_is_terminated() {
    let env = TestEnv::new().await;
    let record = env
        .create("sleep", &["30"], true, TerminalRole::Shell, None)
        .await;
    // Lose the row but keep the Shellper running.
    TerminalRepo::new(Arc::clone(&env.db))
        .delete(&record.id)
        .await
        .expect("delete row");

    let restarted = env.restarted_registry();
    let report = reconcile(&restarted, Arc::clone(&env.db), &env.config.transient_prefixes)
        .await
        .expect("reconcile");

    let socket = record.socket().expect("socket").to_path_buf();
    assert_eq!(report.orphan_sockets_removed, vec![socket.clone()]);
    assert!(!socket.exists());
    assert!(restarted.list().await.is_empty());
}
