//! Periodic cleanup of dead sessions, orphan sockets, and nonces.

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use agent_tower::models::registration::{PendingRegistration, NONCE_TTL_SECONDS};
use agent_tower::models::terminal::TerminalRole;
use agent_tower::orchestrator::liveness::{Liveness, PidProbe};
use agent_tower::orchestrator::sweeper::{spawn_sweeper, sweep_once};
use agent_tower::persistence::registration_repo::RegistrationRepo;
use agent_tower::persistence::terminal_repo::TerminalRepo;
use agent_tower::shellper::client::terminate_at;
use agent_tower::shellper::launcher::{LaunchRequest, ShellperLauncher};
use agent_tower::shellper::socket_path_for;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{wait_until, TestEnv};

#[tokio::test]
async fn shellper_killed_out_of_band_is_reaped() {
    let env = TestEnv::new().await;
    let record = env
        .create("sleep", &["30"], true, TerminalRole::Shell, None)
        .await;
    let socket = record.socket().expect("socket").to_path_buf();

    terminate_at(&socket, Duration::from_secs(2))
        .await
        .expect("terminate");
    let gone = socket.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            let gone = gone.clone();
            async move { !gone.exists() }
        })
        .await
    );

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert_eq!(report.probed, 1);
    assert_eq!(report.reaped, vec![record.id.clone()]);
    assert!(env.registry.get(&record.id).await.is_none());
    assert!(TerminalRepo::new(Arc::clone(&env.db))
        .get(&record.id)
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn exited_direct_child_is_reaped_and_live_one_kept() {
    let env = TestEnv::new().await;
    let short = env.create("true", &[], false, TerminalRole::Shell, None).await;
    let long = env
        .create("sleep", &["30"], false, TerminalRole::Shell, None)
        .await;

    let registry = Arc::clone(&env.registry);
    let short_id = short.id.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            let registry = Arc::clone(&registry);
            let short_id = short_id.clone();
            async move { registry.get_live(&short_id).await.is_none() }
        })
        .await
    );

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert_eq!(report.reaped, vec![short.id.clone()]);
    assert!(env.registry.get(&long.id).await.is_some());
    env.cleanup().await;
}

#[tokio::test]
async fn orphan_sockets_respect_grace_period() {
    let env = TestEnv::new().await;
    std::fs::create_dir_all(env.socket_dir()).expect("mkdir");

    let fresh = socket_path_for(env.socket_dir(), "fresh");
    std::fs::write(&fresh, b"").expect("write");
    let old = socket_path_for(env.socket_dir(), "old");
    std::fs::write(&old, b"").expect("write");
    File::options()
        .write(true)
        .open(&old)
        .expect("open")
        .set_modified(SystemTime::now() - Duration::from_secs(600))
        .expect("backdate");

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert_eq!(report.orphan_sockets_removed, vec![old.clone()]);
    assert!(!old.exists());
    assert!(fresh.exists());
}

#[tokio::test]
async fn listening_orphan_is_terminated_before_unlink() {
    let env = TestEnv::with_config(|c| c.orphan_grace_seconds = 0).await;
    let launcher = ShellperLauncher::from_config(&env.config).expect("launcher");
    let cwd = std::path::PathBuf::from(&env.workspace.path);
    let launched = launcher
        .launch(&LaunchRequest {
            session_id: "stray",
            command: "sleep",
            args: &["30".to_owned()],
            cwd: &cwd,
            label: "stray",
        })
        .await
        .expect("launch");
    assert_eq!(PidProbe::check(launched.pid), Liveness::Alive);

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert_eq!(report.orphan_sockets_removed, vec![launched.socket_path.clone()]);
    assert!(!launched.socket_path.exists());

    let (child, helper) = (launched.pid, launched.shellper_pid);
    let stopped = wait_until(Duration::from_secs(5), move || async move {
        PidProbe::check(child) == Liveness::Dead && PidProbe::check(helper) == Liveness::Dead
    })
    .await;
    assert!(stopped, "orphan shellper or its child kept running");
}

#[tokio::test]
async fn owned_sockets_are_never_removed() {
    let env = TestEnv::new().await;
    let record = env
        .create("sleep", &["30"], true, TerminalRole::Shell, None)
        .await;
    let socket = record.socket().expect("socket").to_path_buf();
    File::options()
        .write(true)
        .open(&socket)
        .and_then(|f| f.set_modified(SystemTime::now() - Duration::from_secs(600)))
        .ok();

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert!(report.reaped.is_empty());
    assert!(report.orphan_sockets_removed.is_empty());
    assert!(socket.exists());
    env.cleanup().await;
}

#[tokio::test]
async fn expired_nonces_are_purged() {
    let env = TestEnv::new().await;
    let repo = RegistrationRepo::new(Arc::clone(&env.db));
    let mut stale = PendingRegistration::new("old".into(), "https://a".into());
    stale.created_at -= chrono::Duration::seconds(NONCE_TTL_SECONDS + 5);
    repo.insert(&stale).await.expect("insert");

    let report = sweep_once(&env.registry, &env.db).await.expect("sweep");
    assert_eq!(report.nonces_purged, 1);
}

#[tokio::test]
async fn sweeper_task_stops_on_cancel() {
    let env = TestEnv::new().await;
    let cancel = CancellationToken::new();
    let handle = spawn_sweeper(
        Arc::clone(&env.registry),
        Arc::clone(&env.db),
        Duration::from_millis(50),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sweeper exits")
        .expect("no panic");
}
