//! Session create, input, and delete through the registry.

use std::time::Duration;

use agent_tower::models::terminal::TerminalRole;
use agent_tower::orchestrator::liveness::{Liveness, PidProbe};
use agent_tower::persistence::terminal_repo::TerminalRepo;
use agent_tower::shellper::client::ShellperClient;
use agent_tower::AppError;

use super::test_helpers::{wait_until, TestEnv};

const IPC: Duration = Duration::from_secs(2);

#[tokio::test]
async fn direct_session_lifecycle() {
    let env = TestEnv::new().await;
    let record = env
        .create("sleep", &["30"], false, TerminalRole::Shell, None)
        .await;

    assert!(!record.persistent);
    assert!(record.socket_path.is_none());
    assert_eq!(record.cwd, env.workspace.path, "cwd defaults to the workspace");
    assert_eq!(record.label, "sleep");
    assert_eq!(PidProbe::check(record.pid), Liveness::Alive);
    assert!(env.registry.get_live(&record.id).await.is_some());

    let repo = TerminalRepo::new(env.db.clone());
    assert!(repo.get(&record.id).await.expect("get").is_some());

    assert!(env.registry.delete(&record.id).await.expect("delete"));
    assert!(env.registry.get(&record.id).await.is_none());
    assert!(repo.get(&record.id).await.expect("get").is_none());
    assert_eq!(PidProbe::check(record.pid), Liveness::Dead);

    // Deleting again is a no-op.
    assert!(!env.registry.delete(&record.id).await.expect("second delete"));
}

#[tokio::test]
async fn persistent_session_is_served_by_shellper() {
    let env = TestEnv::new().await;
    let record = env.create("cat", &[], true, TerminalRole::Shell, None).await;

    let socket = record.socket().expect("socket path").to_path_buf();
    assert!(socket.starts_with(env.socket_dir()));
    assert!(socket.exists());
    let shellper_pid = record.shellper_pid.expect("shellper pid");
    assert_ne!(shellper_pid, record.pid);

    let mut client = ShellperClient::connect(&socket, IPC).await.expect("connect");
    let status = client.status().await.expect("status");
    assert_eq!(status.session_id, record.id);
    assert_eq!(status.pid, record.pid);
    assert!(status.running);

    env.registry
        .send_input(&record.id, "hello tower\n")
        .await
        .expect("send input");
    let echoed = wait_until(Duration::from_secs(5), || {
        let socket = socket.clone();
        async move {
            let Ok(mut client) = ShellperClient::connect(&socket, IPC).await else {
                return false;
            };
            client
                .replay()
                .await
                .is_ok_and(|text| text.contains("hello tower"))
        }
    })
    .await;
    assert!(echoed, "cat output should reach the scrollback");

    env.registry.delete(&record.id).await.expect("delete");
    assert!(!socket.exists());
    let pid = record.pid;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            PidProbe::check(pid) == Liveness::Dead
        })
        .await,
        "child should exit with its shellper"
    );
}

#[tokio::test]
async fn inactive_workspace_is_rejected() {
    let env = TestEnv::new().await;
    let mut request = env.request("sleep", &["30"], false);
    request.workspace_path = Some("/no/such/workspace".into());
    let err = env.registry.create(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    assert!(env.registry.list().await.is_empty());
}

#[tokio::test]
async fn unknown_command_fails_without_registering() {
    let env = TestEnv::new().await;

    let direct = env.request("/definitely/not/a/binary", &[], false);
    let err = env.registry.create(direct).await.unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");

    let persistent = env.request("/definitely/not/a/binary", &[], true);
    let err = env.registry.create(persistent).await.unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");

    assert!(env.registry.list().await.is_empty());
    let rows = TerminalRepo::new(env.db.clone()).list_all().await.expect("list");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn workspace_deactivation_removes_its_sessions() {
    let env = TestEnv::new().await;
    env.create("sleep", &["30"], false, TerminalRole::Shell, None)
        .await;
    env.create("sleep", &["30"], true, TerminalRole::Architect, None)
        .await;

    let removed = env
        .registry
        .delete_workspace(&env.workspace.path)
        .await
        .expect("delete workspace");
    assert_eq!(removed, 2);
    assert!(env.registry.list().await.is_empty());
}

#[tokio::test]
async fn list_is_ordered_by_creation() {
    let env = TestEnv::new().await;
    let first = env
        .create("sleep", &["30"], false, TerminalRole::Shell, None)
        .await;
    let second = env
        .create("sleep", &["30"], false, TerminalRole::Architect, None)
        .await;

    let ids: Vec<String> = env.registry.list().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

    let live = env.registry.live_terminals(Some(&env.workspace.path)).await;
    assert_eq!(live.len(), 2);
    env.cleanup().await;
}

#[cfg(unix)]
#[tokio::test]
async fn helper_with_malformed_ready_line_is_killed() {
    use std::os::unix::fs::PermissionsExt;

    let scratch = tempfile::tempdir().expect("tempdir");
    let pid_file = scratch.path().join("helper.pid");
    let script = scratch.path().join("bad-shellper.sh");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho $$ > '{}'\necho 'not json'\nexec sleep 30\n",
            pid_file.display()
        ),
    )
    .expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let env = TestEnv::with_config(|c| c.shellper_bin = Some(script.clone())).await;
    let err = env
        .registry
        .create(env.request("sleep", &["30"], true))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
    assert!(env.registry.list().await.is_empty());

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    let gone = wait_until(Duration::from_secs(5), move || async move {
        PidProbe::check(pid) == Liveness::Dead
    })
    .await;
    assert!(gone, "helper {pid} still running");
}

#[cfg(unix)]
#[tokio::test]
async fn shellper_exits_cleanly_on_interrupt() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let env = TestEnv::new().await;
    let record = env
        .create("sleep", &["30"], true, TerminalRole::Shell, None)
        .await;
    let socket = record.socket().expect("socket").to_path_buf();
    let helper = record.shellper_pid.expect("shellper pid");
    let child = record.pid;

    kill(Pid::from_raw(i32::try_from(helper).expect("pid")), Signal::SIGINT).expect("signal");

    let stopped = wait_until(Duration::from_secs(5), move || {
        let socket = socket.clone();
        async move { !socket.exists() && PidProbe::check(child) == Liveness::Dead }
    })
    .await;
    assert!(stopped, "socket left behind or child orphaned after SIGINT");
    assert!(env.registry.get_live(&record.id).await.is_none());
    env.cleanup().await;
}
