use std::time::Duration;

use agent_tower::models::terminal::{TerminalRecord, TerminalRole};
use agent_tower::orchestrator::liveness::{
    probe_record, Liveness, LivenessProbe, PidProbe, ProbeTarget, SessionProbe, SocketProbe,
};
use chrono::Utc;
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};

const TIMEOUT: Duration = Duration::from_millis(500);

fn record(persistent: bool, pid: u32, socket: Option<String>) -> TerminalRecord {
    TerminalRecord {
        id: "t1".into(),
        command: "sh".into(),
        args: Vec::new(),
        cwd: "/".into(),
        label: "sh".into(),
        role: TerminalRole::Shell,
        role_id: None,
        workspace_path: None,
        pid,
        persistent,
        socket_path: socket,
        shellper_pid: None,
        created_at: Utc::now(),
    }
}

#[test]
fn own_pid_is_alive() {
    assert_eq!(PidProbe::check(std::process::id()), Liveness::Alive);
}

#[test]
fn pid_zero_is_dead() {
    assert_eq!(PidProbe::check(0), Liveness::Dead);
}

#[tokio::test]
async fn reaped_child_is_dead() {
    let mut child = tokio::process::Command::new("true")
        .spawn()
        .expect("spawn true");
    let pid = child.id().expect("pid");
    child.wait().await.expect("wait");
    assert_eq!(PidProbe::check(pid), Liveness::Dead);
}

#[tokio::test]
async fn missing_socket_is_dead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = ProbeTarget::Socket(dir.path().join("absent.sock"));
    assert_eq!(SocketProbe::new(TIMEOUT).probe(&target).await, Liveness::Dead);
}

#[tokio::test]
async fn plain_file_socket_is_dead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stale.sock");
    std::fs::write(&path, b"").expect("write");
    let target = ProbeTarget::Socket(path);
    assert_eq!(SocketProbe::new(TIMEOUT).probe(&target).await, Liveness::Dead);
}

#[tokio::test]
async fn listening_socket_is_alive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("live.sock");
    let name = path
        .as_path()
        .to_fs_name::<GenericFilePath>()
        .expect("socket name");
    let _listener = ListenerOptions::new()
        .name(name)
        .create_tokio()
        .expect("bind");

    let target = ProbeTarget::Socket(path);
    assert_eq!(SocketProbe::new(TIMEOUT).probe(&target).await, Liveness::Alive);
}

#[tokio::test]
async fn records_dispatch_on_persistence() {
    let probe = SessionProbe::new(TIMEOUT);

    let direct = record(false, std::process::id(), None);
    assert_eq!(probe_record(&probe, &direct).await, Liveness::Alive);

    // A persistent record is judged by its socket, never its pid.
    let dir = tempfile::tempdir().expect("tempdir");
    let gone = dir.path().join("gone.sock").to_string_lossy().into_owned();
    let persistent = record(true, std::process::id(), Some(gone));
    assert_eq!(probe_record(&probe, &persistent).await, Liveness::Dead);

    let socketless = record(true, std::process::id(), None);
    assert_eq!(probe_record(&probe, &socketless).await, Liveness::Dead);
}

#[test]
fn only_alive_counts_as_alive() {
    assert!(Liveness::Alive.is_alive());
    assert!(!Liveness::Dead.is_alive());
    assert!(!Liveness::Indeterminate.is_alive());
}
