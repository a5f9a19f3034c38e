//! Cron scheduling against real workspaces and sessions.

use std::path::Path;
use std::time::{Duration, Instant};

use agent_tower::models::cron::CronResult;
use agent_tower::models::terminal::TerminalRole;
use agent_tower::persistence::workspace_repo::WorkspaceRepo;
use agent_tower::scheduler::loader::CRON_DIR;
use agent_tower::scheduler::spawn_scheduler;
use agent_tower::shellper::client::ShellperClient;
use agent_tower::workspace::activate_workspace;
use agent_tower::AppError;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{make_project, wait_until, TestEnv};

fn write_task(workspace: &str, file: &str, body: &str) {
    let dir = Path::new(workspace).join(CRON_DIR);
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join(file), body).expect("write");
}

#[tokio::test]
async fn due_task_runs_once_per_minute() {
    let env = TestEnv::new().await;
    write_task(
        &env.workspace.path,
        "tick.toml",
        "schedule = \"* * * * *\"\ncommand = \"echo ticked\"\n",
    );
    let scheduler = env.scheduler();
    let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 5).unwrap();

    let runs = scheduler.tick(now).await.expect("tick");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "tick");
    assert_eq!(runs[0].result, CronResult::Success);
    assert_eq!(runs[0].output.trim(), "ticked");
    assert!(!runs[0].delivered);

    let again = scheduler
        .tick(now + chrono::Duration::seconds(20))
        .await
        .expect("tick");
    assert!(again.is_empty(), "same minute must not re-run");

    let task = scheduler
        .resolve_task("tick", Some(&env.workspace.path))
        .await
        .expect("task");
    assert_eq!(task.last_run, Some(now.timestamp()));
    assert_eq!(task.last_result, Some(CronResult::Success));
}

#[tokio::test]
async fn disabled_task_skips_tick_but_runs_on_demand() {
    let env = TestEnv::new().await;
    write_task(
        &env.workspace.path,
        "manual.toml",
        "schedule = \"* * * * *\"\ncommand = \"exit 2\"\nenabled = false\n",
    );
    let scheduler = env.scheduler();

    assert!(scheduler.tick(Utc::now()).await.expect("tick").is_empty());

    let run = scheduler
        .run_task_now("manual", None)
        .await
        .expect("run now");
    assert_eq!(run.result, CronResult::Failure);

    let enabled = scheduler
        .set_enabled("manual", None, true)
        .await
        .expect("enable");
    assert!(enabled.enabled);
}

#[tokio::test]
async fn startup_tasks_run_once_at_start() {
    let env = TestEnv::new().await;
    write_task(
        &env.workspace.path,
        "boot.toml",
        "schedule = \"@startup\"\ncommand = \"echo booted\"\n",
    );
    let scheduler = env.scheduler();
    let runs = scheduler.run_startup_tasks().await.expect("startup");
    assert_eq!(runs.len(), 1);
    assert!(scheduler.tick(Utc::now()).await.expect("tick").is_empty());
}

#[tokio::test]
async fn ambiguous_task_name_needs_workspace() {
    let env = TestEnv::new().await;
    let other = make_project(env.root.path(), "other");
    let other = activate_workspace(
        &WorkspaceRepo::new(env.db.clone()),
        &env.config,
        &other.to_string_lossy(),
    )
    .await
    .expect("activate other");

    for ws in [&env.workspace.path, &other.path] {
        write_task(ws, "lint.toml", "schedule = \"@hourly\"\ncommand = \"true\"\n");
    }
    let scheduler = env.scheduler();
    scheduler.sync_all().await.expect("sync");

    let err = scheduler.resolve_task("lint", None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    let task = scheduler
        .resolve_task("lint", Some(&other.path))
        .await
        .expect("disambiguated");
    assert_eq!(task.workspace_path, other.path);

    assert!(matches!(
        scheduler.resolve_task("missing", None).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn removed_definition_drops_task() {
    let env = TestEnv::new().await;
    write_task(&env.workspace.path, "gone.toml", "schedule = \"@hourly\"\ncommand = \"true\"\n");
    let scheduler = env.scheduler();
    assert_eq!(
        scheduler
            .sync_workspace(&env.workspace.path)
            .await
            .expect("sync")
            .len(),
        1
    );

    std::fs::remove_file(Path::new(&env.workspace.path).join(CRON_DIR).join("gone.toml"))
        .expect("remove");
    assert!(scheduler
        .sync_workspace(&env.workspace.path)
        .await
        .expect("sync")
        .is_empty());
    assert!(scheduler
        .repo()
        .list(Some(&env.workspace.path))
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn summary_is_delivered_to_architect() {
    let env = TestEnv::new().await;
    let architect = env
        .create("cat", &[], true, TerminalRole::Architect, None)
        .await;
    write_task(
        &env.workspace.path,
        "report.toml",
        "schedule = \"@hourly\"\ncommand = \"echo all green\"\ntarget = \"architect\"\n",
    );
    let scheduler = env.scheduler();
    scheduler.sync_all().await.expect("sync");

    let run = scheduler
        .run_task_now("report", Some(&env.workspace.path))
        .await
        .expect("run");
    assert!(run.delivered);

    let socket = architect.socket().expect("socket").to_path_buf();
    let delivered = wait_until(Duration::from_secs(5), || {
        let socket = socket.clone();
        async move {
            let Ok(mut client) = ShellperClient::connect(&socket, Duration::from_secs(2)).await
            else {
                return false;
            };
            client
                .replay()
                .await
                .is_ok_and(|text| text.contains("[cron report] success: all green"))
        }
    })
    .await;
    assert!(delivered);
    env.cleanup().await;
}

#[tokio::test]
async fn scheduler_task_stops_on_cancel_during_slow_run() {
    let env = TestEnv::new().await;
    write_task(
        &env.workspace.path,
        "slow.toml",
        "schedule = \"* * * * *\"\ncommand = \"sleep 8\"\n",
    );
    let cancel = CancellationToken::new();
    let handle = spawn_scheduler(env.scheduler(), Duration::from_millis(50), cancel.clone());
    tokio::time::sleep(Duration::from_millis(800)).await;

    let started = Instant::now();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler exits while a run is in flight")
        .expect("no panic");
    assert!(started.elapsed() < Duration::from_secs(2));
}
