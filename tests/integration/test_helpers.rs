//! Shared setup for integration tests.
//!
//! Every environment gets its own temporary root holding the socket
//! directory and one activated workspace, an in-memory store, and a
//! registry that launches the real Shellper binary.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_tower::http::{AppState, SharedState};
use agent_tower::models::terminal::{CreateTerminalRequest, TerminalRecord, TerminalRole};
use agent_tower::models::workspace::KnownWorkspace;
use agent_tower::orchestrator::registry::TerminalRegistry;
use agent_tower::persistence::db::{self, Database};
use agent_tower::persistence::workspace_repo::WorkspaceRepo;
use agent_tower::scheduler::Scheduler;
use agent_tower::workspace::activate_workspace;
use agent_tower::TowerConfig;
use tempfile::TempDir;

/// Isolated orchestrator pieces.
pub struct TestEnv {
    pub root: TempDir,
    pub config: TowerConfig,
    pub db: Arc<Database>,
    pub registry: Arc<TerminalRegistry>,
    pub workspace: KnownWorkspace,
}

/// Configuration rooted at `root` using the built Shellper binary.
pub fn test_config(root: &Path) -> TowerConfig {
    let toml = format!(
        r#"
http_port = 0
socket_dir = '{sockets}'
shellper_bin = '{bin}'
probe_timeout_ms = 500
spawn_timeout_seconds = 10
transient_prefixes = []
"#,
        sockets = root.join("sockets").display(),
        bin = env!("CARGO_BIN_EXE_agent-tower-shellper"),
    );
    TowerConfig::from_toml_str(&toml).expect("valid test config")
}

/// Create a directory carrying the `.tower` marker.
pub fn make_project(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join(".tower")).expect("create project");
    dir
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut TowerConfig)) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(root.path());
        adjust(&mut config);
        let db = Arc::new(db::connect_memory().await.expect("db"));
        let registry = Arc::new(TerminalRegistry::new(Arc::clone(&db), &config).expect("registry"));

        let project = make_project(root.path(), "project");
        let workspace = activate_workspace(
            &WorkspaceRepo::new(Arc::clone(&db)),
            &config,
            &project.to_string_lossy(),
        )
        .await
        .expect("activate workspace");

        Self {
            root,
            config,
            db,
            registry,
            workspace,
        }
    }

    /// A second registry over the same store, as after a restart.
    pub fn restarted_registry(&self) -> Arc<TerminalRegistry> {
        Arc::new(TerminalRegistry::new(Arc::clone(&self.db), &self.config).expect("registry"))
    }

    pub fn socket_dir(&self) -> &Path {
        &self.config.socket_dir
    }

    pub fn request(&self, command: &str, args: &[&str], persistent: bool) -> CreateTerminalRequest {
        CreateTerminalRequest {
            command: command.into(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            workspace_path: Some(self.workspace.path.clone()),
            persistent,
            ..CreateTerminalRequest::default()
        }
    }

    pub async fn create(
        &self,
        command: &str,
        args: &[&str],
        persistent: bool,
        role: TerminalRole,
        role_id: Option<&str>,
    ) -> TerminalRecord {
        let mut request = self.request(command, args, persistent);
        request.role = role;
        request.role_id = role_id.map(str::to_owned);
        self.registry.create(request).await.expect("create terminal")
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            Arc::clone(&self.db),
            Arc::clone(&self.registry),
            self.config.transient_prefixes.clone(),
        ))
    }

    pub fn app_state(&self) -> SharedState {
        Arc::new(
            AppState::new(
                Arc::new(self.config.clone()),
                Arc::clone(&self.db),
                Arc::clone(&self.registry),
                self.scheduler(),
            )
            .expect("app state"),
        )
    }

    /// Delete every registered session so no Shellper outlives the test.
    pub async fn cleanup(&self) {
        for record in self.registry.list().await {
            let _ = self.registry.delete(&record.id).await;
        }
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
