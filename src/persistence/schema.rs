//! `SQLite` schema bootstrap logic.
//!
//! Table definitions use `CREATE TABLE IF NOT EXISTS` and run on every
//! orchestrator startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS terminal_session (
    id              TEXT PRIMARY KEY NOT NULL,
    command         TEXT NOT NULL,
    args            TEXT NOT NULL,
    cwd             TEXT NOT NULL,
    label           TEXT NOT NULL,
    role            TEXT NOT NULL CHECK(role IN ('architect','builder','shell')),
    role_id         TEXT,
    workspace_path  TEXT,
    pid             INTEGER NOT NULL,
    persistent      INTEGER NOT NULL DEFAULT 0,
    socket_path     TEXT,
    shellper_pid    INTEGER,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS builder (
    id              TEXT NOT NULL,
    workspace_path  TEXT NOT NULL,
    name            TEXT NOT NULL,
    port            INTEGER,
    status          TEXT NOT NULL CHECK(status IN ('spawning','implementing','blocked','pr','complete')),
    phase           TEXT,
    worktree        TEXT NOT NULL,
    branch          TEXT,
    terminal_id     TEXT,
    cli_session_id  TEXT,
    builder_type    TEXT NOT NULL CHECK(builder_type IN ('spec','bugfix','task')),
    issue_number    INTEGER,
    gate_name       TEXT,
    gate_requested_at TEXT,
    PRIMARY KEY (workspace_path, id)
);

CREATE TABLE IF NOT EXISTS file_tab (
    id              TEXT PRIMARY KEY NOT NULL,
    workspace_path  TEXT NOT NULL,
    file_path       TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cron_task (
    workspace_path  TEXT NOT NULL,
    name            TEXT NOT NULL,
    schedule        TEXT NOT NULL,
    enabled         INTEGER NOT NULL DEFAULT 1,
    enabled_override INTEGER,
    command         TEXT NOT NULL,
    target          TEXT,
    timeout_seconds INTEGER NOT NULL,
    last_run        INTEGER,
    last_result     TEXT CHECK(last_result IS NULL OR last_result IN ('success','failure','timeout')),
    last_output     TEXT,
    PRIMARY KEY (workspace_path, name)
);

CREATE TABLE IF NOT EXISTS pending_registration (
    nonce           TEXT PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL,
    server_url      TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS known_workspace (
    path            TEXT PRIMARY KEY NOT NULL,
    active          INTEGER NOT NULL DEFAULT 0,
    base_port       INTEGER NOT NULL UNIQUE,
    last_activated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_terminal_workspace ON terminal_session(workspace_path);
CREATE INDEX IF NOT EXISTS idx_builder_terminal ON builder(terminal_id);
CREATE INDEX IF NOT EXISTS idx_file_tab_workspace ON file_tab(workspace_path);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
