use agent_tower::models::builder::{Builder, BuilderStatus, BuilderType};
use agent_tower::models::file_tab::FileTab;
use agent_tower::models::terminal::{TerminalRecord, TerminalRole};
use agent_tower::workspace::state::assemble;
use chrono::{Duration, Utc};

const WS: &str = "/work/app";

fn terminal(id: &str, role: TerminalRole, age_secs: i64) -> TerminalRecord {
    TerminalRecord {
        id: id.into(),
        command: "claude".into(),
        args: Vec::new(),
        cwd: WS.into(),
        label: id.into(),
        role,
        role_id: None,
        workspace_path: Some(WS.into()),
        pid: 100,
        persistent: true,
        socket_path: None,
        shellper_pid: None,
        created_at: Utc::now() - Duration::seconds(age_secs),
    }
}

fn builder(id: &str, terminal_id: Option<&str>) -> Builder {
    Builder {
        id: id.into(),
        workspace_path: WS.into(),
        name: id.into(),
        port: None,
        status: BuilderStatus::Implementing,
        phase: None,
        worktree: format!("{WS}/.worktrees/{id}"),
        branch: None,
        terminal_id: terminal_id.map(str::to_owned),
        cli_session_id: None,
        builder_type: BuilderType::Spec,
        issue_number: None,
        gate: None,
    }
}

#[test]
fn builders_without_live_terminal_are_omitted() {
    let live = vec![terminal("t-b1", TerminalRole::Builder, 5)];
    let builders = vec![
        builder("b1", Some("t-b1")),
        builder("b2", Some("t-dead")),
        builder("b3", None),
    ];

    let state = assemble(live, builders, Vec::new());
    assert_eq!(state.builders.len(), 1);
    assert_eq!(state.builders[0].builder.id, "b1");
    assert_eq!(state.builders[0].terminal.id, "t-b1");
}

#[test]
fn newest_architect_wins_and_shells_become_utils() {
    let live = vec![
        terminal("old-arch", TerminalRole::Architect, 60),
        terminal("new-arch", TerminalRole::Architect, 1),
        terminal("sh1", TerminalRole::Shell, 10),
        terminal("sh2", TerminalRole::Shell, 20),
    ];
    let state = assemble(live, Vec::new(), Vec::new());
    assert_eq!(state.architect.expect("architect").id, "new-arch");
    let utils: Vec<&str> = state.utils.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(utils, vec!["sh1", "sh2"]);
}

#[test]
fn empty_workspace_state_serializes_camel_case() {
    let tab = FileTab::new(WS.into(), format!("{WS}/README.md"));
    let state = assemble(Vec::new(), Vec::new(), vec![tab]);
    let json = serde_json::to_value(&state).expect("serialize");
    assert!(json["architect"].is_null());
    assert_eq!(json["builders"], serde_json::json!([]));
    assert_eq!(json["annotations"][0]["filePath"], format!("{WS}/README.md"));
}
