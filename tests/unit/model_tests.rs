use agent_tower::models::builder::{BuilderStatus, UpsertBuilderRequest};
use agent_tower::models::terminal::{CreateTerminalRequest, TerminalRole};
use agent_tower::AppError;

#[test]
fn create_request_defaults() {
    let req: CreateTerminalRequest =
        serde_json::from_str(r#"{"command":"bash","cwd":"/tmp"}"#).expect("parse");
    assert_eq!(req.role, TerminalRole::Shell);
    assert!(!req.persistent);
    assert!(req.args.is_empty());
    req.validate().expect("valid");
}

#[test]
fn create_request_reads_camel_case() {
    let req: CreateTerminalRequest = serde_json::from_str(
        r#"{"command":"claude","workspacePath":"/w","type":"builder","roleId":"b1","persistent":true}"#,
    )
    .expect("parse");
    assert_eq!(req.workspace_path.as_deref(), Some("/w"));
    assert_eq!(req.role, TerminalRole::Builder);
    assert_eq!(req.role_id.as_deref(), Some("b1"));
    assert!(req.persistent);
}

#[test]
fn blank_command_is_invalid() {
    let req = CreateTerminalRequest {
        command: "   ".into(),
        ..CreateTerminalRequest::default()
    };
    assert!(matches!(req.validate(), Err(AppError::Validation(_))));
}

#[test]
fn relative_cwd_is_invalid() {
    let req = CreateTerminalRequest {
        command: "bash".into(),
        cwd: Some("relative/dir".into()),
        ..CreateTerminalRequest::default()
    };
    assert!(req.validate().unwrap_err().to_string().contains("absolute"));
}

#[test]
fn builder_without_role_id_is_invalid() {
    let req = CreateTerminalRequest {
        command: "claude".into(),
        cwd: Some("/tmp".into()),
        role: TerminalRole::Builder,
        ..CreateTerminalRequest::default()
    };
    assert!(req.validate().unwrap_err().to_string().contains("roleId"));
}

#[test]
fn role_storage_round_trip() {
    for role in [TerminalRole::Architect, TerminalRole::Builder, TerminalRole::Shell] {
        assert_eq!(TerminalRole::parse(role.as_str()).expect("parse"), role);
    }
    assert!(TerminalRole::parse("reviewer").is_err());
}

#[test]
fn builder_name_defaults_to_id() {
    let req: UpsertBuilderRequest = serde_json::from_str(
        r#"{"status":"blocked","worktree":"/w/.worktrees/b7","type":"bugfix"}"#,
    )
    .expect("parse");
    let builder = req.into_builder("b7".into(), "/w".into());
    assert_eq!(builder.name, "b7");
    assert_eq!(builder.status, BuilderStatus::Blocked);
}
