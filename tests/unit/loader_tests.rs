use std::fs;

use agent_tower::scheduler::loader::{
    definition_files, is_valid_task_name, load_definitions, CronTaskDefinition, CRON_DIR,
};
use agent_tower::AppError;

fn write_task(root: &std::path::Path, file: &str, body: &str) {
    let dir = root.join(CRON_DIR);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join(file), body).expect("write task");
}

#[test]
fn loads_valid_definitions_sorted_by_file() {
    let ws = tempfile::tempdir().expect("tempdir");
    write_task(
        ws.path(),
        "b-tests.toml",
        "schedule = \"0 3 * * *\"\ncommand = \"cargo test\"\ntarget = \"architect\"\n",
    );
    write_task(
        ws.path(),
        "a-lint.toml",
        "name = \"lint\"\nschedule = \"*/15 * * * *\"\ncommand = \"cargo clippy\"\nenabled = false\n",
    );
    fs::write(ws.path().join(CRON_DIR).join("notes.txt"), "ignored").expect("write");

    assert_eq!(definition_files(ws.path()).len(), 2);

    let defs = load_definitions(ws.path());
    let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["lint", "b-tests"]);
    assert!(!defs[0].enabled);
    assert_eq!(defs[1].target.as_deref(), Some("architect"));
}

#[test]
fn invalid_and_duplicate_files_are_skipped() {
    let ws = tempfile::tempdir().expect("tempdir");
    write_task(ws.path(), "a.toml", "name = \"dup\"\nschedule = \"@hourly\"\ncommand = \"true\"\n");
    write_task(ws.path(), "b.toml", "name = \"dup\"\nschedule = \"@daily\"\ncommand = \"false\"\n");
    write_task(ws.path(), "c.toml", "schedule = \"*/0 * * * *\"\ncommand = \"true\"\n");
    write_task(ws.path(), "d.toml", "this is not toml");

    let defs = load_definitions(ws.path());
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].schedule, "@hourly");
}

#[test]
fn missing_cron_directory_yields_nothing() {
    let ws = tempfile::tempdir().expect("tempdir");
    assert!(load_definitions(ws.path()).is_empty());
}

#[test]
fn unknown_keys_are_rejected() {
    let err = CronTaskDefinition::from_toml_str(
        "schedule = \"@hourly\"\ncommand = \"true\"\nretries = 3\n",
        "x",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Cron(_)));
}

#[test]
fn zero_timeout_and_empty_command_are_rejected() {
    assert!(CronTaskDefinition::from_toml_str(
        "schedule = \"@hourly\"\ncommand = \"true\"\ntimeout_seconds = 0\n",
        "x"
    )
    .is_err());
    assert!(
        CronTaskDefinition::from_toml_str("schedule = \"@hourly\"\ncommand = \"  \"\n", "x")
            .is_err()
    );
}

#[test]
fn task_names_are_url_safe() {
    assert!(is_valid_task_name("nightly-tests_2.v1"));
    assert!(!is_valid_task_name(""));
    assert!(!is_valid_task_name("has space"));
    assert!(!is_valid_task_name("a/b"));
}
