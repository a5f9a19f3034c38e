use agent_tower::AppError;
use axum::http::StatusCode;

#[test]
fn display_prefixes_kind() {
    assert_eq!(
        AppError::Validation("command must not be empty".into()).to_string(),
        "validation: command must not be empty"
    );
    assert_eq!(
        AppError::NotFound("terminal t1 not found".into()).to_string(),
        "not found: terminal t1 not found"
    );
    assert_eq!(AppError::Proxy("down".into()).to_string(), "proxy: down");
}

#[test]
fn status_codes_follow_error_kind() {
    let cases = [
        (AppError::Validation(String::new()), StatusCode::BAD_REQUEST),
        (AppError::Cron(String::new()), StatusCode::BAD_REQUEST),
        (AppError::NotFound(String::new()), StatusCode::NOT_FOUND),
        (AppError::Conflict(String::new()), StatusCode::CONFLICT),
        (AppError::Proxy(String::new()), StatusCode::BAD_GATEWAY),
        (AppError::Spawn(String::new()), StatusCode::INTERNAL_SERVER_ERROR),
        (AppError::Db(String::new()), StatusCode::INTERNAL_SERVER_ERROR),
        (AppError::Ipc(String::new()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, status) in cases {
        assert_eq!(err.status_code(), status, "{err:?}");
    }
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(_)));
}
