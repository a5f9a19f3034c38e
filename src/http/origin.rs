//! Rejects cross-origin requests from non-loopback pages.

use std::net::IpAddr;

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Whether an `Origin` header value names a loopback host. `null` and
/// unparsable values are not loopback.
#[must_use]
pub fn is_loopback_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.rsplit_once(':').map_or(authority, |(host, _)| host)
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Middleware: requests without an `Origin` header pass; requests with a
/// non-loopback origin get 403.
pub async fn require_loopback_origin(request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin.to_str().is_ok_and(is_loopback_origin);
        if !allowed {
            warn!(origin = ?origin, path = %request.uri().path(), "rejected cross-origin request");
            return (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({ "error": "forbidden: origin not allowed" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}
