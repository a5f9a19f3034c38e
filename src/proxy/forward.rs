//! Forwards proxied requests to a loopback port.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
}

/// HTTP forwarder bound to `127.0.0.1`.
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ProxyForwarder {
    /// Build a forwarder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(max_body_bytes: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| AppError::Config(format!("failed to build proxy client: {err}")))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    /// Forward `request` to `http://127.0.0.1:<port>/<rest>`, keeping its
    /// method, query, body, and end-to-end headers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Proxy` if the upstream cannot be reached or its
    /// response cannot be read.
    pub async fn forward(
        &self,
        request: Request<Body>,
        port: u16,
        rest: &str,
    ) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();

        let mut url = format!("http://127.0.0.1:{port}/{}", rest.trim_start_matches('/'));
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let Ok(body) = axum::body::to_bytes(body, self.max_body_bytes).await else {
            warn!(limit = self.max_body_bytes, "proxied body too large");
            return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        debug!(method = %parts.method, %url, "forwarding request");
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| AppError::Proxy(format!("upstream {url} unreachable: {err}")))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|err| AppError::Proxy(format!("failed to read upstream response: {err}")))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}
