//! The `/project/<encodedWorkspacePath>/<role>[/<index>][/<rest>]` address
//! scheme.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::{AppError, Result};

/// Role segment addressing the architect.
pub const ROLE_ARCHITECT: &str = "architect";
/// Role segment addressing a builder.
pub const ROLE_BUILDER: &str = "builder";

/// Encode a workspace path for use as one URL path segment. The output
/// never contains `/`, `\`, or padding.
#[must_use]
pub fn encode_workspace_path(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Reverse [`encode_workspace_path`].
///
/// # Errors
///
/// Returns `AppError::Validation` if `encoded` is not unpadded URL-safe
/// base64 of UTF-8 text.
pub fn decode_workspace_path(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|err| AppError::Validation(format!("invalid workspace encoding: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|err| AppError::Validation(format!("workspace path is not UTF-8: {err}")))
}

/// POSIX absolute paths and drive-letter Windows paths are accepted;
/// empty and relative paths are not.
#[must_use]
pub fn is_valid_workspace_path(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Decode and validate an encoded workspace segment.
///
/// # Errors
///
/// Returns `AppError::Validation` for a bad encoding or a path that is not
/// absolute.
pub fn decode_valid_workspace(encoded: &str) -> Result<String> {
    let path = decode_workspace_path(encoded)?;
    if !is_valid_workspace_path(&path) {
        return Err(AppError::Validation(format!(
            "workspace path must be absolute: {path}"
        )));
    }
    Ok(path)
}

/// Port for a role inside a workspace whose dashboard listens on `base`.
///
/// No role, an unknown role, a builder without a valid non-negative index,
/// and any overflow all resolve to `base`.
#[must_use]
pub fn resolve_target_port(base: u16, role: Option<&str>, index: Option<&str>) -> u16 {
    match role {
        Some(ROLE_ARCHITECT) => base.checked_add(1).unwrap_or(base),
        Some(ROLE_BUILDER) => index
            .filter(|raw| is_index_segment(raw))
            .and_then(|raw| raw.parse::<u16>().ok())
            .and_then(|i| base.checked_add(2)?.checked_add(i))
            .unwrap_or(base),
        _ => base,
    }
}

/// A parsed proxy path after `/project/<encoded>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Role segment, if one was recognised.
    pub role: Option<String>,
    /// Builder index segment.
    pub index: Option<String>,
    /// Remaining path forwarded upstream, without a leading slash.
    pub rest: String,
}

impl ProxyRoute {
    /// Split the path that follows the encoded workspace. Only `architect`
    /// and `builder` are consumed as roles; anything else is forwarded to
    /// the dashboard unchanged.
    #[must_use]
    pub fn parse(tail: &str) -> Self {
        let tail = tail.trim_start_matches('/');
        let (first, after_first) = split_segment(tail);
        match first {
            ROLE_ARCHITECT => Self {
                role: Some(ROLE_ARCHITECT.to_owned()),
                index: None,
                rest: after_first.to_owned(),
            },
            ROLE_BUILDER => {
                let (index, rest) = split_segment(after_first);
                if is_index_segment(index) {
                    Self {
                        role: Some(ROLE_BUILDER.to_owned()),
                        index: Some(index.to_owned()),
                        rest: rest.to_owned(),
                    }
                } else {
                    // Not an index: the segment belongs to the forwarded path.
                    Self {
                        role: Some(ROLE_BUILDER.to_owned()),
                        index: None,
                        rest: after_first.to_owned(),
                    }
                }
            }
            _ => Self {
                role: None,
                index: None,
                rest: tail.to_owned(),
            },
        }
    }

    /// Upstream port for this route.
    #[must_use]
    pub fn target_port(&self, base: u16) -> u16 {
        resolve_target_port(base, self.role.as_deref(), self.index.as_deref())
    }
}

/// A builder index is one or more ASCII digits, nothing else.
fn is_index_segment(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

fn split_segment(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((head, tail)) => (head, tail),
        None => (path, ""),
    }
}
