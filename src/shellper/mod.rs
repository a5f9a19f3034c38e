//! Shellper: the detachable helper process behind persistent sessions.
//!
//! A Shellper owns one real child process and exposes it over a local
//! socket in the configured socket directory. The orchestrator never holds a
//! parent/child lifetime relationship with it: it is launched in its own
//! process group, starts its own OS session, and is only ever stopped through
//! the socket protocol or by deleting its session.

pub mod client;
pub mod launcher;
pub mod protocol;
pub mod server;

use std::path::{Path, PathBuf};

const SOCKET_PREFIX: &str = "shellper-";
const SOCKET_SUFFIX: &str = ".sock";
const LOG_SUFFIX: &str = ".log";

/// Deterministic socket path for a session.
#[must_use]
pub fn socket_path_for(socket_dir: &Path, session_id: &str) -> PathBuf {
    socket_dir.join(format!("{SOCKET_PREFIX}{session_id}{SOCKET_SUFFIX}"))
}

/// Log file written by the Shellper of a session.
#[must_use]
pub fn log_path_for(socket_dir: &Path, session_id: &str) -> PathBuf {
    socket_dir.join(format!("{SOCKET_PREFIX}{session_id}{LOG_SUFFIX}"))
}

/// Log file that sits beside a socket file.
#[must_use]
pub fn log_path_for_socket(socket_path: &Path) -> PathBuf {
    socket_path.with_extension("log")
}

/// Recover the session id encoded in a Shellper socket file name.
#[must_use]
pub fn session_id_from_socket(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix(SOCKET_PREFIX)?.strip_suffix(SOCKET_SUFFIX)?;
    (!id.is_empty()).then(|| id.to_owned())
}

/// List Shellper socket files in `socket_dir`. A missing directory yields
/// an empty list.
#[must_use]
pub fn scan_socket_dir(socket_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(socket_dir) else {
        return Vec::new();
    };
    let mut sockets: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| session_id_from_socket(path).is_some())
        .collect();
    sockets.sort();
    sockets
}

/// Remove a socket file and its log, ignoring files that are already gone.
pub fn remove_socket_files(socket_path: &Path) {
    remove_socket_file(socket_path);
    remove_quietly(&log_path_for_socket(socket_path));
}

/// Remove only the socket file.
pub fn remove_socket_file(socket_path: &Path) {
    remove_quietly(socket_path);
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to remove shellper file");
        }
    }
}
