//! Tri-state liveness probing for session backing processes.
//!
//! Read APIs expose only [`Liveness::Alive`] sessions. Cleanup treats
//! [`Liveness::Indeterminate`] the same as [`Liveness::Dead`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;

use crate::models::terminal::TerminalRecord;
use crate::shellper::client::{try_connect, ConnectOutcome};

/// Probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// The backing process answered.
    Alive,
    /// The backing process is gone.
    Dead,
    /// The probe could not decide in time.
    Indeterminate,
}

impl Liveness {
    /// Whether the session may be shown to readers.
    #[must_use]
    pub fn is_alive(self) -> bool {
        self == Self::Alive
    }
}

/// What a probe looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// A process id.
    Pid(u32),
    /// A Shellper control socket.
    Socket(PathBuf),
}

impl ProbeTarget {
    /// Target that decides the liveness of `record`. A persistent record
    /// without a socket path has nothing to probe.
    #[must_use]
    pub fn for_record(record: &TerminalRecord) -> Option<Self> {
        if record.persistent {
            record.socket_path.as_ref().map(|p| Self::Socket(PathBuf::from(p)))
        } else {
            Some(Self::Pid(record.pid))
        }
    }
}

/// A liveness strategy.
pub trait LivenessProbe: Send + Sync {
    /// Probe one target.
    fn probe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = Liveness> + Send + 'a>>;
}

/// Signal-0 existence test.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidProbe;

impl PidProbe {
    /// Check a PID synchronously.
    #[must_use]
    pub fn check(pid: u32) -> Liveness {
        pid_liveness(pid)
    }
}

#[cfg(unix)]
fn pid_liveness(pid: u32) -> Liveness {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Liveness::Dead;
    };
    // 0 and negatives address process groups, never a single session.
    if raw <= 0 {
        return Liveness::Dead;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Dead,
        Err(_) => Liveness::Indeterminate,
    }
}

#[cfg(not(unix))]
fn pid_liveness(_pid: u32) -> Liveness {
    Liveness::Indeterminate
}

impl LivenessProbe for PidProbe {
    fn probe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = Liveness> + Send + 'a>> {
        Box::pin(async move {
            match target {
                ProbeTarget::Pid(pid) => pid_liveness(*pid),
                ProbeTarget::Socket(_) => Liveness::Indeterminate,
            }
        })
    }
}

/// Connect test against a Shellper socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketProbe {
    timeout: Duration,
}

impl SocketProbe {
    /// Probe with the given connect timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LivenessProbe for SocketProbe {
    fn probe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = Liveness> + Send + 'a>> {
        Box::pin(async move {
            let ProbeTarget::Socket(path) = target else {
                return Liveness::Indeterminate;
            };
            match try_connect(path, self.timeout).await {
                ConnectOutcome::Connected(_) => Liveness::Alive,
                ConnectOutcome::Missing | ConnectOutcome::Refused | ConnectOutcome::Failed(_) => {
                    Liveness::Dead
                }
                ConnectOutcome::TimedOut => Liveness::Indeterminate,
            }
        })
    }
}

/// Dispatches on the target kind: sockets for persistent sessions, PIDs for
/// direct children.
#[derive(Debug, Clone, Copy)]
pub struct SessionProbe {
    pid: PidProbe,
    socket: SocketProbe,
}

impl SessionProbe {
    /// Build with the socket connect timeout.
    #[must_use]
    pub fn new(socket_timeout: Duration) -> Self {
        Self {
            pid: PidProbe,
            socket: SocketProbe::new(socket_timeout),
        }
    }
}

impl LivenessProbe for SessionProbe {
    fn probe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> Pin<Box<dyn Future<Output = Liveness> + Send + 'a>> {
        match target {
            ProbeTarget::Pid(_) => self.pid.probe(target),
            ProbeTarget::Socket(_) => self.socket.probe(target),
        }
    }
}

/// Probe a record; records with nothing to probe are dead.
pub async fn probe_record(probe: &dyn LivenessProbe, record: &TerminalRecord) -> Liveness {
    match ProbeTarget::for_record(record) {
        Some(target) => probe.probe(&target).await,
        None => Liveness::Dead,
    }
}
