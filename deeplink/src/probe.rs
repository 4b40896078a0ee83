use std::io;
use std::os::unix::net::UnixStream;

use serde::Serialize;

use crate::error::{InstanceError, Result};
use crate::paths::Endpoint;
use crate::platform::{self, ConnectFailure};

/// Outcome of connecting to the rendezvous endpoint.
#[derive(Debug)]
pub enum Probe {
    /// A leader accepted the connection. The stream is handed back so the
    /// follower can relay over it instead of connecting a second time.
    Alive(UnixStream),
    /// The socket file is there but nobody is listening: a leader died
    /// without cleaning up.
    Stale,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Alive,
    Stale,
    Absent,
}

impl Probe {
    pub fn state(&self) -> ProbeState {
        match self {
            Probe::Alive(_) => ProbeState::Alive,
            Probe::Stale => ProbeState::Stale,
            Probe::Absent => ProbeState::Absent,
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProbeState::Alive => "alive",
            ProbeState::Stale => "stale",
            ProbeState::Absent => "absent",
        })
    }
}

/// Classify the endpoint without touching it.
///
/// Any connect failure other than "refused" or "not found" is surfaced rather
/// than read as Absent, so a transient error never produces a second leader.
pub fn inspect(endpoint: &Endpoint) -> Result<Probe> {
    let path = endpoint.socket_path();
    match UnixStream::connect(path) {
        Ok(stream) => {
            log::debug!("probe: alive path={}", path.display());
            Ok(Probe::Alive(stream))
        }
        Err(e) => match platform::classify_connect_error(&e) {
            ConnectFailure::DeadPeer => Ok(Probe::Stale),
            ConnectFailure::Missing => Ok(Probe::Absent),
            ConnectFailure::Other => Err(InstanceError::Probe {
                path: path.to_path_buf(),
                source: e,
            }),
        },
    }
}

/// Classify the endpoint and remove a stale artifact so the next bind can succeed.
pub fn probe(endpoint: &Endpoint) -> Result<Probe> {
    let outcome = inspect(endpoint)?;
    if let Probe::Stale = outcome {
        remove_stale(endpoint)?;
    }
    Ok(outcome)
}

fn remove_stale(endpoint: &Endpoint) -> Result<()> {
    let path = endpoint.socket_path();
    let checked = match platform::ensure_is_socket(path) {
        Ok(()) => platform::remove_artifact(path),
        // Another launcher cleaned it up first.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    match checked {
        Ok(()) => {
            log::warn!("probe: removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) => Err(InstanceError::Probe {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::resolve_endpoint;
    use std::os::unix::net::UnixListener;

    #[test]
    fn absent_when_nothing_there() {
        let dir = tempfile::tempdir().unwrap();
        let ep = resolve_endpoint("app", Some(dir.path())).unwrap();
        assert_eq!(probe(&ep).unwrap().state(), ProbeState::Absent);
    }

    #[test]
    fn alive_when_listening() {
        let dir = tempfile::tempdir().unwrap();
        let ep = resolve_endpoint("app", Some(dir.path())).unwrap();
        let _listener = UnixListener::bind(ep.socket_path()).unwrap();
        let outcome = probe(&ep).unwrap();
        assert!(matches!(outcome, Probe::Alive(_)));
        assert!(ep.socket_path().exists());
    }

    #[test]
    fn stale_socket_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let ep = resolve_endpoint("app", Some(dir.path())).unwrap();
        drop(UnixListener::bind(ep.socket_path()).unwrap());

        assert_eq!(probe(&ep).unwrap().state(), ProbeState::Stale);
        assert!(!ep.socket_path().exists());
        // Second look after cleanup.
        assert_eq!(probe(&ep).unwrap().state(), ProbeState::Absent);
    }

    #[test]
    fn inspect_leaves_stale_socket_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let ep = resolve_endpoint("app", Some(dir.path())).unwrap();
        drop(UnixListener::bind(ep.socket_path()).unwrap());

        assert_eq!(inspect(&ep).unwrap().state(), ProbeState::Stale);
        assert!(ep.socket_path().exists());
    }

    #[test]
    fn stray_regular_file_is_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let ep = resolve_endpoint("app", Some(dir.path())).unwrap();
        std::fs::write(ep.socket_path(), b"not a socket").unwrap();

        let err = probe(&ep).unwrap_err();
        assert!(matches!(err, InstanceError::Probe { .. }), "{err}");
        assert!(ep.socket_path().exists());
    }
}
