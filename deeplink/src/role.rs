use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};

use utils::{Framing, LaunchRequest};

use crate::error::{InstanceError, Result};
use crate::paths::Endpoint;
use crate::platform::{self, EndpointLock};
use crate::probe::{self, Probe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Leader,
    Follower,
}

/// Exclusive ownership of the rendezvous endpoint: a bound, listening socket.
/// Holding one is what makes this process the leader.
#[derive(Debug)]
pub struct ListeningHandle {
    listener: UnixListener,
    endpoint: Endpoint,
}

impl ListeningHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Hand the listener to the tokio runtime. Must be called from within one.
    pub(crate) fn into_tokio(self) -> io::Result<(tokio::net::UnixListener, Endpoint)> {
        self.listener.set_nonblocking(true)?;
        let listener = tokio::net::UnixListener::from_std(self.listener)?;
        Ok((listener, self.endpoint))
    }
}

/// What a follower handed to the leader.
#[derive(Debug, Clone)]
pub struct Relayed {
    pub event_id: String,
    pub args: usize,
    pub bytes: usize,
}

#[derive(Debug)]
pub enum Decision {
    Leader(ListeningHandle),
    /// The arguments went to the running leader; this process should exit now.
    Follower(Relayed),
}

impl Decision {
    pub fn role(&self) -> InstanceRole {
        match self {
            Decision::Leader(_) => InstanceRole::Leader,
            Decision::Follower(_) => InstanceRole::Follower,
        }
    }
}

enum Attempt {
    Decided(Decision),
    LostRace(io::Error),
}

/// Become the leader, or relay `args` to the one already running.
///
/// Probe and bind are not atomic. If the bind loses a race anyway, the whole
/// sequence is retried exactly once before giving up.
pub fn decide(endpoint: &Endpoint, args: &[String]) -> Result<Decision> {
    match attempt(endpoint, args)? {
        Attempt::Decided(d) => Ok(d),
        Attempt::LostRace(first) => {
            log::warn!(
                "decide: bind lost a race ({}), retrying once path={}",
                first,
                endpoint.socket_path().display()
            );
            match attempt(endpoint, args)? {
                Attempt::Decided(d) => Ok(d),
                Attempt::LostRace(e) => Err(InstanceError::Bind {
                    path: endpoint.socket_path().to_path_buf(),
                    source: e,
                }),
            }
        }
    }
}

fn attempt(endpoint: &Endpoint, args: &[String]) -> Result<Attempt> {
    let path = endpoint.socket_path();
    if let Some(dir) = path.parent() {
        platform::prepare_socket_dir(dir).map_err(|e| InstanceError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let lock = EndpointLock::acquire(endpoint.lock_path()).map_err(|e| InstanceError::Lock {
        path: endpoint.lock_path().to_path_buf(),
        source: e,
    })?;

    match probe::probe(endpoint)? {
        Probe::Alive(stream) => {
            drop(lock);
            let relayed = relay(stream, &LaunchRequest::new(args.to_vec()), Framing::Versioned)?;
            Ok(Attempt::Decided(Decision::Follower(relayed)))
        }
        Probe::Stale | Probe::Absent => match UnixListener::bind(path) {
            Ok(listener) => {
                platform::restrict_socket_permissions(path);
                log::info!("decide: leader path={}", path.display());
                Ok(Attempt::Decided(Decision::Leader(ListeningHandle {
                    listener,
                    endpoint: endpoint.clone(),
                })))
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(Attempt::LostRace(e)),
            Err(e) => Err(InstanceError::Bind {
                path: path.to_path_buf(),
                source: e,
            }),
        },
    }
}

/// Relay to a leader only; never claims the endpoint.
pub fn send(endpoint: &Endpoint, args: &[String], framing: Framing) -> Result<Relayed> {
    match probe::inspect(endpoint)? {
        Probe::Alive(stream) => relay(stream, &LaunchRequest::new(args.to_vec()), framing),
        Probe::Stale | Probe::Absent => {
            Err(InstanceError::NoLeader(endpoint.socket_path().to_path_buf()))
        }
    }
}

/// Write one whole payload and close the write side; the leader reads until EOF.
pub fn relay(mut stream: UnixStream, request: &LaunchRequest, framing: Framing) -> Result<Relayed> {
    let bytes = match framing {
        Framing::Versioned => request
            .to_bytes()
            .map_err(|e| InstanceError::Transmission(io::Error::new(io::ErrorKind::InvalidData, e)))?,
        Framing::Legacy => request.to_legacy_bytes(),
    };
    if !request.args.is_empty() {
        stream.write_all(&bytes).map_err(InstanceError::Transmission)?;
        stream.flush().map_err(InstanceError::Transmission)?;
    }
    match stream.shutdown(Shutdown::Write) {
        Ok(()) => {}
        // The leader may already have seen EOF and closed its end.
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => return Err(InstanceError::Transmission(e)),
    }
    log::debug!(
        "relay: sent event_id={} args={} bytes={}",
        request.event_id,
        request.args.len(),
        bytes.len()
    );
    Ok(Relayed {
        event_id: request.event_id.clone(),
        args: request.args.len(),
        bytes: if request.args.is_empty() { 0 } else { bytes.len() },
    })
}
