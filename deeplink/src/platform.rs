//! The few OS-specific pieces of the rendezvous: how a failed connect is read,
//! how the artifact is removed, and the advisory lock around cleanup + bind.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Why a client connect to the rendezvous path failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The socket file exists but nobody is listening on it.
    DeadPeer,
    /// There is no socket file at all.
    Missing,
    Other,
}

pub fn classify_connect_error(err: &io::Error) -> ConnectFailure {
    match err.raw_os_error() {
        Some(libc::ECONNREFUSED) => ConnectFailure::DeadPeer,
        Some(libc::ENOENT) => ConnectFailure::Missing,
        _ => match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectFailure::DeadPeer,
            io::ErrorKind::NotFound => ConnectFailure::Missing,
            _ => ConnectFailure::Other,
        },
    }
}

/// Remove the rendezvous artifact. Someone else having removed it first counts as success.
pub fn remove_artifact(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Refuse to unlink anything that is not a socket (a stray regular file with
/// the same name also yields ECONNREFUSED on connect).
pub fn ensure_is_socket(path: &Path) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_socket() {
        return Ok(());
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} exists and is not a socket", path.display()),
    ))
}

/// Create the socket directory if needed. Only a directory we create is chmod'ed.
pub fn prepare_socket_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
        log::warn!("chmod 0700 {}: {}", dir.display(), e);
    }
    Ok(())
}

pub fn restrict_socket_permissions(path: &Path) {
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        log::debug!("chmod 0600 {}: {}", path.display(), e);
    }
}

/// Exclusive `flock` held while deciding whether to clean up and bind.
///
/// The lock file is never deleted: unlinking it would let two processes lock
/// two different inodes under the same name.
pub struct EndpointLock {
    _file: File,
}

impl EndpointLock {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                break;
            }
            let e = io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                return Err(e);
            }
        }
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::{UnixListener, UnixStream};

    #[test]
    fn classify_missing_and_dead_peer() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gone.sock");

        let err = UnixStream::connect(&p).unwrap_err();
        assert_eq!(classify_connect_error(&err), ConnectFailure::Missing);

        drop(UnixListener::bind(&p).unwrap());
        assert!(p.exists(), "dropping a std listener leaves the socket file behind");
        let err = UnixStream::connect(&p).unwrap_err();
        assert_eq!(classify_connect_error(&err), ConnectFailure::DeadPeer);
    }

    #[test]
    fn classify_other_kinds() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(classify_connect_error(&err), ConnectFailure::Other);
    }

    #[test]
    fn remove_artifact_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.sock");
        std::fs::write(&p, b"").unwrap();
        remove_artifact(&p).unwrap();
        remove_artifact(&p).unwrap();
        assert!(!p.exists());
    }

    #[test]
    fn regular_file_is_not_a_socket() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.sock");
        std::fs::write(&p, b"").unwrap();
        assert!(ensure_is_socket(&p).is_err());
    }

    #[test]
    fn prepare_socket_dir_creates_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().join("run").join("app");
        prepare_socket_dir(&d).unwrap();
        let mode = std::fs::metadata(&d).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn endpoint_lock_can_be_reacquired_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.sock.lock");
        let first = EndpointLock::acquire(&p).unwrap();
        drop(first);
        let _second = EndpointLock::acquire(&p).unwrap();
        assert!(p.exists());
    }
}
