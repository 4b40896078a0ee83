use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("cannot determine rendezvous endpoint: {0}")]
    NoEndpoint(&'static str),

    #[error("rendezvous path too long ({len} bytes, max {max}): {}", .path.display())]
    EndpointTooLong { path: PathBuf, len: usize, max: usize },

    #[error("probe {}: {source}", .path.display())]
    Probe { path: PathBuf, source: io::Error },

    #[error("bind {}: {source}", .path.display())]
    Bind { path: PathBuf, source: io::Error },

    #[error("endpoint lock {}: {source}", .path.display())]
    Lock { path: PathBuf, source: io::Error },

    #[error("relay to running instance failed: {0}")]
    Transmission(#[source] io::Error),

    #[error("no running instance at {}", .0.display())]
    NoLeader(PathBuf),

    #[error("config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("desktop entry: {0}")]
    Desktop(#[source] io::Error),
}

impl InstanceError {
    /// Errors that should abort startup before any UI is shown.
    ///
    /// A failed relay is reported separately: the follower exits non-zero but
    /// never falls back to becoming a second leader.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InstanceError::Transmission(_) | InstanceError::NoLeader(_))
    }
}

pub type Result<T> = std::result::Result<T, InstanceError>;
