use std::path::{Path, PathBuf};

use crate::consts::{LOCK_SUFFIX, MAX_SOCKET_PATH_BYTES, SOCKET_SUFFIX};
use crate::error::{InstanceError, Result};

/// Well-known rendezvous address shared by every launch of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    socket: PathBuf,
    lock: PathBuf,
}

impl Endpoint {
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Sibling lock file serialising stale cleanup and bind.
    pub fn lock_path(&self) -> &Path {
        &self.lock
    }
}

/// Base name of the running executable (`argv[0]`), as used for the default socket name.
pub fn app_binary_name() -> Option<String> {
    let arg0 = std::env::args_os().next()?;
    let name = Path::new(&arg0).file_name()?.to_string_lossy().into_owned();
    if name.is_empty() { None } else { Some(name) }
}

pub fn default_socket_dir() -> PathBuf {
    if let Some(d) = std::env::var_os("XDG_RUNTIME_DIR") {
        if !d.is_empty() {
            return PathBuf::from(d);
        }
    }
    std::env::temp_dir()
}

/// Compute the endpoint for `name` under `dir` (or the default socket dir).
///
/// Pure path composition: the same inputs always give the same endpoint, so a
/// leader and its followers agree without talking to each other.
pub fn resolve_endpoint(name: &str, dir: Option<&Path>) -> Result<Endpoint> {
    let name = safe_for_filename(name.trim());
    if name.is_empty() {
        return Err(InstanceError::NoEndpoint("empty application name"));
    }
    let dir = match dir {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        Some(_) => return Err(InstanceError::NoEndpoint("empty socket directory")),
        None => default_socket_dir(),
    };

    let file_name = if name.ends_with(SOCKET_SUFFIX) {
        name
    } else {
        format!("{name}{SOCKET_SUFFIX}")
    };
    let socket = dir.join(file_name);

    let len = socket.as_os_str().len();
    if len > MAX_SOCKET_PATH_BYTES {
        return Err(InstanceError::EndpointTooLong {
            path: socket,
            len,
            max: MAX_SOCKET_PATH_BYTES,
        });
    }

    let mut lock = socket.clone().into_os_string();
    lock.push(LOCK_SUFFIX);
    Ok(Endpoint {
        socket,
        lock: PathBuf::from(lock),
    })
}

pub fn safe_for_filename(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

pub fn default_data_dir(app: &str) -> PathBuf {
    if let Some(base) = dirs::data_dir() {
        return base.join(app);
    }
    PathBuf::from(".local/share").join(app)
}

pub fn default_applications_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("applications")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_deterministic_and_appends_suffix() {
        let dir = Path::new("/run/user/1000");
        let a = resolve_endpoint("my-app", Some(dir)).unwrap();
        let b = resolve_endpoint("my-app", Some(dir)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.socket_path(), Path::new("/run/user/1000/my-app.sock"));
        assert_eq!(a.lock_path(), Path::new("/run/user/1000/my-app.sock.lock"));
    }

    #[test]
    fn resolve_keeps_existing_suffix() {
        let ep = resolve_endpoint("viewer.sock", Some(Path::new("/tmp"))).unwrap();
        assert_eq!(ep.socket_path(), Path::new("/tmp/viewer.sock"));
    }

    #[test]
    fn resolve_sanitises_name() {
        let ep = resolve_endpoint("a/b c", Some(Path::new("/tmp"))).unwrap();
        assert_eq!(ep.socket_path(), Path::new("/tmp/a_b_c.sock"));
    }

    #[test]
    fn resolve_rejects_empty_inputs() {
        assert!(matches!(
            resolve_endpoint("  ", Some(Path::new("/tmp"))),
            Err(InstanceError::NoEndpoint(_))
        ));
        assert!(matches!(
            resolve_endpoint("app", Some(Path::new(""))),
            Err(InstanceError::NoEndpoint(_))
        ));
    }

    #[test]
    fn resolve_rejects_overlong_paths() {
        let dir = PathBuf::from(format!("/tmp/{}", "d".repeat(120)));
        assert!(matches!(
            resolve_endpoint("app", Some(&dir)),
            Err(InstanceError::EndpointTooLong { .. })
        ));
    }
}
