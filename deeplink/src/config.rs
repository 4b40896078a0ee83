use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{
    CONFIG_FILE_NAME, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_READ_TIMEOUT_MS, ENV_READ_TIMEOUT_MS,
    ENV_SOCKET_DIR, ENV_SOCKET_NAME,
};
use crate::error::{InstanceError, Result};
use crate::paths::{self, Endpoint};
use crate::server::ServerOpts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Application identity; defaults to the executable's base name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
    /// Socket file name; defaults to the app name. `.sock` is appended when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,
    /// 0 disables the per-connection read timeout.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_true")]
    pub handle_signals: bool,
    #[serde(default)]
    pub desktop: DesktopEntryConfig,
}

/// Scheme-handler registration written once by the leader.
/// Nothing is installed while `mime_type` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesktopEntryConfig {
    /// Comma separated, e.g. `x-scheme-handler/myapp`.
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icons_dir: Option<PathBuf>,
    /// Copied into `icons_dir`; the entry points at the copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

fn default_true() -> bool {
    true
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            socket_dir: None,
            socket_name: None,
            read_timeout_ms: default_read_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            handle_signals: true,
            desktop: DesktopEntryConfig::default(),
        }
    }
}

impl InstanceConfig {
    pub fn app_name(&self) -> Result<String> {
        self.app_name
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(paths::app_binary_name)
            .ok_or(InstanceError::NoEndpoint("cannot determine application name"))
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        let name = match &self.socket_name {
            Some(n) if !n.trim().is_empty() => n.clone(),
            _ => self.app_name()?,
        };
        paths::resolve_endpoint(&name, self.socket_dir.as_deref())
    }

    pub fn server_opts(&self) -> ServerOpts {
        ServerOpts {
            read_timeout: (self.read_timeout_ms > 0)
                .then(|| Duration::from_millis(self.read_timeout_ms)),
            max_payload_bytes: self.max_payload_bytes,
        }
    }

    /// `DEEPLINK_*` variables override values from the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|k| std::env::var(k).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(d) = get(ENV_SOCKET_DIR).filter(|s| !s.trim().is_empty()) {
            self.socket_dir = Some(PathBuf::from(d));
        }
        if let Some(n) = get(ENV_SOCKET_NAME).filter(|s| !s.trim().is_empty()) {
            self.socket_name = Some(n);
        }
        if let Some(ms) = get(ENV_READ_TIMEOUT_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            self.read_timeout_ms = ms;
        }
    }
}

pub fn config_path(app: &str) -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
    base.join(app).join(CONFIG_FILE_NAME)
}

pub fn load_config_from(path: &Path) -> Result<InstanceConfig> {
    let s = std::fs::read_to_string(path).map_err(|e| InstanceError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&s).map_err(|e| InstanceError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load `path` if given (it must exist), otherwise the per-app default file if
/// it exists, otherwise defaults. Env overrides are applied last.
pub fn load_config(path: Option<&Path>, app: &str) -> Result<InstanceConfig> {
    let mut cfg = match path {
        Some(p) => load_config_from(p)?,
        None => {
            let p = config_path(app);
            if p.exists() {
                load_config_from(&p)?
            } else {
                InstanceConfig::default()
            }
        }
    };
    cfg.apply_env();
    Ok(cfg)
}
