pub const SOCKET_SUFFIX: &str = ".sock";
pub const LOCK_SUFFIX: &str = ".lock";

pub const CONFIG_FILE_NAME: &str = "deeplink.toml";

// Env overrides applied on top of the config file.
pub const ENV_SOCKET_DIR: &str = "DEEPLINK_SOCKET_DIR";
pub const ENV_SOCKET_NAME: &str = "DEEPLINK_SOCKET_NAME";
pub const ENV_READ_TIMEOUT_MS: &str = "DEEPLINK_READ_TIMEOUT_MS";

pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

// sun_path is 108 bytes on Linux, including the trailing NUL.
pub const MAX_SOCKET_PATH_BYTES: usize = 107;

pub const DESKTOP_ENTRY_SUFFIX: &str = ".desktop";
pub const DEFAULT_ENTRY_VERSION: &str = "1.0.0";
