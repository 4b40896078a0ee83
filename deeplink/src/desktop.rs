use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::DesktopEntryConfig;
use crate::consts::{DEFAULT_ENTRY_VERSION, DESKTOP_ENTRY_SUFFIX};
use crate::error::{InstanceError, Result};
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    pub version: String,
    pub name: String,
    pub exec: PathBuf,
    pub icon: Option<PathBuf>,
    pub mime_type: String,
}

impl DesktopEntry {
    pub fn render(&self) -> String {
        let icon = self
            .icon
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        format!(
            "[Desktop Entry]\n\
             Version={}\n\
             Type=Application\n\
             Name={}\n\
             Exec={} %U\n\
             Icon={}\n\
             MimeType={}\n\
             StartupNotify=true\n\
             Terminal=false\n\
             SingleMainWindow=true\n",
            self.version,
            self.name,
            self.exec.display(),
            icon,
            self.mime_type,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Installed {
    pub entry_path: PathBuf,
    pub bin_path: PathBuf,
    pub icon_path: Option<PathBuf>,
}

/// Register the application as handler for its URL schemes.
///
/// Does nothing (returns `None`) when no MIME type is configured.
pub fn install(cfg: &DesktopEntryConfig, app: &str) -> Result<Option<Installed>> {
    if cfg.mime_type.trim().is_empty() {
        return Ok(None);
    }
    let exe = std::env::current_exe().map_err(InstanceError::Desktop)?;
    install_from(cfg, app, &exe).map(Some)
}

pub fn install_from(cfg: &DesktopEntryConfig, app: &str, exe: &Path) -> Result<Installed> {
    let entry_dir = cfg
        .entry_dir
        .clone()
        .unwrap_or_else(paths::default_applications_dir);
    let data_dir = cfg
        .data_dir
        .clone()
        .unwrap_or_else(|| paths::default_data_dir(app));
    let bin_dir = cfg.bin_dir.clone().unwrap_or_else(|| data_dir.join("bin"));
    let icons_dir = cfg.icons_dir.clone().unwrap_or_else(|| data_dir.join("icons"));

    for dir in [&entry_dir, &bin_dir, &icons_dir] {
        std::fs::create_dir_all(dir).map_err(InstanceError::Desktop)?;
    }

    let icon_path = match &cfg.icon_path {
        Some(src) => {
            let file_name = src.file_name().ok_or_else(|| {
                InstanceError::Desktop(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("icon path has no file name: {}", src.display()),
                ))
            })?;
            let dst = icons_dir.join(file_name);
            std::fs::copy(src, &dst).map_err(InstanceError::Desktop)?;
            Some(dst)
        }
        None => None,
    };

    let bin_path = bin_dir.join(app);
    if !same_file(exe, &bin_path) {
        std::fs::copy(exe, &bin_path).map_err(InstanceError::Desktop)?;
    }

    let entry = DesktopEntry {
        version: cfg
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRY_VERSION.to_string()),
        name: cfg.name.clone().unwrap_or_else(|| app.to_string()),
        exec: bin_path.clone(),
        icon: icon_path.clone(),
        mime_type: cfg.mime_type.trim().to_string(),
    };

    let mut entry_file = cfg
        .entry_file_name
        .clone()
        .unwrap_or_else(|| app.to_string());
    if !entry_file.ends_with(DESKTOP_ENTRY_SUFFIX) {
        entry_file.push_str(DESKTOP_ENTRY_SUFFIX);
    }
    let entry_path = entry_dir.join(entry_file);
    std::fs::write(&entry_path, entry.render()).map_err(InstanceError::Desktop)?;
    log::info!("desktop: wrote {}", entry_path.display());

    refresh_mime_cache(&entry_dir);

    Ok(Installed {
        entry_path,
        bin_path,
        icon_path,
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Fire and forget, like a launcher would; a missing tool is not an error.
fn refresh_mime_cache(entry_dir: &Path) {
    let Ok(tool) = which::which("update-desktop-database") else {
        log::debug!("desktop: update-desktop-database not on PATH");
        return;
    };
    let spawned = Command::new(tool)
        .arg(entry_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        log::warn!("desktop: update-desktop-database: {}", e);
    }
}
