use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "frappe-importer";
pub const LOG_DIR_ENV: &str = "FRAPPE_IMPORTER_LOG_DIR";

/// Per-user data folder (`~/.local/share/frappe-importer` on Linux).
pub fn resolve_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
        .join(APP_DIR)
}

/// Resolve log folder (absolute path), creating it if needed.
pub fn resolve_log_folder() -> Result<PathBuf> {
    let log_dir = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => resolve_data_folder().join("logs"),
    };
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log folder: {:?}", log_dir))?;
    Ok(log_dir)
}

pub fn default_session_file() -> PathBuf {
    resolve_data_folder().join("session.json")
}

/// `<config dir>/frappe-importer/config.toml`
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Where downloaded templates land when no folder is configured.
pub fn default_template_folder() -> PathBuf {
    dirs::download_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_app_folder() {
        assert!(default_session_file().ends_with("frappe-importer/session.json"));
        if let Some(cfg) = default_config_file() {
            assert!(cfg.ends_with("frappe-importer/config.toml"));
        }
    }
}
