//! Settings parser for .slidesync/config.toml

use std::path::{Path, PathBuf};

use slidesync_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const SLIDESYNC_DIR: &str = ".slidesync";

/// Location of the config file under `project_path`.
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(SLIDESYNC_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `.slidesync/config.toml`.
///
/// A missing, unreadable or malformed file yields the defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = config_path(project_path);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Save settings to `.slidesync/config.toml`, replacing the file atomically.
pub fn save_settings(project_path: &Path, settings: &Settings) -> Result<()> {
    let dir = project_path.join(SLIDESYNC_DIR);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::config(format!("Failed to create .slidesync dir: {}", e)))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("# Slidesync Configuration\n\n{}", content);

    let config_path = dir.join(CONFIG_FILENAME);
    let temp_path = dir.join(".config.toml.tmp");
    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}
