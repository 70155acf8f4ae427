use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_PORT;
use crate::local::LocalClient;

/// Connection settings for one machine, stored in ~/.lm.yml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub local_bearer: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Settings {
    pub fn new(host: impl Into<String>, local_bearer: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            local_bearer: local_bearer.into(),
        }
    }

    /// Build a local API client for the configured machine.
    pub fn client(&self) -> LocalClient {
        LocalClient::new(self.host.clone(), self.local_bearer.clone()).with_port(self.port)
    }
}

/// Get the path to the settings file (~/.lm.yml)
pub fn get_config_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".lm.yml"))
}

/// Load settings from ~/.lm.yml
pub fn load_config() -> Result<Settings> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Not configured. Please run 'lm configure' first."
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    match serde_yaml::from_str::<Settings>(&content) {
        Ok(settings) => {
            debug!("Loaded settings for machine at {}", settings.host);
            Ok(settings)
        }
        Err(_) => Err(anyhow::anyhow!(
            "Configuration incomplete. Please run 'lm configure' first."
        )),
    }
}

/// Save settings to ~/.lm.yml
pub fn save_config(settings: &Settings) -> Result<()> {
    save_config_to(settings, &get_config_path()?)
}

pub fn save_config_to(settings: &Settings, path: &Path) -> Result<()> {
    let content = serde_yaml::to_string(settings).context("Failed to serialize configuration")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    debug!("Saved settings for machine at {}", settings.host);
    Ok(())
}

/// Remove the settings file
pub fn clear_config() -> Result<()> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        fs::remove_file(&config_path)
            .with_context(|| format!("Failed to remove config file: {}", config_path.display()))?;
        debug!("Configuration file cleared");
    } else {
        warn!("Configuration file does not exist, nothing to clear");
    }

    Ok(())
}
