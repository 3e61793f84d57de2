//! Configuration loading and defaults for auto-logout.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for auto-logout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle seconds before escalation begins (default: 1800).
    pub max_idle_seconds: u64,

    /// Seconds the user has to cancel the forced logout (default: 120).
    pub cancel_window_seconds: u64,

    /// Dialog body text. `{seconds}` is replaced with the cancel window.
    pub dialog_message: String,

    /// Title of the cancel button (default: "Cancel").
    pub cancel_label: String,

    /// Optional icon displayed on the alert dialog (PNG path).
    pub icon_path: Option<PathBuf>,

    /// Optional system sound played when the alert is presented,
    /// e.g. "Submarine". See /System/Library/Sounds.
    pub alert_sound: Option<String>,

    /// Dry run mode: log power commands instead of executing them.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_idle_seconds: 1800,
            cancel_window_seconds: 120,
            dialog_message: "Logging out idle user in {seconds} seconds!\n\
                             Click Cancel to prevent automatic logout."
                .to_string(),
            cancel_label: "Cancel".to_string(),
            icon_path: None,
            alert_sound: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("auto-logout").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_idle_seconds == 0 {
            bail!("max_idle_seconds must be greater than zero");
        }
        if self.cancel_window_seconds == 0 {
            bail!("cancel_window_seconds must be greater than zero");
        }
        Ok(())
    }

    /// Idle threshold as a duration.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }

    /// Cancel window as a duration.
    pub fn cancel_window(&self) -> Duration {
        Duration::from_secs(self.cancel_window_seconds)
    }

    /// Dialog body with the cancel window substituted in.
    pub fn rendered_message(&self) -> String {
        self.dialog_message
            .replace("{seconds}", &self.cancel_window_seconds.to_string())
    }
}
