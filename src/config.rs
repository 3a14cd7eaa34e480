use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub height: i32,
    pub margin_end: i32,
    pub show_connected_count: bool,
    pub sendto_command: String,
    pub wizard_command: String,
    pub settings_desktop_id: String,
    pub connect_timeout_ms: i32,
    pub refresh_debounce_ms: u64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            height: 28,
            margin_end: 8,
            show_connected_count: true,
            sendto_command: "bluetooth-sendto".to_string(),
            wizard_command: "bluetooth-wizard".to_string(),
            settings_desktop_id: "bluetooth-properties.desktop".to_string(),
            connect_timeout_ms: 30000,
            refresh_debounce_ms: 100,
        }
    }
}

impl IndicatorConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {:?}", config_path))?;
            Self::parse(&content).with_context(|| format!("Invalid config {:?}", config_path))
        } else {
            // Create default config
            let config = Self::default();
            if let Err(e) = config.save() {
                tracing::warn!("Could not write default config: {}", e);
            }
            Ok(config)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(config_dir) = config_path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join("bt-indicator").join("config.toml"))
    }

    /// Watch the config directory. The watcher must be kept alive for events
    /// to keep arriving.
    pub fn watch_config_changes() -> Result<(RecommendedWatcher, mpsc::Receiver<Event>)> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Config path has no parent"))?
            .to_path_buf();
        fs::create_dir_all(&config_dir)?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::error!("Config watch error: {}", e),
            }
        })?;
        watcher
            .watch(&config_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", config_dir))?;

        Ok((watcher, rx))
    }
}
