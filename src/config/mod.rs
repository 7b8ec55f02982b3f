//! Settings (`config/settings.toml`) and the workload's own `config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use screensaver_updater_lib::UpdateConfig;

pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

/// Default inactivity timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub update: UpdateConfig,
    pub workload: WorkloadSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct WorkloadSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Defaults to the install root
    pub working_dir: Option<String>,
    /// Relative to the working dir
    pub config_file: String,
    pub stop_grace_secs: u64,
    /// Regex with a named `level` group for output lines
    pub log_pattern: Option<String>,
    /// Extra environment for the workload
    pub env: BTreeMap<String, String>,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: None,
            config_file: "config.json".to_string(),
            stop_grace_secs: 2,
            log_pattern: None,
            env: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Missing file → defaults. Unparsable file → defaults with a warning.
    pub fn load(path: &Path) -> Self {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => {
                tracing::debug!("[Config] {} not found, using defaults", path.display());
                return Self::default();
            }
        };
        toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!("[Config] Failed to parse {}: {}, using defaults", path.display(), e);
            Self::default()
        })
    }

    pub fn workload_dir(&self) -> PathBuf {
        self.workload
            .working_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.update.install_root())
    }

    pub fn workload_config_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.workload.config_file);
        if path.is_absolute() {
            path
        } else {
            self.workload_dir().join(path)
        }
    }

    /// Where the native audio helper is loaded from.
    pub fn native_library_path(&self) -> PathBuf {
        self.update
            .install_root()
            .join(self.update.native.artifact_name())
    }
}

/// The workload's `config.json`: `{"timeout": <seconds>}`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub timeout: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl WorkloadConfig {
    /// Missing file → default. Present but not numeric → error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))
    }

    /// Writes `timeout`, keeping any other keys already in the file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut doc = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .filter(|v| v.is_object())
            .unwrap_or_else(|| serde_json::json!({}));
        doc["timeout"] = serde_json::json!(self.timeout);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))
    }

    /// Timeout in whole minutes as passed to the workload (at least 1).
    pub fn timeout_minutes(&self) -> u64 {
        (self.timeout / 60).max(1)
    }

    /// Fails without changing `timeout` when the value does not fit in seconds.
    pub fn set_timeout_minutes(&mut self, minutes: u64) -> anyhow::Result<()> {
        self.timeout = minutes
            .max(1)
            .checked_mul(60)
            .with_context(|| format!("timeout of {} minutes is too large", minutes))?;
        Ok(())
    }
}
