use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    seconds_to_ticks, DEFAULT_GROUP_TIMEOUT_SECS, DEFAULT_SOLO_TIMEOUT_SECS,
    MAX_DOWNED_TIMEOUT_SECS,
};
use crate::error::ConfigError;
use crate::types::PlayMode;

pub const DEFAULT_CONFIG_PATH: &str = ".data/dread.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownedConfig {
    pub enabled: bool,
    #[serde(rename = "skipDeathCinematic", alias = "skip_death_cinematic")]
    pub skip_death_cinematic: bool,
    #[serde(rename = "soloDownedTimeoutSecs", alias = "solo_downed_timeout_secs")]
    pub solo_downed_timeout_secs: u32,
    #[serde(rename = "groupDownedTimeoutSecs", alias = "group_downed_timeout_secs")]
    pub group_downed_timeout_secs: u32,
}

impl Default for DownedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_death_cinematic: false,
            solo_downed_timeout_secs: DEFAULT_SOLO_TIMEOUT_SECS,
            group_downed_timeout_secs: DEFAULT_GROUP_TIMEOUT_SECS,
        }
    }
}

impl DownedConfig {
    pub fn timeout_secs(&self, mode: PlayMode) -> u32 {
        match mode {
            PlayMode::Solo => self.solo_downed_timeout_secs,
            PlayMode::Group => self.group_downed_timeout_secs,
        }
    }

    pub fn timeout_ticks(&self, mode: PlayMode) -> u32 {
        seconds_to_ticks(self.timeout_secs(mode))
    }

    pub fn validated(mut self) -> Self {
        self.solo_downed_timeout_secs = self
            .solo_downed_timeout_secs
            .clamp(1, MAX_DOWNED_TIMEOUT_SECS);
        self.group_downed_timeout_secs = self
            .group_downed_timeout_secs
            .clamp(1, MAX_DOWNED_TIMEOUT_SECS);
        self
    }

    /// Reads the config file, writing defaults back when it is missing.
    /// A broken file yields defaults and is left untouched for the operator.
    pub fn load_or_default(path: &Path) -> Self {
        match read_config(path) {
            Ok(Some(config)) => {
                let config = config.validated();
                tracing::info!(path = %path.display(), "loaded downed config");
                config
            }
            Ok(None) => {
                let config = Self::default();
                if let Err(error) = write_config(path, &config) {
                    tracing::warn!(%error, "failed to write default downed config");
                } else {
                    tracing::info!(path = %path.display(), "created default downed config");
                }
                config
            }
            Err(error) => {
                tracing::error!(%error, "failed to load downed config, using defaults");
                Self::default()
            }
        }
    }
}

pub fn config_path_from_env() -> PathBuf {
    std::env::var("DREAD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn read_config(path: &Path) -> Result<Option<DownedConfig>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str::<DownedConfig>(&text)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn write_config(path: &Path, config: &DownedConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = serde_json::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        );
        std::env::temp_dir().join(unique).join("dread.json")
    }

    #[test]
    fn missing_file_writes_defaults_back() {
        let path = temp_file("dread-config-missing");
        let config = DownedConfig::load_or_default(&path);
        assert_eq!(config, DownedConfig::default());
        assert!(path.is_file());

        let reloaded = DownedConfig::load_or_default(&path);
        assert_eq!(reloaded, config);

        let _ = fs::remove_dir_all(path.parent().expect("parent exists"));
    }

    #[test]
    fn partial_file_keeps_defaults_and_clamps_timeouts() {
        let path = temp_file("dread-config-partial");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{ "soloDownedTimeoutSecs": 0, "skipDeathCinematic": true }"#)
            .expect("write file");

        let config = DownedConfig::load_or_default(&path);
        assert_eq!(config.solo_downed_timeout_secs, 1);
        assert_eq!(config.group_downed_timeout_secs, DEFAULT_GROUP_TIMEOUT_SECS);
        assert!(config.skip_death_cinematic);
        assert!(config.enabled);

        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn broken_file_falls_back_without_overwriting() {
        let path = temp_file("dread-config-broken");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, "{ not json").expect("write file");

        let config = DownedConfig::load_or_default(&path);
        assert_eq!(config, DownedConfig::default());
        assert_eq!(fs::read_to_string(&path).expect("read back"), "{ not json");

        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn timeout_ticks_follow_mode() {
        let config = DownedConfig::default();
        assert_eq!(config.timeout_ticks(PlayMode::Solo), 600);
        assert_eq!(config.timeout_ticks(PlayMode::Group), 6_000);
    }
}
