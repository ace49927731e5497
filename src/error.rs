use std::path::PathBuf;

use thiserror::Error;

use crate::types::PlayerId;

/// Failures of a single player's life-cycle operation. None of them are fatal:
/// the controller logs them and moves on to the next player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("player {0} is already downed")]
    AlreadyDowned(PlayerId),
    #[error("player {0} is not downed")]
    NotDowned(PlayerId),
    #[error("player {0} is unavailable")]
    PlayerUnavailable(PlayerId),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access store file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse store file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported store version {version} at {path:?}")]
    UnsupportedVersion { path: PathBuf, version: u8 },
}
