use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "modsync";
const CONFIG_FILE_NAME: &str = "config.json";

const CLIENT_INSTANCE: &str = "zazaland client";
const SERVER_INSTANCE: &str = "zazaland";
const PACK_NAME: &str = "Zazaland";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load configuration from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
    #[error("could not save configuration to {path}: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Remembered origin and destination folders for the client and server
/// options. Keys missing from the stored file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub client_origin: PathBuf,
    pub client_destination: PathBuf,
    pub server_origin: PathBuf,
    pub server_destination: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let home = home_dir();
        let instances = home.join("curseforge").join("minecraft").join("Instances");
        Self {
            client_origin: instances.join(CLIENT_INSTANCE),
            client_destination: home
                .join("Games")
                .join("Minecraft")
                .join("Installations")
                .join(PACK_NAME),
            server_origin: instances.join(SERVER_INSTANCE),
            server_destination: home.join("Minecraft Servers").join(PACK_NAME),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKey {
    ClientOrigin,
    ClientDestination,
    ServerOrigin,
    ServerDestination,
}

impl PathKey {
    pub const ALL: [PathKey; 4] = [
        PathKey::ClientOrigin,
        PathKey::ClientDestination,
        PathKey::ServerOrigin,
        PathKey::ServerDestination,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PathKey::ClientOrigin => "client_origin",
            PathKey::ClientDestination => "client_destination",
            PathKey::ServerOrigin => "server_origin",
            PathKey::ServerDestination => "server_destination",
        }
    }
}

impl PathConfig {
    pub fn get(&self, key: PathKey) -> &Path {
        match key {
            PathKey::ClientOrigin => &self.client_origin,
            PathKey::ClientDestination => &self.client_destination,
            PathKey::ServerOrigin => &self.server_origin,
            PathKey::ServerDestination => &self.server_destination,
        }
    }

    /// Returns true when the stored value changed.
    pub fn set(&mut self, key: PathKey, value: PathBuf) -> bool {
        let slot = match key {
            PathKey::ClientOrigin => &mut self.client_origin,
            PathKey::ClientDestination => &mut self.client_destination,
            PathKey::ServerOrigin => &mut self.server_origin,
            PathKey::ServerDestination => &mut self.server_destination,
        };
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_location() -> anyhow::Result<Self> {
        Ok(Self::new(base_data_dir()?.join(CONFIG_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<PathConfig, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(PathConfig::default()),
            Err(err) => {
                return Err(ConfigError::LoadFailed {
                    path: self.path.clone(),
                    reason: err.to_string(),
                })
            }
        };
        serde_json::from_str(&raw).map_err(|err| ConfigError::LoadFailed {
            path: self.path.clone(),
            reason: err.to_string(),
        })
    }

    /// Loads the record, falling back to defaults when the store is unreadable.
    pub fn load(&self) -> PathConfig {
        match self.try_load() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "using default paths");
                PathConfig::default()
            }
        }
    }

    pub fn save(&self, config: &PathConfig) -> Result<(), ConfigError> {
        let save_failed = |source: io::Error| ConfigError::SaveFailed {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(save_failed)?;
        }
        let raw = serde_json::to_string_pretty(config)
            .map_err(|err| save_failed(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, raw).map_err(save_failed)?;
        fs::rename(&temp, &self.path).map_err(save_failed)?;
        tracing::debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

pub fn base_data_dir() -> anyhow::Result<PathBuf> {
    use anyhow::Context;
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join(APP_DIR_NAME))
}

/// The vanilla launcher's game directory for the current platform.
pub fn default_minecraft_dir() -> PathBuf {
    let Some(base) = BaseDirs::new() else {
        return PathBuf::from(".minecraft");
    };
    if cfg!(windows) {
        base.config_dir().join(".minecraft")
    } else if cfg!(target_os = "macos") {
        base.data_dir().join("minecraft")
    } else {
        base.home_dir().join(".minecraft")
    }
}

fn home_dir() -> PathBuf {
    BaseDirs::new()
        .map(|base| base.home_dir().to_path_buf())
        .unwrap_or_default()
}
