// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use tunnel_lib::tunnel_state_machine::TunnelSettings;

const DEFAULT_CONFIG_DIR: &str = "/etc/tunneld";
const DEFAULT_LOG_DIR: &str = "/var/log/tunneld";
const DEFAULT_SOCKET_PATH: &str = "/var/run/tunneld.socket";
pub(crate) const DEFAULT_CONFIG_FILE: &str = "tunneld.toml";
pub(crate) const DEFAULT_LOG_FILE: &str = "tunneld.log";

pub(crate) fn config_dir() -> PathBuf {
    std::env::var("TUNNELD_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

pub(crate) fn log_dir() -> PathBuf {
    std::env::var("TUNNELD_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

pub(crate) fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigSetupError {
    #[error("failed to parse config file {file}: {error}")]
    Parse {
        file: PathBuf,
        error: Box<toml::de::Error>,
    },

    #[error("failed to read config file {file}: {error}")]
    ReadConfig {
        file: PathBuf,
        error: std::io::Error,
    },

    #[error("failed to get parent directory of {file}")]
    GetParentDirectory { file: PathBuf },

    #[error("failed to create directory {dir}: {error}")]
    CreateDirectory { dir: PathBuf, error: std::io::Error },

    #[error("failed to write file {file}: {error}")]
    WriteFile {
        file: PathBuf,
        error: std::io::Error,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct TunnelServiceConfig {
    pub(crate) endpoint: SocketAddr,
    pub(crate) connect_timeout_secs: u64,
    pub(crate) keepalive_interval_secs: u64,
    pub(crate) max_keepalive_failures: u32,
}

impl fmt::Display for TunnelServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endpoint: {}, connect timeout: {}s, keepalive interval: {}s",
            self.endpoint, self.connect_timeout_secs, self.keepalive_interval_secs
        )
    }
}

impl Default for TunnelServiceConfig {
    fn default() -> Self {
        let tunnel_settings = TunnelSettings::default();
        Self {
            endpoint: tunnel_settings.endpoint,
            connect_timeout_secs: tunnel_settings.connect_timeout.as_secs(),
            keepalive_interval_secs: tunnel_settings.keepalive_interval.as_secs(),
            max_keepalive_failures: tunnel_settings.max_keepalive_failures,
        }
    }
}

impl From<&TunnelServiceConfig> for TunnelSettings {
    fn from(config: &TunnelServiceConfig) -> Self {
        TunnelSettings {
            endpoint: config.endpoint,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            max_keepalive_failures: config.max_keepalive_failures,
        }
    }
}

// Write the TOML representation of the provided config, only if the file
// doesn't already exist.
pub(crate) fn create_config_file<C>(file_path: &Path, config: C) -> Result<C, ConfigSetupError>
where
    C: Serialize,
{
    let config_str = toml::to_string(&config).unwrap();
    info!("Creating config file at {}", file_path.display());

    let config_dir = file_path
        .parent()
        .ok_or_else(|| ConfigSetupError::GetParentDirectory {
            file: file_path.to_path_buf(),
        })?;
    fs::create_dir_all(config_dir).map_err(|error| ConfigSetupError::CreateDirectory {
        dir: config_dir.to_path_buf(),
        error,
    })?;

    if !file_path.exists() {
        fs::write(file_path, config_str).map_err(|error| ConfigSetupError::WriteFile {
            file: file_path.to_path_buf(),
            error,
        })?;
        info!("Config file created at {}", file_path.display());
    }
    Ok(config)
}

pub(crate) fn read_config_file<C>(file_path: &Path) -> Result<C, ConfigSetupError>
where
    C: DeserializeOwned,
{
    let file_content =
        fs::read_to_string(file_path).map_err(|error| ConfigSetupError::ReadConfig {
            file: file_path.to_path_buf(),
            error,
        })?;
    toml::from_str(&file_content).map_err(|error| ConfigSetupError::Parse {
        file: file_path.to_path_buf(),
        error: Box::new(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join(DEFAULT_CONFIG_FILE);

        let config = TunnelServiceConfig::default();
        create_config_file(&file_path, config).unwrap();

        let read_config: TunnelServiceConfig = read_config_file(&file_path).unwrap();
        assert_eq!(read_config.endpoint, TunnelSettings::default().endpoint);
    }

    #[test]
    fn create_does_not_clobber_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join(DEFAULT_CONFIG_FILE);

        let config = TunnelServiceConfig {
            connect_timeout_secs: 42,
            ..Default::default()
        };
        create_config_file(&file_path, config).unwrap();

        create_config_file(&file_path, TunnelServiceConfig::default()).unwrap();
        let read_config: TunnelServiceConfig = read_config_file(&file_path).unwrap();
        assert_eq!(read_config.connect_timeout_secs, 42);
    }

    #[test]
    fn unparsable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&file_path, "not = [valid").unwrap();

        let result: Result<TunnelServiceConfig, _> = read_config_file(&file_path);
        assert!(matches!(result, Err(ConfigSetupError::Parse { .. })));
    }

    #[test]
    fn settings_conversion_preserves_values() {
        let config = TunnelServiceConfig {
            endpoint: "10.0.0.1:443".parse().unwrap(),
            connect_timeout_secs: 7,
            keepalive_interval_secs: 15,
            max_keepalive_failures: 5,
        };
        let tunnel_settings = TunnelSettings::from(&config);
        assert_eq!(tunnel_settings.endpoint, config.endpoint);
        assert_eq!(tunnel_settings.connect_timeout, Duration::from_secs(7));
        assert_eq!(tunnel_settings.keepalive_interval, Duration::from_secs(15));
        assert_eq!(tunnel_settings.max_keepalive_failures, 5);
    }
}
