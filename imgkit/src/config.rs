//! Settings of imgkit, read from `imgkit.toml` and the environment
//!
//! ```toml
//! docker_root = "/var/lib/docker"
//! driver = "overlay2"
//!
//! [platform]
//! os = "linux"
//! architecture = "arm64"
//! variant = "v8"
//! ```

use crate::{driver::DRIVER_ENV, error::*, manifest::Platform};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_PROJECT_NAME: &str = "imgkit";
pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

/// Overrides [Config::docker_root]
pub const DOCKER_ROOT_ENV: &str = "IMGKIT_DOCKER_ROOT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph root of the Docker daemon
    pub docker_root: PathBuf,
    /// Storage driver, detected from the graph root when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Platform to pick from an index, the host platform when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            docker_root: PathBuf::from(DEFAULT_DOCKER_ROOT),
            driver: None,
            platform: None,
        }
    }
}

impl Config {
    /// `imgkit.toml` in the configuration directory of the user, e.g. `~/.config/imgkit/`
    pub fn path() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("", DEFAULT_PROJECT_NAME, DEFAULT_PROJECT_NAME)?;
        Some(dirs.config_dir().join("imgkit.toml"))
    }

    /// Load the user configuration and apply the environment overrides
    pub fn load() -> Result<Self> {
        let config = match Self::path() {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        Ok(config.with_env(|key| env::var(key).ok()))
    }

    /// Read a configuration file, a missing file is the default configuration
    pub fn from_path(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(input) => {
                log::debug!("Load configuration from {}", path.display());
                Self::from_toml(&input)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::path(path, e)),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Override by `DOCKER_DRIVER` and `IMGKIT_DOCKER_ROOT`, empty values are ignored
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(driver) = var(DRIVER_ENV).filter(|v| !v.is_empty()) {
            self.driver = Some(driver);
        }
        if let Some(root) = var(DOCKER_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.docker_root = PathBuf::from(root);
        }
        self
    }
}
