//! Layered configuration for the observation layer.
//!
//! Sources, lowest priority first: built-in defaults, an optional YAML file and
//! `SOULBROWSER_OBSERVE__*` environment variables (`__` separates nesting levels, e.g.
//! `SOULBROWSER_OBSERVE__SETTLE__DEFAULT_TIMEOUT_MS=10000`).

use std::path::{Path, PathBuf};

use cdp_adapter::CdpConfig;
use config::{Config, Environment, File, FileFormat};
use network_settle::SettleConfig;
use perceiver_structural::SnapshotOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ObserveError;

pub const ENV_PREFIX: &str = "SOULBROWSER_OBSERVE";
const LOCAL_CONFIG: &str = "config/observe.yaml";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
    pub log: LogConfig,
    pub cdp: CdpConfig,
    pub settle: SettleConfig,
    pub snapshot: SnapshotOptions,
}

impl ObserveConfig {
    /// Loads the configuration from `path`, or from the first default location that exists.
    ///
    /// An explicit `path` must exist; the default locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ObserveError> {
        let defaults = Config::try_from(&ObserveConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
            }
            None => {
                if let Some(found) = default_config_path() {
                    debug!(path = %found.display(), "loading observe config file");
                    builder = builder.add_source(
                        File::from(found.as_path())
                            .format(FileFormat::Yaml)
                            .required(false),
                    );
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// `config/observe.yaml` in the working directory, then `<config_dir>/soulbrowser/observe.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("soulbrowser").join("observe.yaml"))
        .filter(|path| path.exists())
}
