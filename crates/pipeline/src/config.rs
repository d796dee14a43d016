//! Loading tool and emulator configuration files.
//!
//! Both lists are JSON documents of the form
//! `{ "configurations": [ { "type": "...", ... } ] }` where `type`
//! selects the variant to construct.

use std::io;
use std::path::{Path, PathBuf};

use asec_core::error::CoreError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The file parsed but describes something that cannot be built.
    #[error("Invalid configuration in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("Invalid value for {name}: {message}")]
    Env { name: String, message: String },
}

/// Top-level shape of every configuration list file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationList<T> {
    #[serde(default = "Vec::new")]
    pub configurations: Vec<T>,
}

/// Read and deserialize a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
