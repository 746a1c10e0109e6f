use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tally_core::{GlobPattern, PatternError, DEFAULT_EPSILON};
use tally_import::StatementFormat;
use tally_storage::{LedgerLocation, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Importer {importer}: unknown format '{format}'")]
    UnknownFormat { importer: String, format: String },
    #[error("Importer {importer}: unknown connection '{connection}'")]
    UnknownConnection { importer: String, connection: String },
    #[error("Importer {importer}: {source}")]
    AccountPattern {
        importer: String,
        #[source]
        source: PatternError,
    },
    #[error("Connection {name}: {source}")]
    Connection {
        name: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Maximum number of days a ledger date may differ from the statement date.
    #[serde(default = "default_epsilon")]
    pub epsilon: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

fn default_epsilon() -> u32 {
    DEFAULT_EPSILON
}

/// Binding of one bank account (by account number) to a statement format and
/// the ledger accounts it is reconciled against.
#[derive(Debug, Clone, Deserialize)]
pub struct ImporterConfig {
    pub format: String,
    pub connection: String,
    /// Glob over ledger account full names. For writes `*` becomes the currency.
    pub account: String,
    /// Counter account template for `--update`.
    #[serde(default)]
    pub update: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
    #[serde(default)]
    pub formats: BTreeMap<String, StatementFormat>,
    #[serde(default)]
    pub importers: BTreeMap<String, ImporterConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_toml(&text)?;
        tracing::debug!(
            path = %path.display(),
            importers = config.importers.len(),
            formats = config.formats.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references so a typo fails before any statement is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, location) in &self.connections {
            LedgerLocation::parse(location).map_err(|source| ConfigError::Connection {
                name: name.clone(),
                source,
            })?;
        }

        for (id, importer) in &self.importers {
            if !self.formats.contains_key(&importer.format) {
                return Err(ConfigError::UnknownFormat {
                    importer: id.clone(),
                    format: importer.format.clone(),
                });
            }
            if !self.connections.contains_key(&importer.connection) {
                return Err(ConfigError::UnknownConnection {
                    importer: id.clone(),
                    connection: importer.connection.clone(),
                });
            }
            GlobPattern::new(&importer.account).map_err(|source| ConfigError::AccountPattern {
                importer: id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Whether any connection is a server book that takes a login.
    pub fn requires_credentials(&self) -> bool {
        self.connections
            .values()
            .filter_map(|location| LedgerLocation::parse(location).ok())
            .any(|location| location.requires_credentials())
    }

    pub fn importer(&self, id: &str) -> Option<&ImporterConfig> {
        self.importers.get(id)
    }

    pub fn format(&self, name: &str) -> Option<&StatementFormat> {
        self.formats.get(name)
    }
}
