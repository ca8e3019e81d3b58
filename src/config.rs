// ⚙️ Configuration - built once, injected into the store
//
// Resolution priority (highest first):
// 1. Command-line flag
// 2. Environment variable
// 3. TOML config file
// 4. Compiled default

use crate::error::{ConsolidationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "LEGACY_CONSOLIDATION_DB";
pub const ENV_UPDATE_USER: &str = "LEGACY_CONSOLIDATION_USER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// SQLite database file
    pub database: PathBuf,

    /// Written to CreatedBy / LastModifiedBy of canonical customers
    pub update_user: String,

    /// Directory relative legacy export paths are resolved against
    pub data_dir: PathBuf,

    /// Legacy orders live in `legacy_email_orders{suffix}`
    pub orders_table_suffix: String,

    /// Legacy wines live in `legacy_wine_master{suffix}`
    pub wines_table_suffix: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        ConsolidationConfig {
            database: PathBuf::from("consolidation.db"),
            update_user: "Gillian".to_string(),
            data_dir: PathBuf::from("data/infile"),
            orders_table_suffix: "_1002".to_string(),
            wines_table_suffix: "_1106".to_string(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub update_user: Option<String>,
}

impl ConsolidationConfig {
    /// Parse a TOML file; keys not present keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConsolidationError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ConsolidationConfig = toml::from_str(&text).map_err(|e| {
            ConsolidationError::Config(format!("invalid {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply file, environment and flags on top of the defaults
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match &overrides.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(db) = std::env::var(ENV_DATABASE) {
            config.database = PathBuf::from(db);
        }
        if let Ok(user) = std::env::var(ENV_UPDATE_USER) {
            config.update_user = user;
        }

        if let Some(db) = &overrides.database {
            config.database = db.clone();
        }
        if let Some(user) = &overrides.update_user {
            config.update_user = user.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Suffixes are spliced into table names, so keep them to [A-Za-z0-9_]
    pub fn validate(&self) -> Result<()> {
        for (name, suffix) in [
            ("orders_table_suffix", &self.orders_table_suffix),
            ("wines_table_suffix", &self.wines_table_suffix),
        ] {
            if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ConsolidationError::Config(format!(
                    "{} '{}' may only contain letters, digits and '_'",
                    name, suffix
                )));
            }
        }

        if self.update_user.trim().is_empty() {
            return Err(ConsolidationError::Config(
                "update_user must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn orders_table(&self) -> String {
        format!("legacy_email_orders{}", self.orders_table_suffix)
    }

    pub fn wines_table(&self) -> String {
        format!("legacy_wine_master{}", self.wines_table_suffix)
    }

    /// Relative paths resolve against `data_dir`
    pub fn data_file(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }
}
