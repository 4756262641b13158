use std::fs;
use std::path::Path;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::migration::{ModelRowPolicy, TargetSchema};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub tpymigrate: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const TPYMIGRATE_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            tpymigrate: Self::TPYMIGRATE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.tpymigrate.clone();
        self.tpymigrate = self.tpymigrate.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.tpymigrate.as_str()) {
            eprintln!(
                "Config error: tpymigrate log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::TPYMIGRATE_LEVEL
            );
            self.tpymigrate = Self::TPYMIGRATE_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

impl DatabaseConfig {
    const DB_PATH: &str = "tpy_metrics.db";

    fn default() -> Self {
        DatabaseConfig {
            path: Self::DB_PATH.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        if self.path.trim().is_empty() {
            eprintln!(
                "Config error: database path is empty - using default of '{}'",
                Self::DB_PATH
            );
            self.path = Self::DB_PATH.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    target: String,
    model_rows: String,
    sample_size: usize,
}

impl MigrationConfig {
    const TARGET: &str = "normalized";
    // "default" defers to the target's own policy
    const MODEL_ROWS_DEFAULT: &str = "default";
    const SAMPLE_SIZE: usize = 5;

    pub fn target(&self) -> TargetSchema {
        // ensure_valid has already vetted the string
        self.target.parse().unwrap_or(TargetSchema::Normalized)
    }

    /// `None` means the target's default policy applies.
    pub fn model_rows(&self) -> Option<ModelRowPolicy> {
        self.model_rows.parse().ok()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn default() -> Self {
        MigrationConfig {
            target: Self::TARGET.to_owned(),
            model_rows: Self::MODEL_ROWS_DEFAULT.to_owned(),
            sample_size: Self::SAMPLE_SIZE,
        }
    }

    fn ensure_valid(&mut self) {
        let mut str_original = self.target.clone();
        self.target = self.target.trim().to_ascii_lowercase();
        if self.target.parse::<TargetSchema>().is_err() {
            eprintln!(
                "Config error: migration target of '{}' is invalid - using default of '{}'",
                str_original,
                Self::TARGET
            );
            self.target = Self::TARGET.to_owned();
        }

        str_original = self.model_rows.clone();
        self.model_rows = self.model_rows.trim().to_ascii_lowercase();
        if self.model_rows != Self::MODEL_ROWS_DEFAULT
            && self.model_rows.parse::<ModelRowPolicy>().is_err()
        {
            eprintln!(
                "Config error: model_rows of '{}' is invalid - using default of '{}'",
                str_original,
                Self::MODEL_ROWS_DEFAULT
            );
            self.model_rows = Self::MODEL_ROWS_DEFAULT.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub migration: MigrationConfig,
}

impl Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            migration: MigrationConfig::default(),
        }
    }

    /// Loads the configuration from `config.toml` in the app's data directory,
    /// overlaid with `TPYMIGRATE_` environment variables (`TPYMIGRATE_DATABASE__PATH`).
    /// Writes the defaults to disk if no file exists. On a parse failure the
    /// defaults are used.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");
        let default_config = Config::default();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                if let Err(e) = fs::write(&config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        Self::extract(Self::figment(&config_path), &config_path, default_config)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TPYMIGRATE_").split("__"))
    }

    fn extract(figment: Figment, config_path: &Path, default_config: Config) -> Self {
        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();
        config
    }

    /// The loaded configuration, or the defaults if none was loaded.
    pub fn get() -> Config {
        CONFIG.get().cloned().unwrap_or_else(Config::default)
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.migration.ensure_valid();
    }
}
