use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::schema::EntitySchema;
use crate::database::DatabaseConnection;
use crate::language_utils::{normalize_code, validate_language_code};
use crate::languages::{LanguageContext, LanguageSettings};

/// Application configuration module
/// This module handles loading, validating and saving the language set,
/// the database location and the declared entity schemas.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Configured languages, in fallback-listing order
    pub languages: Vec<LanguageConfig>,

    /// Default language code, must be one of `languages`
    pub default_language: String,

    /// Database config
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Translated entity declarations
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
}

/// One configured language
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Language code such as `cs` or `en-us`
    pub code: String,

    /// Display name; derived from the code when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LanguageConfig {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            name: None,
        }
    }
}

/// Database location
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DatabaseConfig {
    /// Database file; the user data directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open config file: {:?}", path))?;

        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Write configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_json =
            serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;

        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write config to file: {:?}", path))?;
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            return Err(anyhow!("At least one language must be configured"));
        }

        for language in &self.languages {
            validate_language_code(&language.code)
                .with_context(|| format!("Invalid language entry '{}'", language.code))?;
        }

        let settings = self.language_settings()?;

        let mut names = std::collections::BTreeSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name.as_str()) {
                return Err(anyhow!("Entity '{}' is declared twice", entity.name));
            }
            entity
                .validate(&settings)
                .with_context(|| format!("Invalid declaration for entity '{}'", entity.name))?;
        }

        Ok(())
    }

    /// Validated language settings with configured display names
    pub fn language_settings(&self) -> Result<LanguageSettings> {
        let codes: Vec<&str> = self.languages.iter().map(|l| l.code.as_str()).collect();
        let mut settings = LanguageSettings::new(&codes, &self.default_language)?;
        for language in &self.languages {
            if let Some(name) = &language.name {
                settings = settings.with_name(&language.code, name)?;
            }
        }
        Ok(settings)
    }

    /// A fresh language context for this configuration
    pub fn language_context(&self) -> Result<LanguageContext> {
        Ok(LanguageContext::new(Arc::new(self.language_settings()?)))
    }

    /// Configured database path, or the default location
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(DatabaseConnection::default_database_path()?),
        }
    }

    /// Whether `code` is one of the configured languages
    pub fn has_language(&self, code: &str) -> bool {
        let code = normalize_code(code);
        self.languages.iter().any(|l| normalize_code(&l.code) == code)
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            languages: vec![LanguageConfig::new("en")],
            default_language: "en".to_string(),
            database: DatabaseConfig::default(),
            log_level: LogLevel::default(),
            entities: Vec::new(),
        }
    }
}
