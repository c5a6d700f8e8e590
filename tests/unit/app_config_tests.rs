/*!
 * Tests for application configuration
 */

use std::sync::Arc;

use anyhow::Result;
use multilingual::app_config::{Config, LanguageConfig, LogLevel};
use multilingual::{DatabaseConnection, TranslationRepository};
use tempfile::TempDir;
use crate::common;

fn test_config(dir: &TempDir) -> Config {
    Config {
        languages: common::LANGUAGES.iter().map(|c| LanguageConfig::new(c)).collect(),
        default_language: "cs".to_string(),
        database: multilingual::app_config::DatabaseConfig {
            path: Some(dir.path().join("data").join("store.db")),
        },
        log_level: LogLevel::Debug,
        entities: vec![common::basic_schema(), common::managing_schema()],
    }
}

#[test]
fn test_default_config_shouldValidate() {
    assert!(Config::default().validate().is_ok());
}

#[test]
fn test_config_withDuplicateEntity_shouldFailValidation() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.entities.push(common::basic_schema());
    assert!(config.validate().is_err());
}

#[test]
fn test_config_withDuplicateLanguage_shouldFailValidation() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.languages.push(LanguageConfig::new("EN"));
    assert!(config.validate().is_err());
}

#[test]
fn test_config_fileRoundTrip_shouldOpenRepository() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("conf.json");
    test_config(&dir).save(&path)?;

    let config = Config::from_file(&path)?;
    config.validate()?;

    let settings = Arc::new(config.language_settings()?);
    let db = DatabaseConnection::new(config.database_path()?)?;
    let repo = TranslationRepository::open(db, Arc::clone(&settings), config.entities.clone(), true)?;

    let ctx = config.language_context()?;
    common::create_basic(&repo, "d", &[("cs", Some("obsah"))]);
    assert_eq!(repo.count(&ctx, &multilingual::Query::new("basic"))?, 1);
    assert!(dir.path().join("data").join("store.db").exists());
    Ok(())
}

#[test]
fn test_config_reopenWithoutCreate_shouldRegisterExistingTables() -> Result<()> {
    let dir = TempDir::new()?;
    let config = test_config(&dir);
    let settings = Arc::new(config.language_settings()?);

    {
        let db = DatabaseConnection::new(config.database_path()?)?;
        TranslationRepository::open(db, Arc::clone(&settings), config.entities.clone(), true)?;
    }

    let db = DatabaseConnection::new(config.database_path()?)?;
    let repo = TranslationRepository::open(db, settings, config.entities.clone(), false)?;
    assert_eq!(repo.registry().entity_types().count(), 2);
    Ok(())
}
