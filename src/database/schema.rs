/*!
 * Translation schema definitions.
 *
 * An `EntitySchema` describes one logical entity: its master table, its
 * translation table, the foreign key linking them and which fields live in
 * which table. The `SchemaRegistry` validates schemas against the language
 * configuration and the live database before they can be queried.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::errors::{MultilingualError, Result};
use crate::language_utils::field_suffix;
use crate::languages::LanguageSettings;

/// Current bookkeeping schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Column holding the language code in every translation table
pub const LANGUAGE_COLUMN: &str = "language_code";

/// Primary key column of master and translation tables
pub const PRIMARY_KEY: &str = "id";

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Quote a table or column name for generated SQL
///
/// Field names may be SQL keywords (`order`, `group`), so every identifier
/// the crate emits goes through here.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn default_link_field() -> String {
    "master_id".to_string()
}

/// Static description of one translated entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name used by callers
    pub name: String,
    /// Table holding language-invariant fields
    pub master_table: String,
    /// Table holding one row per (entity, language)
    pub translation_table: String,
    /// Foreign key column in the translation table
    #[serde(default = "default_link_field")]
    pub link_field: String,
    /// Plain fields of the master table, excluding the primary key
    #[serde(default)]
    pub master_fields: Vec<String>,
    /// Fields stored per language
    pub translatable_fields: Vec<String>,
}

impl EntitySchema {
    /// Schema with conventional table names: `<name>` and `<name>_translation`
    pub fn new(name: &str, master_fields: &[&str], translatable_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            master_table: name.to_string(),
            translation_table: format!("{}_translation", name),
            link_field: default_link_field(),
            master_fields: master_fields.iter().map(|f| f.to_string()).collect(),
            translatable_fields: translatable_fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Whether `field` is a plain master field (the primary key included)
    pub fn is_master_field(&self, field: &str) -> bool {
        field == PRIMARY_KEY || self.master_fields.iter().any(|f| f == field)
    }

    /// Whether `field` is stored per language
    pub fn is_translatable(&self, field: &str) -> bool {
        self.translatable_fields.iter().any(|f| f == field)
    }

    /// Handle used to address the translation table
    pub fn translation_model(&self) -> TranslationModel<'_> {
        TranslationModel {
            table: &self.translation_table,
            link_field: &self.link_field,
            language_column: LANGUAGE_COLUMN,
            fields: &self.translatable_fields,
        }
    }

    /// Check names and collisions that do not need a database
    pub fn validate(&self, languages: &LanguageSettings) -> Result<()> {
        let identifiers = [&self.name, &self.master_table, &self.translation_table, &self.link_field]
            .into_iter()
            .chain(&self.master_fields)
            .chain(&self.translatable_fields);
        for ident in identifiers {
            if !IDENTIFIER_REGEX.is_match(ident) || ident.contains("__") {
                return Err(MultilingualError::Schema(format!(
                    "'{}' is not a valid identifier for entity '{}'",
                    ident, self.name
                )));
            }
        }

        if self.master_table == self.translation_table {
            return Err(MultilingualError::Schema(format!(
                "Entity '{}' uses the same table for master and translations",
                self.name
            )));
        }

        if self.translatable_fields.is_empty() {
            return Err(MultilingualError::Schema(format!(
                "Entity '{}' declares no translatable fields",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for field in self.master_fields.iter().chain(&self.translatable_fields) {
            if !seen.insert(field.as_str()) {
                return Err(MultilingualError::Schema(format!(
                    "Field '{}' of entity '{}' is declared twice or in both tables",
                    field, self.name
                )));
            }
        }

        let reserved = [PRIMARY_KEY, self.link_field.as_str(), LANGUAGE_COLUMN];
        for field in &self.translatable_fields {
            if reserved.contains(&field.as_str()) {
                return Err(MultilingualError::Schema(format!(
                    "Translatable field '{}' of entity '{}' shadows a reserved column",
                    field, self.name
                )));
            }
        }
        if self.master_fields.iter().any(|f| f == PRIMARY_KEY) {
            return Err(MultilingualError::Schema(format!(
                "Entity '{}' lists the primary key among its master fields",
                self.name
            )));
        }

        // `title_en` must not be both a master column and an explicit field
        for field in &self.translatable_fields {
            for code in languages.codes() {
                let explicit = format!("{}_{}", field, field_suffix(code));
                if self.is_master_field(&explicit) || self.is_translatable(&explicit) {
                    return Err(MultilingualError::Schema(format!(
                        "Field '{}' of entity '{}' collides with the explicit field for '{}'",
                        explicit, self.name, code
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Borrowed handle on a translation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationModel<'a> {
    pub table: &'a str,
    pub link_field: &'a str,
    pub language_column: &'static str,
    pub fields: &'a [String],
}

/// Registered entity schemas keyed by entity type
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    languages: Arc<LanguageSettings>,
    entities: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    /// Empty registry for the given language configuration
    pub fn new(languages: Arc<LanguageSettings>) -> Self {
        Self {
            languages,
            entities: BTreeMap::new(),
        }
    }

    /// Language configuration the schemas were validated against
    pub fn languages(&self) -> &LanguageSettings {
        &self.languages
    }

    /// Validate `schema` against the database and add it
    ///
    /// Both tables must exist with the declared columns, and the
    /// translation table must carry a uniqueness constraint on
    /// (link field, language code).
    pub fn register(&mut self, conn: &Connection, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        schema.validate(&self.languages)?;

        if self.entities.contains_key(&schema.name) {
            return Err(MultilingualError::Schema(format!(
                "Entity '{}' is already registered",
                schema.name
            )));
        }

        let master_columns = table_columns(conn, &schema.master_table)?;
        require_columns(
            &schema.master_table,
            &master_columns,
            std::iter::once(PRIMARY_KEY).chain(schema.master_fields.iter().map(String::as_str)),
        )?;

        let translation_columns = table_columns(conn, &schema.translation_table)?;
        require_columns(
            &schema.translation_table,
            &translation_columns,
            [PRIMARY_KEY, schema.link_field.as_str(), LANGUAGE_COLUMN]
                .into_iter()
                .chain(schema.translatable_fields.iter().map(String::as_str)),
        )?;

        if !has_unique_pair(conn, &schema.translation_table, &schema.link_field)? {
            return Err(MultilingualError::Schema(format!(
                "Table '{}' needs a UNIQUE constraint on ({}, {})",
                schema.translation_table, schema.link_field, LANGUAGE_COLUMN
            )));
        }

        info!(
            "Registered entity '{}' ({} + {})",
            schema.name, schema.master_table, schema.translation_table
        );
        let schema = Arc::new(schema);
        self.entities.insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Create the tables for `schema` if missing, then register it
    pub fn create_and_register(&mut self, conn: &Connection, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        schema.validate(&self.languages)?;
        create_tables(conn, &schema)?;
        self.register(conn, schema)
    }

    /// Look up a registered entity type
    pub fn get(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        self.entities.get(entity_type).cloned().ok_or_else(|| {
            MultilingualError::Schema(format!("Entity '{}' is not registered", entity_type))
        })
    }

    /// Whether `field` of `entity_type` is stored per language
    pub fn is_translatable(&self, entity_type: &str, field: &str) -> Result<bool> {
        Ok(self.get(entity_type)?.is_translatable(field))
    }

    /// Handle addressing the translation table of `entity_type`
    pub fn translation_model_for(&self, entity_type: &str) -> Result<TranslationModel<'_>> {
        self.entities
            .get(entity_type)
            .map(|schema| schema.translation_model())
            .ok_or_else(|| {
                MultilingualError::Schema(format!("Entity '{}' is not registered", entity_type))
            })
    }

    /// Registered entity type names
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// Create the bookkeeping table and record the schema version
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    let current_version = get_schema_version(conn)?;
    if current_version == 0 {
        info!("Initializing database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(MultilingualError::Configuration(format!(
            "Database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        debug!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get(0)
    })?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
        rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// DDL for the master and translation tables of `schema`
///
/// Field columns carry no declared type, so values keep the storage class
/// they were written with.
pub fn table_ddl(schema: &EntitySchema) -> String {
    let pk = quote_ident(PRIMARY_KEY);
    let lang = quote_ident(LANGUAGE_COLUMN);
    let link = quote_ident(&schema.link_field);
    let master = quote_ident(&schema.master_table);
    let translation = quote_ident(&schema.translation_table);

    let mut master_columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", pk)];
    master_columns.extend(schema.master_fields.iter().map(|f| quote_ident(f)));

    let mut translation_columns = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", pk),
        format!(
            "{} INTEGER NOT NULL REFERENCES {}({}) ON DELETE CASCADE",
            link, master, pk
        ),
        format!("{} TEXT NOT NULL", lang),
    ];
    translation_columns.extend(schema.translatable_fields.iter().map(|f| quote_ident(f)));
    translation_columns.push(format!("UNIQUE({}, {})", link, lang));

    format!(
        "CREATE TABLE IF NOT EXISTS {master} (\n    {master_cols}\n);\n\
         CREATE TABLE IF NOT EXISTS {translation} (\n    {translation_cols}\n);\n\
         CREATE INDEX IF NOT EXISTS {index} ON {translation}({lang});\n",
        master = master,
        master_cols = master_columns.join(",\n    "),
        translation = translation,
        translation_cols = translation_columns.join(",\n    "),
        index = quote_ident(&format!("idx_{}_{}", schema.translation_table, LANGUAGE_COLUMN)),
        lang = lang,
    )
}

/// Create the tables of `schema` if they do not exist
pub fn create_tables(conn: &Connection, schema: &EntitySchema) -> Result<()> {
    conn.execute_batch(&table_ddl(schema))?;
    info!("Created tables for entity '{}'", schema.name);
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;

    if columns.is_empty() {
        return Err(MultilingualError::Schema(format!("Table '{}' does not exist", table)));
    }
    Ok(columns)
}

fn require_columns<'a>(
    table: &str,
    columns: &BTreeSet<String>,
    required: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for column in required {
        if !columns.contains(column) {
            return Err(MultilingualError::Schema(format!(
                "Table '{}' has no column '{}'",
                table, column
            )));
        }
    }
    Ok(())
}

fn has_unique_pair(conn: &Connection, table: &str, link_field: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")?;
    let indexes = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let expected: BTreeSet<&str> = [link_field, LANGUAGE_COLUMN].into_iter().collect();
    for index in indexes {
        let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
        let columns = info
            .query_map([&index], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        let columns: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
        if columns == expected {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Drop the tables of `schema` (for testing purposes only)
#[cfg(test)]
pub fn drop_tables(conn: &Connection, schema: &EntitySchema) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
        quote_ident(&schema.translation_table),
        quote_ident(&schema.master_table)
    ))?;
    Ok(())
}
