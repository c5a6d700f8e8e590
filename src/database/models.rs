/*!
 * Entity models and values.
 *
 * A logical entity is materialized as an `Entity`: its master row plus the
 * translation rows fetched with it. Virtual field reads go through the
 * same resolver the query planner uses, so attribute access and queries
 * agree on what `title` or `title_en` means.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use super::schema::EntitySchema;
use crate::errors::{MultilingualError, Result};
use crate::languages::LanguageContext;
use crate::query::resolver::{FieldRef, LanguageMode, resolve_field};

/// A dynamically-typed column value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Whether the value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text content, if this is a text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Parse a command-line literal: `null`, integers, reals, else text
    pub fn parse_literal(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            Value::Null
        } else if let Ok(i) = raw.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Value::Real(f)
        } else {
            Value::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        })
    }
}

/// One row of the translation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    /// Primary key of the translation row
    pub id: i64,
    /// Primary key of the owning master row
    pub master_id: i64,
    /// Language of this row
    pub language_code: String,
    /// Translatable field values
    pub fields: BTreeMap<String, Value>,
}

impl TranslationRow {
    /// Value of a translatable field, NULL when unset
    pub fn get(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }
}

/// Which translation rows were fetched with an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedTranslations {
    /// Nothing fetched yet; see `TranslationRepository::load_translations`
    Deferred,
    /// Only these languages were fetched (select-related)
    Languages(BTreeSet<String>),
    /// Every translation row of the entity was fetched
    All,
}

impl LoadedTranslations {
    fn covers(&self, code: &str) -> bool {
        match self {
            LoadedTranslations::Deferred => false,
            LoadedTranslations::Languages(codes) => codes.contains(code),
            LoadedTranslations::All => true,
        }
    }
}

/// A materialized logical entity
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    /// Master primary key
    pub id: i64,
    /// Plain master field values
    pub fields: BTreeMap<String, Value>,
    translations: BTreeMap<String, TranslationRow>,
    loaded: LoadedTranslations,
}

impl Entity {
    pub(crate) fn new(schema: Arc<EntitySchema>, id: i64, fields: BTreeMap<String, Value>) -> Self {
        Self {
            schema,
            id,
            fields,
            translations: BTreeMap::new(),
            loaded: LoadedTranslations::Deferred,
        }
    }

    /// Entity type name
    pub fn entity_type(&self) -> &str {
        &self.schema.name
    }

    /// Schema the entity was fetched with
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Translation row for `code`, if one was fetched
    pub fn translation(&self, code: &str) -> Option<&TranslationRow> {
        self.translations.get(code)
    }

    /// All fetched translation rows keyed by language
    pub fn translations(&self) -> &BTreeMap<String, TranslationRow> {
        &self.translations
    }

    /// Which translation rows were fetched
    pub fn loaded(&self) -> &LoadedTranslations {
        &self.loaded
    }

    pub(crate) fn set_translations(
        &mut self,
        rows: impl IntoIterator<Item = TranslationRow>,
        loaded: LoadedTranslations,
    ) {
        self.translations = rows
            .into_iter()
            .map(|row| (row.language_code.clone(), row))
            .collect();
        self.loaded = loaded;
    }

    pub(crate) fn put_translation(&mut self, row: TranslationRow) {
        match &mut self.loaded {
            LoadedTranslations::All => {}
            LoadedTranslations::Languages(codes) => {
                codes.insert(row.language_code.clone());
            }
            LoadedTranslations::Deferred => {
                self.loaded = LoadedTranslations::Languages(BTreeSet::from([row.language_code.clone()]));
            }
        }
        self.translations.insert(row.language_code.clone(), row);
    }

    /// Record the fetched row for `code`, or its absence
    pub(crate) fn cover_language(&mut self, code: &str, row: Option<TranslationRow>) {
        match row {
            Some(row) => self.put_translation(row),
            None => match &mut self.loaded {
                LoadedTranslations::All => {}
                LoadedTranslations::Languages(codes) => {
                    codes.insert(code.to_string());
                }
                LoadedTranslations::Deferred => {
                    self.loaded = LoadedTranslations::Languages(BTreeSet::from([code.to_string()]));
                }
            },
        }
    }

    /// Languages `field` reads from that were not fetched yet
    pub(crate) fn missing_languages(&self, field: &str, ctx: &LanguageContext) -> Result<Vec<String>> {
        let chain = match resolve_field(&self.schema, ctx.settings(), field)? {
            FieldRef::Plain(_) => return Ok(Vec::new()),
            FieldRef::Translated {
                mode: LanguageMode::Implicit,
                ..
            } => ctx.active_chain(),
            FieldRef::Translated {
                mode: LanguageMode::Explicit(code),
                ..
            } => vec![code],
        };
        Ok(chain.into_iter().filter(|code| !self.loaded.covers(code)).collect())
    }

    pub(crate) fn remove_translations_except(&mut self, keep: &[String]) {
        self.translations.retain(|code, _| keep.contains(code));
    }

    /// Read a plain, implicit or explicit field
    ///
    /// Implicit fields return the first non-null value along the active
    /// language's fallback chain. Explicit fields return the value stored
    /// for that language only. Missing translation rows read as NULL.
    /// A language the fetch did not cover fails with `TranslationNotLoaded`;
    /// `TranslationRepository::get_field` loads it instead.
    pub fn get(&self, field: &str, ctx: &LanguageContext) -> Result<Value> {
        match resolve_field(&self.schema, ctx.settings(), field)? {
            FieldRef::Plain(name) => {
                if name == "id" {
                    return Ok(Value::Integer(self.id));
                }
                Ok(self.fields.get(&name).cloned().unwrap_or_default())
            }
            FieldRef::Translated { field, mode } => {
                let chain = match mode {
                    LanguageMode::Implicit => ctx.active_chain(),
                    LanguageMode::Explicit(code) => vec![code],
                };
                for code in &chain {
                    if !self.loaded.covers(code) {
                        return Err(MultilingualError::TranslationNotLoaded {
                            entity: self.schema.name.clone(),
                            id: self.id,
                            code: code.clone(),
                        });
                    }
                    if let Some(row) = self.translations.get(code) {
                        let value = row.get(&field);
                        if !value.is_null() {
                            return Ok(value.clone());
                        }
                    }
                }
                Ok(Value::Null)
            }
        }
    }

    /// Read a field as text, `None` for NULL
    pub fn get_str(&self, field: &str, ctx: &LanguageContext) -> Result<Option<String>> {
        Ok(match self.get(field, ctx)? {
            Value::Null => None,
            Value::Text(s) => Some(s),
            other => Some(other.to_string()),
        })
    }
}

/// Values for a new entity, split into master and per-language parts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDraft {
    /// Plain master field values
    pub plain: BTreeMap<String, Value>,
    /// Translatable values keyed by language code, then field
    pub translations: BTreeMap<String, BTreeMap<String, Value>>,
}

impl EntityDraft {
    /// Empty draft
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain master field
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.plain.insert(field.to_string(), value.into());
        self
    }

    /// Set a translatable field for one language
    pub fn translate(mut self, code: &str, field: &str, value: impl Into<Value>) -> Self {
        self.translations
            .entry(code.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
        self
    }

    /// Build a draft from virtual field names such as `name_cs` or `name`
    ///
    /// Implicit names are written to the active language.
    pub fn from_fields(
        schema: &EntitySchema,
        ctx: &LanguageContext,
        values: &[(&str, Value)],
    ) -> Result<Self> {
        let mut draft = Self::new();
        for (name, value) in values {
            match resolve_field(schema, ctx.settings(), name)? {
                FieldRef::Plain(field) => {
                    draft.plain.insert(field, value.clone());
                }
                FieldRef::Translated { field, mode } => {
                    let code = match mode {
                        LanguageMode::Implicit => ctx.get_active(),
                        LanguageMode::Explicit(code) => code,
                    };
                    draft
                        .translations
                        .entry(code)
                        .or_default()
                        .insert(field, value.clone());
                }
            }
        }
        Ok(draft)
    }

    /// Languages with at least one non-null value, which get a row on create
    pub fn populated_languages(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Value>)> {
        self.translations
            .iter()
            .filter(|(_, fields)| fields.values().any(|v| !v.is_null()))
    }
}

/// A projected row from `values`/`values_list`, in request order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuesRow {
    pub columns: Vec<(String, Value)>,
}

impl ValuesRow {
    /// Get a column value by requested name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Column values without names
    pub fn into_values(self) -> Vec<Value> {
        self.columns.into_iter().map(|(_, v)| v).collect()
    }
}
