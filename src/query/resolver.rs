/*!
 * Field reference resolution.
 *
 * Every field name a caller writes (attribute reads, filters, ordering
 * keys, projections, writes) is classified here and nowhere else:
 *
 * - `description` on a master column is a plain field,
 * - `title` is the translatable field in the active language (implicit),
 * - `title_en` is the translatable field fixed to `en` (explicit).
 */

use std::collections::HashMap;

use crate::database::schema::EntitySchema;
use crate::errors::{MultilingualError, Result};
use crate::language_utils::validate_language_code;
use crate::languages::LanguageSettings;

/// How a translatable field picks its language
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LanguageMode {
    /// Active language, then the configured default
    Implicit,
    /// Exactly this language, no fallback
    Explicit(String),
}

/// A classified field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// Column of the master table
    Plain(String),
    /// Column of the translation table
    Translated { field: String, mode: LanguageMode },
}

/// Classify `name` against `schema`
pub fn resolve_field(schema: &EntitySchema, languages: &LanguageSettings, name: &str) -> Result<FieldRef> {
    if schema.is_master_field(name) {
        return Ok(FieldRef::Plain(name.to_string()));
    }

    if schema.is_translatable(name) {
        return Ok(FieldRef::Translated {
            field: name.to_string(),
            mode: LanguageMode::Implicit,
        });
    }

    let mut unknown_code = None;
    for field in &schema.translatable_fields {
        let Some(suffix) = name
            .strip_prefix(field.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            continue;
        };

        if let Some(code) = languages.code_for_suffix(suffix) {
            return Ok(FieldRef::Translated {
                field: field.clone(),
                mode: LanguageMode::Explicit(code.to_string()),
            });
        }
        if validate_language_code(suffix).is_ok() {
            unknown_code = Some(suffix.replace('_', "-"));
        }
    }

    match unknown_code {
        Some(code) => Err(MultilingualError::UnknownLanguage(code)),
        None => Err(MultilingualError::resolution(&schema.name, name)),
    }
}

/// Resolver that classifies each distinct name once per query or operation
#[derive(Debug)]
pub struct FieldResolver<'a> {
    schema: &'a EntitySchema,
    languages: &'a LanguageSettings,
    cache: HashMap<String, FieldRef>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(schema: &'a EntitySchema, languages: &'a LanguageSettings) -> Self {
        Self {
            schema,
            languages,
            cache: HashMap::new(),
        }
    }

    /// Classify `name`, reusing an earlier result for the same name
    pub fn resolve(&mut self, name: &str) -> Result<FieldRef> {
        if let Some(found) = self.cache.get(name) {
            return Ok(found.clone());
        }
        let resolved = resolve_field(self.schema, self.languages, name)?;
        self.cache.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Number of distinct names resolved so far
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
