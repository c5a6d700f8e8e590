/*!
 * # multilingual - per-language translations over a relational store
 *
 * A logical entity is split into a master row holding language-invariant
 * fields and one translation row per populated language. Callers read and
 * query through virtual field names:
 *
 * - `description`: a plain master field
 * - `title`: the translatable field in the active language, falling back
 *   to the configured default language
 * - `title_en`: the translatable field in English only
 *
 * ## Architecture
 *
 * - `languages`: active-language context with a lock/release stack
 * - `database::schema`: entity descriptors and the schema registry
 * - `query::resolver`: classification of virtual field names
 * - `query::planner`: translation of queries into SQL
 * - `database::repository`: create/update/delete/fetch of entities
 * - `app_config`: JSON configuration
 * - `errors`: error types
 *
 * ## Example
 *
 * ```no_run
 * use std::sync::Arc;
 * use multilingual::{EntityDraft, EntitySchema, LanguageSettings, LanguageContext,
 *                    Predicate, Query, TranslationRepository};
 *
 * # fn main() -> multilingual::Result<()> {
 * let settings = Arc::new(LanguageSettings::new(&["cs", "en"], "cs")?);
 * let repo = TranslationRepository::new_in_memory(
 *     Arc::clone(&settings),
 *     [EntitySchema::new("basic", &["description"], &["title"])],
 * )?;
 * let ctx = LanguageContext::new(settings);
 *
 * repo.create("basic", &EntityDraft::new().set("description", "d").translate("cs", "title", "obsah"))?;
 *
 * let _guard = ctx.scoped("en")?;
 * let found = repo.values_list_flat(&ctx, &Query::new("basic").filter(Predicate::new("title", "obsah")), "title")?;
 * assert_eq!(found.len(), 1);
 * # Ok(())
 * # }
 * ```
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod database;
pub mod errors;
pub mod language_utils;
pub mod languages;
pub mod query;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::{
    DatabaseConnection, Entity, EntityDraft, EntitySchema, SchemaRegistry, TranslationRepository,
    Value,
};
pub use errors::{MultilingualError, Result};
pub use languages::{LanguageContext, LanguageLock, LanguageSettings};
pub use query::{FetchStrategy, Predicate, Projection, Query, TranslationQueryPlanner};
