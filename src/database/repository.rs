/*!
 * Repository layer for translated entities.
 *
 * `TranslationRepository` is the single entry point for reading and writing
 * logical entities. Reads go through the query planner; writes keep the
 * master row and its translation rows consistent inside one transaction
 * per operation.
 */

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use log::debug;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use super::connection::DatabaseConnection;
use super::models::{Entity, EntityDraft, LoadedTranslations, TranslationRow, Value, ValuesRow};
use super::schema::{quote_ident, EntitySchema, SchemaRegistry, LANGUAGE_COLUMN, PRIMARY_KEY};
use crate::errors::{MultilingualError, Result};
use crate::language_utils::field_suffix;
use crate::languages::{LanguageContext, LanguageSettings};
use crate::query::{
    FetchStrategy, FieldRef, FieldResolver, LanguageMode, PhysicalQuery, Predicate, Projection,
    Query, RowLayout, TranslationQueryPlanner,
};

/// Master ids per batched translation load
const PREFETCH_CHUNK_SIZE: usize = 500;

/// Repository for translated entities
#[derive(Clone)]
pub struct TranslationRepository {
    /// Database connection
    db: DatabaseConnection,
    registry: Arc<SchemaRegistry>,
}

impl TranslationRepository {
    /// Create a repository over an already populated registry
    pub fn new(db: DatabaseConnection, registry: SchemaRegistry) -> Self {
        Self {
            db,
            registry: Arc::new(registry),
        }
    }

    /// Register `schemas`, creating missing tables when `create_tables` is set
    pub fn open(
        db: DatabaseConnection,
        languages: Arc<LanguageSettings>,
        schemas: impl IntoIterator<Item = EntitySchema>,
        create_tables: bool,
    ) -> Result<Self> {
        let mut registry = SchemaRegistry::new(languages);
        db.execute(|conn| {
            for schema in schemas {
                if create_tables {
                    registry.create_and_register(conn, schema)?;
                } else {
                    registry.register(conn, schema)?;
                }
            }
            Ok(())
        })?;
        Ok(Self::new(db, registry))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory(
        languages: Arc<LanguageSettings>,
        schemas: impl IntoIterator<Item = EntitySchema>,
    ) -> Result<Self> {
        Self::open(DatabaseConnection::new_in_memory()?, languages, schemas, true)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Planner bound to `ctx`, which must share the registry's languages
    fn planner<'a>(&'a self, ctx: &'a LanguageContext) -> Result<TranslationQueryPlanner<'a>> {
        if ctx.settings() != self.registry.languages() {
            return Err(MultilingualError::Configuration(
                "Language context was configured with a different language set".to_string(),
            ));
        }
        Ok(TranslationQueryPlanner::new(&self.registry, ctx))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create an entity and one translation row per populated language
    ///
    /// Languages whose supplied values are all NULL get no row. The master
    /// row and every translation row are written in one transaction.
    pub fn create(&self, entity_type: &str, draft: &EntityDraft) -> Result<Entity> {
        let schema = self.registry.get(entity_type)?;
        let translations = check_draft(&schema, self.registry.languages(), draft)?;

        self.db
            .transaction(|tx| insert_entity(tx, &schema, &draft.plain, &translations))
    }

    /// Create an entity from virtual field names (`description`, `title_en`, `title`)
    pub fn create_from_fields(
        &self,
        ctx: &LanguageContext,
        entity_type: &str,
        values: &[(&str, Value)],
    ) -> Result<Entity> {
        let schema = self.registry.get(entity_type)?;
        let draft = EntityDraft::from_fields(&schema, ctx, values)?;
        self.create(entity_type, &draft)
    }

    /// Fetch the entity matching every value of `draft`, creating it if none does
    ///
    /// Plain values and per-language translated values all take part in the
    /// lookup. Returns the entity and whether it was created.
    pub fn get_or_create(
        &self,
        ctx: &LanguageContext,
        entity_type: &str,
        draft: &EntityDraft,
    ) -> Result<(Entity, bool)> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(entity_type)?;
        let translations = check_draft(&schema, self.registry.languages(), draft)?;

        let mut query = Query::new(entity_type);
        for (field, value) in &draft.plain {
            query = query.filter(Predicate::new(field, value.clone()));
        }
        for (code, fields) in &translations {
            for (field, value) in fields {
                let name = format!("{}_{}", field, field_suffix(code));
                query = query.filter(Predicate::new(&name, value.clone()));
            }
        }

        self.db.transaction(|tx| {
            let ids = select_ids(tx, &planner, &query)?;
            match ids.as_slice() {
                [] => {
                    let entity = insert_entity(tx, &schema, &draft.plain, &translations)?;
                    Ok((entity, true))
                }
                [id] => {
                    let entity = fetch_by_id(tx, &planner, &schema, *id, FetchStrategy::Prefetch)?;
                    Ok((entity, false))
                }
                many => Err(MultilingualError::MultipleObjectsReturned {
                    entity: entity_type.to_string(),
                    count: many.len(),
                }),
            }
        })
    }

    /// Write plain and virtual fields of `entity`
    ///
    /// Implicit fields write to the active language. A translation row is
    /// created on the first non-null write to its language and reused after
    /// that; writing only NULLs to a language without a row creates nothing.
    pub fn update(&self, ctx: &LanguageContext, entity: &mut Entity, changes: &[(&str, Value)]) -> Result<()> {
        self.planner(ctx)?;
        let schema = Arc::clone(entity.schema());
        let mut resolver = FieldResolver::new(&schema, ctx.settings());
        let active = ctx.get_active();

        let mut plain: BTreeMap<String, Value> = BTreeMap::new();
        let mut by_code: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (name, value) in changes {
            match resolver.resolve(name)? {
                FieldRef::Plain(field) if field == PRIMARY_KEY => {
                    return Err(MultilingualError::Schema(format!(
                        "Primary key of entity '{}' cannot be updated",
                        schema.name
                    )));
                }
                FieldRef::Plain(field) => {
                    plain.insert(field, value.clone());
                }
                FieldRef::Translated { field, mode } => {
                    let code = match mode {
                        LanguageMode::Implicit => active.clone(),
                        LanguageMode::Explicit(code) => code,
                    };
                    by_code.entry(code).or_default().insert(field, value.clone());
                }
            }
        }

        let id = entity.id;
        let refreshed = self.db.transaction(|tx| {
            if plain.is_empty() {
                ensure_exists(tx, &schema, id)?;
            } else {
                update_master(tx, &schema, id, &plain)?;
            }

            let mut refreshed = Vec::new();
            for (code, fields) in &by_code {
                if fields.values().all(Value::is_null) {
                    update_translation(tx, &schema, id, code, fields)?;
                } else {
                    upsert_translation(tx, &schema, id, code, fields)?;
                }
                if let Some(row) = select_translation(tx, &schema, id, code)? {
                    refreshed.push(row);
                }
            }
            Ok(refreshed)
        })?;

        entity.fields.extend(plain);
        for row in refreshed {
            entity.put_translation(row);
        }
        Ok(())
    }

    /// Delete `entity` and every translation row it owns
    ///
    /// Returns the number of translation rows removed.
    pub fn delete(&self, entity: Entity) -> Result<usize> {
        let schema = Arc::clone(entity.schema());
        self.db.transaction(|tx| {
            let removed = delete_entities(tx, &schema, &[entity.id])?;
            if removed.entities == 0 {
                return Err(MultilingualError::NotFound {
                    entity: schema.name.clone(),
                });
            }
            Ok(removed.translations)
        })
    }

    /// Delete every entity matching `query`, returning how many were removed
    pub fn delete_where(&self, ctx: &LanguageContext, query: &Query) -> Result<usize> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(query.entity_type())?;
        self.db.transaction(|tx| {
            let ids = select_ids(tx, &planner, query)?;
            let mut entities = 0;
            for chunk in ids.chunks(PREFETCH_CHUNK_SIZE) {
                entities += delete_entities(tx, &schema, chunk)?.entities;
            }
            Ok(entities)
        })
    }

    /// Delete translation rows of `entity` except those in `keep_codes`
    ///
    /// Returns the number of rows removed.
    pub fn delete_translations(&self, entity: &mut Entity, keep_codes: &[&str]) -> Result<usize> {
        let languages = self.registry.languages();
        let keep = keep_codes
            .iter()
            .map(|code| languages.require(code))
            .collect::<Result<Vec<String>>>()?;
        let model = entity.schema().translation_model();

        let mut sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(model.table),
            quote_ident(model.link_field)
        );
        let mut params = vec![Value::Integer(entity.id)];
        if !keep.is_empty() {
            sql.push_str(&format!(
                " AND {} NOT IN ({})",
                quote_ident(LANGUAGE_COLUMN),
                vec!["?"; keep.len()].join(", ")
            ));
            params.extend(keep.iter().map(|code| Value::Text(code.clone())));
        }

        let removed = self.db.transaction(|tx| {
            debug!("{}", sql);
            Ok(tx.execute(&sql, params_from_iter(params.iter()))?)
        })?;

        entity.remove_translations_except(&keep);
        Ok(removed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Entities matching `query`, with translations loaded per `strategy`
    pub fn fetch(&self, ctx: &LanguageContext, query: &Query, strategy: FetchStrategy) -> Result<Vec<Entity>> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(query.entity_type())?;
        self.db
            .execute(|conn| fetch_entities(conn, &planner, &schema, query, strategy))
    }

    /// The single entity matching `query`
    pub fn get(&self, ctx: &LanguageContext, query: &Query) -> Result<Entity> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(query.entity_type())?;
        self.db.execute(|conn| {
            let ids = select_ids(conn, &planner, query)?;
            match ids.as_slice() {
                [] => Err(MultilingualError::NotFound {
                    entity: schema.name.clone(),
                }),
                [id] => fetch_by_id(conn, &planner, &schema, *id, FetchStrategy::Prefetch),
                many => Err(MultilingualError::MultipleObjectsReturned {
                    entity: schema.name.clone(),
                    count: many.len(),
                }),
            }
        })
    }

    /// The entity with primary key `id`
    pub fn get_by_id(&self, ctx: &LanguageContext, entity_type: &str, id: i64) -> Result<Entity> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(entity_type)?;
        self.db
            .execute(|conn| fetch_by_id(conn, &planner, &schema, id, FetchStrategy::Prefetch))
    }

    /// Fetch every translation row of `entity`
    pub fn load_translations(&self, entity: &mut Entity) -> Result<()> {
        let schema = Arc::clone(entity.schema());
        let mut rows = self
            .db
            .execute(|conn| select_all_translations(conn, &schema, &[entity.id]))?;
        entity.set_translations(rows.remove(&entity.id).unwrap_or_default(), LoadedTranslations::All);
        Ok(())
    }

    /// Read `field` of `entity`, fetching translation rows it lacks
    ///
    /// Unlike `Entity::get`, this never fails with `TranslationNotLoaded`:
    /// languages the field needs that the original fetch skipped are read
    /// now and kept on the entity.
    pub fn get_field(&self, ctx: &LanguageContext, entity: &mut Entity, field: &str) -> Result<Value> {
        let missing = entity.missing_languages(field, ctx)?;
        if !missing.is_empty() {
            let schema = Arc::clone(entity.schema());
            let id = entity.id;
            let rows = self.db.execute(|conn| {
                missing
                    .iter()
                    .map(|code| select_translation(conn, &schema, id, code))
                    .collect::<Result<Vec<_>>>()
            })?;
            debug!("Loaded {:?} for {} #{}", missing, schema.name, id);
            for (code, row) in missing.iter().zip(rows) {
                entity.cover_language(code, row);
            }
        }
        entity.get(field, ctx)
    }

    /// Named columns for each match; an empty `fields` selects every field
    ///
    /// Virtual names resolve exactly as they do in filters and ordering.
    pub fn values(&self, ctx: &LanguageContext, query: &Query, fields: &[&str]) -> Result<Vec<ValuesRow>> {
        let planner = self.planner(ctx)?;
        let schema = self.registry.get(query.entity_type())?;
        let names = if fields.is_empty() {
            default_value_names(&schema)
        } else {
            fields.iter().map(|f| f.to_string()).collect()
        };

        let plan = planner.plan(query, &Projection::Values(names.clone()))?;
        let rows = self.db.execute(|conn| {
            query_rows(conn, &plan, |row| {
                (0..names.len()).map(|i| row.get::<_, Value>(i)).collect::<rusqlite::Result<Vec<_>>>()
            })
        })?;

        Ok(rows
            .into_iter()
            .map(|values| ValuesRow {
                columns: names.iter().cloned().zip(values).collect(),
            })
            .collect())
    }

    /// Value tuples for each match
    pub fn values_list(&self, ctx: &LanguageContext, query: &Query, fields: &[&str]) -> Result<Vec<Vec<Value>>> {
        Ok(self
            .values(ctx, query, fields)?
            .into_iter()
            .map(ValuesRow::into_values)
            .collect())
    }

    /// A single field for each match
    pub fn values_list_flat(&self, ctx: &LanguageContext, query: &Query, field: &str) -> Result<Vec<Value>> {
        Ok(self
            .values_list(ctx, query, &[field])?
            .into_iter()
            .filter_map(|mut row| row.pop())
            .collect())
    }

    /// Number of entities matching `query`
    pub fn count(&self, ctx: &LanguageContext, query: &Query) -> Result<usize> {
        let plan = self.planner(ctx)?.plan(query, &Projection::Count)?;
        let count: i64 = self.db.execute(|conn| {
            Ok(conn.query_row(&plan.sql, params_from_iter(plan.params.iter()), |row| row.get(0))?)
        })?;
        Ok(count as usize)
    }

    /// Whether any entity matches `query`
    pub fn exists(&self, ctx: &LanguageContext, query: &Query) -> Result<bool> {
        let plan = self.planner(ctx)?.plan(&query.clone().limit(1), &Projection::Ids)?;
        self.db
            .execute(|conn| Ok(!query_rows(conn, &plan, |row| row.get::<_, i64>(0))?.is_empty()))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Row counts per registered entity
    pub fn stats(&self) -> Result<RepositoryStats> {
        let entities = self.db.execute(|conn| {
            let mut entities = Vec::new();
            for entity_type in self.registry.entity_types() {
                let schema = self.registry.get(entity_type)?;
                let master_rows: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&schema.master_table)),
                    [],
                    |row| row.get(0),
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {lang}, COUNT(*) FROM {table} GROUP BY {lang} ORDER BY {lang}",
                    lang = quote_ident(LANGUAGE_COLUMN),
                    table = quote_ident(&schema.translation_table)
                ))?;
                let rows_by_language = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<BTreeMap<String, i64>>>()?;

                entities.push(EntityStats {
                    entity_type: entity_type.to_string(),
                    master_rows,
                    translation_rows: rows_by_language.values().sum(),
                    rows_by_language,
                });
            }
            Ok(entities)
        })?;

        Ok(RepositoryStats {
            entities,
            file_size_bytes: self.db.file_size(),
        })
    }

    /// Vacuum the database to reclaim space
    pub fn vacuum(&self) -> Result<()> {
        self.db.vacuum()
    }
}

/// Row counts for one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStats {
    pub entity_type: String,
    pub master_rows: i64,
    pub translation_rows: i64,
    pub rows_by_language: BTreeMap<String, i64>,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct RepositoryStats {
    pub entities: Vec<EntityStats>,
    /// Database file size in bytes
    pub file_size_bytes: u64,
}

impl fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stats in &self.entities {
            let languages = stats
                .rows_by_language
                .iter()
                .map(|(code, count)| format!("{}={}", code, count))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                f,
                "{}: {} entities, {} translations [{}]",
                stats.entity_type, stats.master_rows, stats.translation_rows, languages
            )?;
        }
        write!(f, "Size: {} KB", self.file_size_bytes / 1024)
    }
}

// =============================================================================
// Connection-level helpers, usable inside and outside transactions
// =============================================================================

fn query_rows<T, F>(conn: &Connection, plan: &PhysicalQuery, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(&plan.sql)?;
    let rows = stmt
        .query_map(params_from_iter(plan.params.iter()), map)?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(rows)
}

/// Check a draft against the schema, normalizing its language codes
fn check_draft(
    schema: &EntitySchema,
    languages: &LanguageSettings,
    draft: &EntityDraft,
) -> Result<BTreeMap<String, BTreeMap<String, Value>>> {
    for field in draft.plain.keys() {
        if !schema.is_master_field(field) {
            return Err(MultilingualError::resolution(&schema.name, field));
        }
    }

    let mut translations: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for (code, fields) in &draft.translations {
        let code = languages.require(code)?;
        for (field, value) in fields {
            if !schema.is_translatable(field) {
                return Err(MultilingualError::resolution(&schema.name, field));
            }
            translations
                .entry(code.clone())
                .or_default()
                .insert(field.clone(), value.clone());
        }
    }
    Ok(translations)
}

fn insert_entity(
    conn: &Connection,
    schema: &Arc<EntitySchema>,
    plain: &BTreeMap<String, Value>,
    translations: &BTreeMap<String, BTreeMap<String, Value>>,
) -> Result<Entity> {
    let sql = if plain.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&schema.master_table))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&schema.master_table),
            quote_columns(plain.keys()),
            vec!["?"; plain.len()].join(", ")
        )
    };
    debug!("{}", sql);
    conn.execute(&sql, params_from_iter(plain.values()))?;
    let id = conn.last_insert_rowid();

    let mut fields: BTreeMap<String, Value> = schema
        .master_fields
        .iter()
        .map(|f| (f.clone(), Value::Null))
        .collect();
    fields.extend(plain.iter().filter(|(k, _)| *k != PRIMARY_KEY).map(|(k, v)| (k.clone(), v.clone())));

    let mut rows = Vec::new();
    for (code, values) in translations {
        if values.values().all(Value::is_null) {
            continue;
        }
        let row_id = insert_translation(conn, schema, id, code, values)?;
        rows.push(translation_row(schema, row_id, id, code, values));
    }

    debug!("Created {} #{} with {} translation(s)", schema.name, id, rows.len());
    let mut entity = Entity::new(Arc::clone(schema), id, fields);
    entity.set_translations(rows, LoadedTranslations::All);
    Ok(entity)
}

fn translation_row(
    schema: &EntitySchema,
    id: i64,
    master_id: i64,
    code: &str,
    values: &BTreeMap<String, Value>,
) -> TranslationRow {
    let mut fields: BTreeMap<String, Value> = schema
        .translatable_fields
        .iter()
        .map(|f| (f.clone(), Value::Null))
        .collect();
    fields.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    TranslationRow {
        id,
        master_id,
        language_code: code.to_string(),
        fields,
    }
}

fn insert_translation(
    conn: &Connection,
    schema: &EntitySchema,
    master_id: i64,
    code: &str,
    values: &BTreeMap<String, Value>,
) -> Result<i64> {
    let model = schema.translation_model();
    let columns = [model.link_field, LANGUAGE_COLUMN]
        .into_iter()
        .chain(values.keys().map(String::as_str))
        .collect::<Vec<_>>();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(model.table),
        quote_columns(&columns),
        vec!["?"; columns.len()].join(", ")
    );
    let mut params = vec![Value::Integer(master_id), Value::Text(code.to_string())];
    params.extend(values.values().cloned());

    debug!("{}", sql);
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(conn.last_insert_rowid())
}

fn ensure_exists(conn: &Connection, schema: &EntitySchema, id: i64) -> Result<()> {
    let found = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE {} = ?1",
                quote_ident(&schema.master_table),
                quote_ident(PRIMARY_KEY)
            ),
            [id],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| MultilingualError::NotFound {
        entity: schema.name.clone(),
    })
}

fn update_master(conn: &Connection, schema: &EntitySchema, id: i64, plain: &BTreeMap<String, Value>) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(&schema.master_table),
        assignments(plain.keys()),
        quote_ident(PRIMARY_KEY)
    );
    let mut params: Vec<Value> = plain.values().cloned().collect();
    params.push(Value::Integer(id));

    debug!("{}", sql);
    if conn.execute(&sql, params_from_iter(params.iter()))? == 0 {
        return Err(MultilingualError::NotFound {
            entity: schema.name.clone(),
        });
    }
    Ok(())
}

/// Write to an existing translation row only
fn update_translation(
    conn: &Connection,
    schema: &EntitySchema,
    master_id: i64,
    code: &str,
    values: &BTreeMap<String, Value>,
) -> Result<()> {
    let model = schema.translation_model();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ? AND {} = ?",
        quote_ident(model.table),
        assignments(values.keys()),
        quote_ident(model.link_field),
        quote_ident(LANGUAGE_COLUMN)
    );
    let mut params: Vec<Value> = values.values().cloned().collect();
    params.push(Value::Integer(master_id));
    params.push(Value::Text(code.to_string()));

    debug!("{}", sql);
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(())
}

/// Insert the (entity, language) row or update it in place
///
/// Relies on the unique (link, language) constraint, so concurrent writers
/// to the same pair update one row instead of duplicating it.
fn upsert_translation(
    conn: &Connection,
    schema: &EntitySchema,
    master_id: i64,
    code: &str,
    values: &BTreeMap<String, Value>,
) -> Result<()> {
    let model = schema.translation_model();
    let columns = [model.link_field, LANGUAGE_COLUMN]
        .into_iter()
        .chain(values.keys().map(String::as_str))
        .collect::<Vec<_>>();

    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
         ON CONFLICT({link}, {lang}) DO UPDATE SET {updates}",
        table = quote_ident(model.table),
        columns = quote_columns(&columns),
        placeholders = vec!["?"; columns.len()].join(", "),
        link = quote_ident(model.link_field),
        lang = quote_ident(LANGUAGE_COLUMN),
        updates = values
            .keys()
            .map(|k| format!("{k} = excluded.{k}", k = quote_ident(k)))
            .collect::<Vec<_>>()
            .join(", "),
    );
    let mut params = vec![Value::Integer(master_id), Value::Text(code.to_string())];
    params.extend(values.values().cloned());

    debug!("{}", sql);
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(())
}

fn read_translation_row(row: &Row<'_>, fields: &[String]) -> rusqlite::Result<TranslationRow> {
    let mut values = BTreeMap::new();
    for (offset, field) in fields.iter().enumerate() {
        values.insert(field.clone(), row.get::<_, Value>(3 + offset)?);
    }
    Ok(TranslationRow {
        id: row.get(0)?,
        master_id: row.get(1)?,
        language_code: row.get(2)?,
        fields: values,
    })
}

fn translation_columns(schema: &EntitySchema) -> String {
    let model = schema.translation_model();
    let fixed = [PRIMARY_KEY, model.link_field, LANGUAGE_COLUMN];
    quote_columns(fixed.into_iter().chain(model.fields.iter().map(String::as_str)))
}

/// Comma-separated quoted column names
fn quote_columns<S: AsRef<str>>(columns: impl IntoIterator<Item = S>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"a" = ?, "b" = ?`
fn assignments<S: AsRef<str>>(columns: impl IntoIterator<Item = S>) -> String {
    columns
        .into_iter()
        .map(|c| format!("{} = ?", quote_ident(c.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_translation(
    conn: &Connection,
    schema: &EntitySchema,
    master_id: i64,
    code: &str,
) -> Result<Option<TranslationRow>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 AND {} = ?2",
        translation_columns(schema),
        quote_ident(&schema.translation_table),
        quote_ident(&schema.link_field),
        quote_ident(LANGUAGE_COLUMN)
    );
    let row = conn
        .query_row(&sql, rusqlite::params![master_id, code], |row| {
            read_translation_row(row, &schema.translatable_fields)
        })
        .optional()?;
    Ok(row)
}

/// Every translation row of `master_ids`, grouped by master id
fn select_all_translations(
    conn: &Connection,
    schema: &EntitySchema,
    master_ids: &[i64],
) -> Result<HashMap<i64, Vec<TranslationRow>>> {
    let mut grouped: HashMap<i64, Vec<TranslationRow>> = HashMap::new();
    for chunk in master_ids.chunks(PREFETCH_CHUNK_SIZE) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {link} IN ({}) ORDER BY {link}, {}",
            translation_columns(schema),
            quote_ident(&schema.translation_table),
            placeholders,
            quote_ident(LANGUAGE_COLUMN),
            link = quote_ident(&schema.link_field),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| {
                read_translation_row(row, &schema.translatable_fields)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for row in rows {
            grouped.entry(row.master_id).or_default().push(row);
        }
    }
    Ok(grouped)
}

fn select_ids(conn: &Connection, planner: &TranslationQueryPlanner<'_>, query: &Query) -> Result<Vec<i64>> {
    let plan = planner.plan(query, &Projection::Ids)?;
    query_rows(conn, &plan, |row| row.get::<_, i64>(0))
}

fn fetch_by_id(
    conn: &Connection,
    planner: &TranslationQueryPlanner<'_>,
    schema: &Arc<EntitySchema>,
    id: i64,
    strategy: FetchStrategy,
) -> Result<Entity> {
    let query = Query::new(&schema.name).filter(Predicate::new(PRIMARY_KEY, id));
    fetch_entities(conn, planner, schema, &query, strategy)?
        .pop()
        .ok_or_else(|| MultilingualError::NotFound {
            entity: schema.name.clone(),
        })
}

fn fetch_entities(
    conn: &Connection,
    planner: &TranslationQueryPlanner<'_>,
    schema: &Arc<EntitySchema>,
    query: &Query,
    strategy: FetchStrategy,
) -> Result<Vec<Entity>> {
    let plan = planner.plan(query, &Projection::Entities(strategy))?;
    let RowLayout::Entities {
        master_fields,
        joined_languages,
        translatable_fields,
    } = &plan.layout
    else {
        return Err(MultilingualError::State(format!(
            "Unexpected row layout for entity query: {:?}",
            plan.layout
        )));
    };

    let mut entities = query_rows(conn, &plan, |row| {
        let id: i64 = row.get(0)?;
        let mut index = 1;

        let mut fields = BTreeMap::new();
        for field in master_fields {
            fields.insert(field.clone(), row.get::<_, Value>(index)?);
            index += 1;
        }

        let mut translations = Vec::new();
        for code in joined_languages {
            let row_id: Option<i64> = row.get(index)?;
            index += 1;
            let mut values = BTreeMap::new();
            for field in translatable_fields {
                values.insert(field.clone(), row.get::<_, Value>(index)?);
                index += 1;
            }
            if let Some(row_id) = row_id {
                translations.push(TranslationRow {
                    id: row_id,
                    master_id: id,
                    language_code: code.clone(),
                    fields: values,
                });
            }
        }

        Ok((Entity::new(Arc::clone(schema), id, fields), translations))
    })?
    .into_iter()
    .map(|(mut entity, translations)| {
        if strategy == FetchStrategy::SelectRelated {
            let codes: BTreeSet<String> = joined_languages.iter().cloned().collect();
            entity.set_translations(translations, LoadedTranslations::Languages(codes));
        }
        entity
    })
    .collect::<Vec<_>>();

    if strategy == FetchStrategy::Prefetch && !entities.is_empty() {
        let ids: Vec<i64> = entities.iter().map(|e| e.id).collect();
        let mut grouped = select_all_translations(conn, schema, &ids)?;
        for entity in &mut entities {
            let rows = grouped.remove(&entity.id).unwrap_or_default();
            entity.set_translations(rows, LoadedTranslations::All);
        }
    }

    Ok(entities)
}

struct Removed {
    entities: usize,
    translations: usize,
}

/// Delete translation rows first, then the master rows
fn delete_entities(conn: &Connection, schema: &EntitySchema, ids: &[i64]) -> Result<Removed> {
    if ids.is_empty() {
        return Ok(Removed {
            entities: 0,
            translations: 0,
        });
    }
    let placeholders = vec!["?"; ids.len()].join(", ");

    let translations = conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(&schema.translation_table),
            quote_ident(&schema.link_field),
            placeholders
        ),
        params_from_iter(ids.iter()),
    )?;
    let entities = conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(&schema.master_table),
            quote_ident(PRIMARY_KEY),
            placeholders
        ),
        params_from_iter(ids.iter()),
    )?;

    debug!(
        "Deleted {} {} row(s) and {} translation(s)",
        entities, schema.name, translations
    );
    Ok(Removed {
        entities,
        translations,
    })
}

fn default_value_names(schema: &EntitySchema) -> Vec<String> {
    std::iter::once(PRIMARY_KEY.to_string())
        .chain(schema.master_fields.iter().cloned())
        .chain(schema.translatable_fields.iter().cloned())
        .collect()
}
