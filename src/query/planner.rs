/*!
 * Query planning over master and translation tables.
 *
 * The planner is the only place that turns virtual field names into SQL:
 *
 * - Plain fields read the master row (`m.<field>`).
 * - Explicit fields (`title_en`) read a LEFT JOIN of the translation table
 *   fixed to that language. References to the same language share one
 *   join; the (link, language) uniqueness constraint keeps it at one row
 *   per entity, so joins never multiply results.
 * - Implicit fields (`title`) read a correlated subquery returning the
 *   first non-null value along the active fallback chain. Filters,
 *   ordering and projections all use that same expression, so an implicit
 *   filter matches on the resolved value and never on a language the chain
 *   did not select.
 *
 * Ordering follows SQLite's default collation for the stored values.
 * NULL sorts last ascending and first descending; ties break on the
 * master primary key.
 */

use std::collections::HashMap;

use log::debug;

use super::resolver::{FieldRef, FieldResolver, LanguageMode};
use super::{split_lookup, FetchStrategy, Lookup, Predicate, Projection, Query};
use crate::database::models::Value;
use crate::database::schema::{quote_ident, EntitySchema, SchemaRegistry, LANGUAGE_COLUMN, PRIMARY_KEY};
use crate::errors::{MultilingualError, Result};
use crate::languages::LanguageContext;

/// Alias of the master table in every planned query
const MASTER_ALIAS: &str = "m";

/// `alias."column"`
fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, quote_ident(name))
}

/// SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq, Default)]
struct Fragment {
    sql: String,
    params: Vec<Value>,
}

impl Fragment {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Shape of the rows a `PhysicalQuery` returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowLayout {
    /// `id`, master fields, then per joined language: row id and translatable fields
    Entities {
        master_fields: Vec<String>,
        joined_languages: Vec<String>,
        translatable_fields: Vec<String>,
    },
    /// One column per requested name
    Values(Vec<String>),
    /// Master ids only
    Ids,
    /// A single count
    Count,
    /// `id`, link, language code, translatable fields
    TranslationRows { translatable_fields: Vec<String> },
}

/// A planned SQL statement ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub layout: RowLayout,
    /// Number of translation-table joins in the statement
    pub join_count: usize,
}

/// Builds physical queries for one language context
pub struct TranslationQueryPlanner<'a> {
    registry: &'a SchemaRegistry,
    ctx: &'a LanguageContext,
}

impl<'a> TranslationQueryPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry, ctx: &'a LanguageContext) -> Self {
        Self { registry, ctx }
    }

    /// Plan `query` returning `projection`
    ///
    /// Every field reference is resolved before any SQL exists, so unknown
    /// fields fail here rather than at the database.
    pub fn plan(&self, query: &Query, projection: &Projection) -> Result<PhysicalQuery> {
        let schema = self.registry.get(query.entity_type())?;

        if *projection == Projection::Count {
            let inner = self.plan(query, &Projection::Ids)?;
            return Ok(PhysicalQuery {
                sql: format!("SELECT COUNT(*) FROM ({})", inner.sql),
                params: inner.params,
                layout: RowLayout::Count,
                join_count: inner.join_count,
            });
        }

        let mut builder = PlanBuilder::new(&schema, self.ctx);

        let (select, layout) = builder.projection(projection)?;
        let filter = match query.predicate() {
            Some(predicate) => Some(builder.predicate(predicate)?),
            None => None,
        };

        let mut order = Vec::new();
        let mut orders_by_pk = false;
        for key in query.ordering() {
            let expr = builder.field(&key.field)?;
            orders_by_pk |= key.field == PRIMARY_KEY;
            let direction = if key.descending {
                "DESC NULLS FIRST"
            } else {
                "ASC NULLS LAST"
            };
            order.push(Fragment::new(format!("{} {}", expr.sql, direction), expr.params));
        }
        if !orders_by_pk {
            order.push(Fragment::raw(format!("{} ASC", column(MASTER_ALIAS, PRIMARY_KEY))));
        }

        let joins = builder.joins();
        let join_count = builder.join_codes.len();

        let mut sql = format!(
            "SELECT {} FROM {} {}",
            select.sql,
            quote_ident(&schema.master_table),
            MASTER_ALIAS
        );
        let mut params = select.params;

        if !joins.sql.is_empty() {
            sql.push(' ');
            sql.push_str(&joins.sql);
            params.extend(joins.params);
        }
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
            params.extend(filter.params);
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(&order.iter().map(|f| f.sql.as_str()).collect::<Vec<_>>().join(", "));
        for fragment in order {
            params.extend(fragment.params);
        }

        match query.slice() {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit as i64));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset as i64));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(offset as i64));
            }
            (None, None) => {}
        }

        debug!("Planned {} query: {}", schema.name, sql);
        Ok(PhysicalQuery {
            sql,
            params,
            layout,
            join_count,
        })
    }

    /// Plan the batched load of every translation row for `master_ids`
    pub fn plan_translations(&self, schema: &EntitySchema, master_ids: &[i64]) -> PhysicalQuery {
        let model = schema.translation_model();
        let placeholders = vec!["?"; master_ids.len()].join(", ");
        let mut columns = vec![
            quote_ident(PRIMARY_KEY),
            quote_ident(model.link_field),
            quote_ident(model.language_column),
        ];
        columns.extend(model.fields.iter().map(|f| quote_ident(f)));

        PhysicalQuery {
            sql: format!(
                "SELECT {} FROM {} WHERE {link} IN ({}) ORDER BY {link}, {}",
                columns.join(", "),
                quote_ident(model.table),
                placeholders,
                quote_ident(model.language_column),
                link = quote_ident(model.link_field),
            ),
            params: master_ids.iter().map(|id| Value::Integer(*id)).collect(),
            layout: RowLayout::TranslationRows {
                translatable_fields: model.fields.to_vec(),
            },
            join_count: 0,
        }
    }
}

/// Per-query planning state
struct PlanBuilder<'s> {
    schema: &'s EntitySchema,
    resolver: FieldResolver<'s>,
    chain: Vec<String>,
    /// Languages with an explicit join, in alias order
    join_codes: Vec<String>,
    /// Implicit-field expressions, built once per field
    implicit: HashMap<String, Fragment>,
}

impl<'s> PlanBuilder<'s> {
    fn new(schema: &'s EntitySchema, ctx: &'s LanguageContext) -> Self {
        Self {
            schema,
            resolver: FieldResolver::new(schema, ctx.settings()),
            chain: ctx.active_chain(),
            join_codes: Vec::new(),
            implicit: HashMap::new(),
        }
    }

    /// Alias of the join for `code`, adding the join on first use
    fn join_alias(&mut self, code: &str) -> String {
        let index = match self.join_codes.iter().position(|c| c == code) {
            Some(index) => index,
            None => {
                self.join_codes.push(code.to_string());
                self.join_codes.len() - 1
            }
        };
        format!("t{}", index)
    }

    fn joins(&self) -> Fragment {
        let model = self.schema.translation_model();
        let mut sql = Vec::new();
        let mut params = Vec::new();
        for (index, code) in self.join_codes.iter().enumerate() {
            let alias = format!("t{}", index);
            sql.push(format!(
                "LEFT JOIN {table} {alias} ON {link} = {pk} AND {lang} = ?",
                table = quote_ident(model.table),
                alias = alias,
                link = column(&alias, model.link_field),
                pk = column(MASTER_ALIAS, PRIMARY_KEY),
                lang = column(&alias, LANGUAGE_COLUMN),
            ));
            params.push(Value::Text(code.clone()));
        }
        Fragment::new(sql.join(" "), params)
    }

    /// SQL expression for a virtual field name
    fn field(&mut self, name: &str) -> Result<Fragment> {
        match self.resolver.resolve(name)? {
            FieldRef::Plain(field) => Ok(Fragment::raw(column(MASTER_ALIAS, &field))),
            FieldRef::Translated {
                field,
                mode: LanguageMode::Explicit(code),
            } => {
                let alias = self.join_alias(&code);
                Ok(Fragment::raw(column(&alias, &field)))
            }
            FieldRef::Translated {
                field,
                mode: LanguageMode::Implicit,
            } => Ok(self.implicit_field(&field)),
        }
    }

    fn implicit_field(&mut self, field: &str) -> Fragment {
        if let Some(found) = self.implicit.get(field) {
            return found.clone();
        }

        let model = self.schema.translation_model();
        let placeholders = vec!["?"; self.chain.len()].join(", ");
        let ranks: String = (0..self.chain.len())
            .map(|rank| format!(" WHEN ? THEN {}", rank))
            .collect();

        let sql = format!(
            "(SELECT {field} FROM {table} f WHERE {link} = {pk} AND {field} IS NOT NULL \
             AND {lang} IN ({placeholders}) ORDER BY CASE {lang}{ranks} END LIMIT 1)",
            field = column("f", field),
            table = quote_ident(model.table),
            link = column("f", model.link_field),
            pk = column(MASTER_ALIAS, PRIMARY_KEY),
            lang = column("f", LANGUAGE_COLUMN),
            placeholders = placeholders,
            ranks = ranks,
        );
        let params: Vec<Value> = self
            .chain
            .iter()
            .chain(self.chain.iter())
            .map(|code| Value::Text(code.clone()))
            .collect();

        let fragment = Fragment::new(sql, params);
        self.implicit.insert(field.to_string(), fragment.clone());
        fragment
    }

    fn projection(&mut self, projection: &Projection) -> Result<(Fragment, RowLayout)> {
        match projection {
            Projection::Entities(strategy) => {
                let mut columns = vec![column(MASTER_ALIAS, PRIMARY_KEY)];
                columns.extend(self.schema.master_fields.iter().map(|f| column(MASTER_ALIAS, f)));

                let mut joined_languages = Vec::new();
                if *strategy == FetchStrategy::SelectRelated {
                    for code in self.chain.clone() {
                        let alias = self.join_alias(&code);
                        columns.push(column(&alias, PRIMARY_KEY));
                        columns.extend(self.schema.translatable_fields.iter().map(|f| column(&alias, f)));
                        joined_languages.push(code);
                    }
                }

                Ok((
                    Fragment::raw(columns.join(", ")),
                    RowLayout::Entities {
                        master_fields: self.schema.master_fields.clone(),
                        joined_languages,
                        translatable_fields: self.schema.translatable_fields.clone(),
                    },
                ))
            }
            Projection::Values(names) => {
                let mut sql = Vec::with_capacity(names.len());
                let mut params = Vec::new();
                for name in names {
                    let expr = self.field(name)?;
                    sql.push(expr.sql);
                    params.extend(expr.params);
                }
                Ok((Fragment::new(sql.join(", "), params), RowLayout::Values(names.clone())))
            }
            Projection::Ids | Projection::Count => Ok((
                Fragment::raw(column(MASTER_ALIAS, PRIMARY_KEY)),
                RowLayout::Ids,
            )),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<Fragment> {
        match predicate {
            Predicate::Condition { path, value } => {
                let (name, lookup) = split_lookup(path);
                let expr = self.field(name)?;
                Ok(condition(expr, lookup, value))
            }
            Predicate::In { path, values } => {
                let (name, lookup) = split_lookup(path);
                if !matches!(lookup, Lookup::Exact | Lookup::In) {
                    return Err(MultilingualError::resolution(&self.schema.name, path));
                }
                let expr = self.field(name)?;
                Ok(membership(expr, values))
            }
            Predicate::And(items) => self.combine(items, " AND ", "1"),
            Predicate::Or(items) => self.combine(items, " OR ", "0"),
            Predicate::Not(inner) => {
                let inner = self.predicate(inner)?;
                // NULL counts as "no match", so the negation keeps the row
                Ok(Fragment::new(
                    format!("NOT COALESCE(({}), 0)", inner.sql),
                    inner.params,
                ))
            }
        }
    }

    fn combine(&mut self, items: &[Predicate], separator: &str, empty: &str) -> Result<Fragment> {
        if items.is_empty() {
            return Ok(Fragment::raw(empty));
        }
        let mut sql = Vec::with_capacity(items.len());
        let mut params = Vec::new();
        for item in items {
            let fragment = self.predicate(item)?;
            sql.push(format!("({})", fragment.sql));
            params.extend(fragment.params);
        }
        Ok(Fragment::new(sql.join(separator), params))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Integer(i) => *i != 0,
        Value::Real(f) => *f != 0.0,
        Value::Text(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
    }
}

fn condition(expr: Fragment, lookup: Lookup, value: &Value) -> Fragment {
    let e = expr.sql;
    let mut params = expr.params;

    let sql = match lookup {
        Lookup::IsNull => {
            let sql = if truthy(value) {
                format!("{} IS NULL", e)
            } else {
                format!("{} IS NOT NULL", e)
            };
            return Fragment::new(sql, params);
        }
        Lookup::Exact if value.is_null() => return Fragment::new(format!("{} IS NULL", e), params),
        Lookup::In => {
            return membership(Fragment::new(e, params), std::slice::from_ref(value));
        }
        Lookup::Exact => format!("{} = ?", e),
        Lookup::IExact => format!("LOWER({}) = LOWER(?)", e),
        Lookup::Contains => format!("instr({}, ?) > 0", e),
        Lookup::IContains => format!("instr(LOWER({}), LOWER(?)) > 0", e),
        Lookup::StartsWith => {
            params.push(value.clone());
            format!("substr({}, 1, length(?)) = ?", e)
        }
        Lookup::IStartsWith => {
            params.push(value.clone());
            format!("LOWER(substr({}, 1, length(?))) = LOWER(?)", e)
        }
        Lookup::EndsWith => {
            params.push(value.clone());
            format!("substr({}, -length(?)) = ?", e)
        }
        Lookup::Gt => format!("{} > ?", e),
        Lookup::Gte => format!("{} >= ?", e),
        Lookup::Lt => format!("{} < ?", e),
        Lookup::Lte => format!("{} <= ?", e),
    };
    params.push(value.clone());
    Fragment::new(sql, params)
}

fn membership(expr: Fragment, values: &[Value]) -> Fragment {
    if values.is_empty() {
        return Fragment::raw("0");
    }
    let mut params = expr.params;
    params.extend(values.iter().cloned());
    Fragment::new(
        format!("{} IN ({})", expr.sql, vec!["?"; values.len()].join(", ")),
        params,
    )
}
