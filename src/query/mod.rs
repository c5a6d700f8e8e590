/*!
 * Declarative queries over virtual fields.
 *
 * A `Query` names an entity type, a predicate tree, ordering keys and a
 * slice. Field paths use the virtual names callers see (`title`,
 * `title_en`, `description`), optionally followed by a lookup suffix
 * such as `__startswith` or `__isnull`. The planner turns a query plus a
 * `Projection` into SQL over the master and translation tables.
 */

pub mod planner;
pub mod resolver;

use std::str::FromStr;

use crate::database::models::Value;

pub use planner::{PhysicalQuery, RowLayout, TranslationQueryPlanner};
pub use resolver::{FieldRef, FieldResolver, LanguageMode};

/// Comparison applied by a filter condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    In,
}

impl FromStr for Lookup {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Lookup::Exact),
            "iexact" => Ok(Lookup::IExact),
            "contains" => Ok(Lookup::Contains),
            "icontains" => Ok(Lookup::IContains),
            "startswith" => Ok(Lookup::StartsWith),
            "istartswith" => Ok(Lookup::IStartsWith),
            "endswith" => Ok(Lookup::EndsWith),
            "gt" => Ok(Lookup::Gt),
            "gte" => Ok(Lookup::Gte),
            "lt" => Ok(Lookup::Lt),
            "lte" => Ok(Lookup::Lte),
            "isnull" => Ok(Lookup::IsNull),
            "in" => Ok(Lookup::In),
            _ => Err(()),
        }
    }
}

/// Split `name__lookup` into the field name and its lookup
///
/// A path without a known lookup suffix is an exact match on the whole path.
pub fn split_lookup(path: &str) -> (&str, Lookup) {
    if let Some((field, suffix)) = path.rsplit_once("__") {
        if let Ok(lookup) = suffix.parse() {
            return (field, lookup);
        }
    }
    (path, Lookup::Exact)
}

/// Predicate tree over virtual field paths
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `path` compared with a single value
    Condition { path: String, value: Value },
    /// `path` is one of `values`
    In { path: String, values: Vec<Value> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Rows for which the inner predicate is false or unknown
    Not(Box<Predicate>),
}

impl Predicate {
    /// Condition on a path such as `title_en`, `title__startswith` or `title__isnull`
    pub fn new(path: &str, value: impl Into<Value>) -> Self {
        Predicate::Condition {
            path: path.to_string(),
            value: value.into(),
        }
    }

    /// Membership test on a path
    pub fn is_in(path: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Predicate::In {
            path: path.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut items) => {
                items.push(other);
                Predicate::And(items)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut items) => {
                items.push(other);
                Predicate::Or(items)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }
}

/// How translation rows are fetched alongside entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    /// Master rows only; translations are loaded per entity on request
    Deferred,
    /// Join the rows of the active fallback chain into the entity query
    SelectRelated,
    /// One extra batched query for every translation row of the result
    #[default]
    Prefetch,
}

/// What a planned query returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Materialized entities
    Entities(FetchStrategy),
    /// One column per requested virtual field
    Values(Vec<String>),
    /// Master primary keys
    Ids,
    /// Number of matching entities
    Count,
}

/// Ordering key; a leading `-` sorts descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

impl OrderKey {
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => OrderKey {
                field: field.to_string(),
                descending: true,
            },
            None => OrderKey {
                field: key.to_string(),
                descending: false,
            },
        }
    }
}

/// Query over one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity_type: String,
    predicate: Option<Predicate>,
    ordering: Vec<OrderKey>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    /// Match every entity of `entity_type`
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            predicate: None,
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Keep entities matching `predicate` (AND-ed with earlier filters)
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Drop entities matching `predicate`
    pub fn exclude(self, predicate: Predicate) -> Self {
        self.filter(predicate.negate())
    }

    /// Replace the ordering keys
    pub fn order_by(mut self, keys: &[&str]) -> Self {
        self.ordering = keys.iter().map(|k| OrderKey::parse(k)).collect();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn ordering(&self) -> &[OrderKey] {
        &self.ordering
    }

    pub fn slice(&self) -> (Option<u64>, Option<u64>) {
        (self.limit, self.offset)
    }
}
