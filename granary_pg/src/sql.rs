//! SQL generation from entity metadata.
//!
//! Identifiers are always double quoted and values always travel as `$n` parameters, typed by
//! the kind of the property they are compared with or written to.

use granary_core::context::ContextError;
use granary_core::entity::{EntityType, PropertyDescriptor, ValueGenerated};
use granary_core::query::Predicate;
use granary_core::value::{Value, ValueKind};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use std::collections::BTreeSet;

pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// A SQL text together with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<(ValueKind, Value)>,
}

impl Statement {
    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The parameters, `$1` first, with the kind used to type null values.
    pub fn params(&self) -> &[(ValueKind, Value)] {
        &self.params
    }

    pub(crate) fn query(&self) -> PgQuery<'_> {
        self.params
            .iter()
            .cloned()
            .fold(sqlx::query(&self.sql), |query, (kind, value)| {
                bind_value(query, kind, value)
            })
    }
}

#[derive(Default)]
struct Params(Vec<(ValueKind, Value)>);

impl Params {
    fn push(&mut self, kind: ValueKind, value: Value) -> String {
        self.0.push((kind, value));
        format!("${}", self.0.len())
    }
}

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list<E>(entity_type: &EntityType<E>) -> String {
    entity_type
        .properties()
        .iter()
        .map(|p| quote_ident(p.column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_type(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Bool => "BOOLEAN",
        ValueKind::Int32 => "INTEGER",
        ValueKind::Int64 => "BIGINT",
        ValueKind::Guid => "UUID",
        ValueKind::String => "TEXT",
        ValueKind::Bytes => "BYTEA",
        ValueKind::DateTime => "TIMESTAMPTZ",
    }
}

fn property<'a, E>(
    entity_type: &'a EntityType<E>,
    name: &str,
) -> Result<&'a PropertyDescriptor<E>, ContextError> {
    entity_type
        .find_property(name)
        .ok_or_else(|| ContextError::UnknownProperty {
            entity: entity_type.name(),
            property: name.to_owned(),
        })
}

/// `CREATE TABLE IF NOT EXISTS` for `table` with one column per property.
pub fn create_table<E>(table: &str, entity_type: &EntityType<E>) -> String {
    let mut columns: Vec<String> = entity_type
        .properties()
        .iter()
        .map(|p| {
            let null = if p.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", quote_ident(p.column), column_type(p.kind), null)
        })
        .collect();
    let keys: Vec<String> = entity_type
        .key_properties()
        .map(|p| quote_ident(p.column))
        .collect();
    if !keys.is_empty() {
        columns.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

fn where_clause<E>(
    entity_type: &EntityType<E>,
    predicate: &Predicate,
    params: &mut Params,
) -> Result<String, ContextError> {
    let mut terms = Vec::new();
    for (name, value) in predicate.equalities() {
        let descriptor = property(entity_type, name)?;
        let column = quote_ident(descriptor.column);
        if value.is_null() {
            terms.push(format!("{column} IS NULL"));
        } else {
            let placeholder = params.push(descriptor.kind, value.clone());
            terms.push(format!("{column} = {placeholder}"));
        }
    }
    Ok(if terms.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", terms.join(" AND "))
    })
}

/// Selects the rows of `table` matching `predicate`.
pub fn select<E>(
    table: &str,
    entity_type: &EntityType<E>,
    predicate: &Predicate,
) -> Result<Statement, ContextError> {
    let mut params = Params::default();
    let filter = where_clause(entity_type, predicate, &mut params)?;
    Ok(Statement {
        sql: format!(
            "SELECT {} FROM {}{}",
            column_list(entity_type),
            quote_ident(table),
            filter
        ),
        params: params.0,
    })
}

/// Selects the stored row of `entity` by its primary key.
pub fn select_by_key<E>(table: &str, entity_type: &EntityType<E>, entity: &E) -> Statement {
    let mut params = Params::default();
    let filter = key_terms(entity_type, entity, &mut params).join(" AND ");
    Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {}",
            column_list(entity_type),
            quote_ident(table),
            filter
        ),
        params: params.0,
    }
}

fn key_terms<E>(entity_type: &EntityType<E>, entity: &E, params: &mut Params) -> Vec<String> {
    entity_type
        .key_properties()
        .map(|p| {
            let placeholder = params.push(p.kind, p.get(entity));
            format!("{} = {}", quote_ident(p.column), placeholder)
        })
        .collect()
}

fn token_terms<E>(entity_type: &EntityType<E>, entity: &E, params: &mut Params) -> Vec<String> {
    entity_type
        .concurrency_tokens()
        .map(|p| {
            let placeholder = params.push(p.kind, p.get(entity));
            format!("{} IS NOT DISTINCT FROM {}", quote_ident(p.column), placeholder)
        })
        .collect()
}

/// Inserts every property of `entity`.
pub fn insert<E>(table: &str, entity_type: &EntityType<E>, entity: &E) -> Statement {
    let mut params = Params::default();
    let placeholders: Vec<String> = entity_type
        .properties()
        .iter()
        .map(|p| params.push(p.kind, p.get(entity)))
        .collect();
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list(entity_type),
            placeholders.join(", ")
        ),
        params: params.0,
    }
}

/// Updates the row of `original` with the values of `updated`, returning the stored row.
///
/// The row must still hold the concurrency tokens of `original`. With `modified`, only those
/// properties and the store generated ones are written; otherwise every non key property is.
pub fn update<E>(
    table: &str,
    entity_type: &EntityType<E>,
    original: &E,
    updated: &E,
    modified: Option<&BTreeSet<String>>,
) -> Result<Statement, ContextError> {
    let written: Vec<&PropertyDescriptor<E>> = match modified {
        Some(modified) => {
            for name in modified {
                property(entity_type, name)?;
            }
            entity_type
                .properties()
                .iter()
                .filter(|p| {
                    !p.key
                        && (modified.contains(p.name)
                            || p.generated == ValueGenerated::OnAddOrUpdate)
                })
                .collect()
        }
        None => entity_type.properties().iter().filter(|p| !p.key).collect(),
    };

    let mut params = Params::default();
    let mut assignments: Vec<String> = written
        .iter()
        .map(|p| {
            let placeholder = params.push(p.kind, p.get(updated));
            format!("{} = {}", quote_ident(p.column), placeholder)
        })
        .collect();
    if assignments.is_empty() {
        // A key only entity still needs a statement that reports the matched row.
        if let Some(key) = entity_type.key_properties().next() {
            let column = quote_ident(key.column);
            assignments.push(format!("{column} = {column}"));
        }
    }
    let mut filter = key_terms(entity_type, updated, &mut params);
    filter.extend(token_terms(entity_type, original, &mut params));

    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            quote_ident(table),
            assignments.join(", "),
            filter.join(" AND "),
            column_list(entity_type)
        ),
        params: params.0,
    })
}

/// Deletes the row of `entity`, provided it still holds the concurrency tokens of `entity`.
pub fn delete<E>(table: &str, entity_type: &EntityType<E>, entity: &E) -> Statement {
    let mut params = Params::default();
    let mut filter = key_terms(entity_type, entity, &mut params);
    filter.extend(token_terms(entity_type, entity, &mut params));
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(table),
            filter.join(" AND ")
        ),
        params: params.0,
    }
}

/// Binds a value, typing nulls with the kind of the property.
pub(crate) fn bind_value<'q>(query: PgQuery<'q>, kind: ValueKind, value: Value) -> PgQuery<'q> {
    match value {
        Value::Null => match kind {
            ValueKind::Bool => query.bind(None::<bool>),
            ValueKind::Int32 => query.bind(None::<i32>),
            ValueKind::Int64 => query.bind(None::<i64>),
            ValueKind::Guid => query.bind(None::<uuid::Uuid>),
            ValueKind::String => query.bind(None::<String>),
            ValueKind::Bytes => query.bind(None::<Vec<u8>>),
            ValueKind::DateTime => query.bind(None::<chrono::DateTime<chrono::Utc>>),
        },
        Value::Bool(v) => query.bind(v),
        Value::Int32(v) => query.bind(v),
        Value::Int64(v) => query.bind(v),
        Value::Guid(v) => query.bind(v),
        Value::String(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
        Value::DateTime(v) => query.bind(v),
    }
}
