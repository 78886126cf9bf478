//! Queries over entity sets.

use crate::accessor::resolve_property;
use crate::context::ContextError;
use crate::entity::EntityType;
use crate::error::ConfigurationError;
use crate::value::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A filter over entity properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Predicate {
    /// Matches every row.
    #[default]
    All,
    /// Matches rows whose property equals the value.
    Eq {
        /// The property name.
        property: String,
        /// The value to compare with.
        value: Value,
    },
    /// Matches rows matching every inner predicate.
    And(Vec<Predicate>),
}

impl Predicate {
    /// An equality predicate.
    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            property: property.into(),
            value: value.into(),
        }
    }

    /// Combines two predicates, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// The equality terms of this predicate, in order.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        let mut terms = Vec::new();
        self.collect_equalities(&mut terms);
        terms
    }

    fn collect_equalities<'a>(&'a self, terms: &mut Vec<(&'a str, &'a Value)>) {
        match self {
            Predicate::All => {}
            Predicate::Eq { property, value } => terms.push((property.as_str(), value)),
            Predicate::And(inner) => inner.iter().for_each(|p| p.collect_equalities(terms)),
        }
    }

    /// Evaluates the predicate against an entity.
    pub fn matches<E>(&self, entity_type: &EntityType<E>, entity: &E) -> Result<bool, ContextError> {
        match self {
            Predicate::All => Ok(true),
            Predicate::Eq { property, value } => {
                let descriptor = entity_type.find_property(property).ok_or_else(|| {
                    ContextError::UnknownProperty {
                        entity: entity_type.name(),
                        property: property.clone(),
                    }
                })?;
                Ok(&descriptor.get(entity) == value)
            }
            Predicate::And(inner) => {
                for p in inner {
                    if !p.matches(entity_type, entity)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

/// A query for the rows of one entity set.
pub struct Query<E> {
    entity_set: String,
    predicate: Predicate,
    tracking: bool,
    _phantom: PhantomData<fn() -> E>,
}

impl<E> Query<E> {
    /// Queries every row of the entity set named `entity_set`, with change tracking.
    pub fn from_set(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            predicate: Predicate::All,
            tracking: true,
            _phantom: PhantomData,
        }
    }

    /// Narrows the query with an additional predicate.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    /// Disables change tracking for the returned entities.
    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    /// The entity set name.
    pub fn entity_set(&self) -> &str {
        &self.entity_set
    }

    /// The filter.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Whether returned entities are tracked by the context.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            entity_set: self.entity_set.clone(),
            predicate: self.predicate.clone(),
            tracking: self.tracking,
            _phantom: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity_set", &self.entity_set)
            .field("predicate", &self.predicate)
            .field("tracking", &self.tracking)
            .finish()
    }
}

/// Produces the base query for an entity from a context.
pub type RowAccessor<C, E> = Arc<dyn Fn(&C) -> Query<E> + Send + Sync>;

/// A query whose filter shape was validated ahead of time; only the parameter values change
/// between executions.
pub struct CompiledQuery<C, E> {
    rows: RowAccessor<C, E>,
    parameters: Vec<&'static str>,
}

impl<C, E> CompiledQuery<C, E> {
    /// Compiles an equality query over `parameters` on top of `rows`.
    pub fn compile(
        rows: RowAccessor<C, E>,
        entity_type: &EntityType<E>,
        parameters: &[&str],
    ) -> Result<Self, ConfigurationError> {
        let parameters = parameters
            .iter()
            .map(|p| resolve_property(entity_type, p).map(|h| h.name()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows, parameters })
    }

    /// The parameter property names, in binding order.
    pub fn parameters(&self) -> &[&'static str] {
        &self.parameters
    }

    /// Binds parameter values and returns the executable query.
    ///
    /// Values are bound positionally; extra values are ignored.
    pub fn bind(&self, context: &C, values: Vec<Value>) -> Query<E> {
        self.parameters
            .iter()
            .zip(values)
            .fold((self.rows)(context), |query, (property, value)| {
                query.filter(Predicate::equals(*property, value))
            })
    }
}

impl<C, E> Clone for CompiledQuery<C, E> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            parameters: self.parameters.clone(),
        }
    }
}
