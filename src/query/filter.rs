//! Predicate validation and evaluation

use super::{Filter, FilterMode, Filters, Operator, Order, Query};
use crate::common::{Error, Result};
use crate::model::{Record, Schema, Value};
use std::cmp::Ordering;

impl Operator {
    /// Apply `lhs <op> rhs`. Values of different types never match.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> bool {
        use Operator::*;
        match self {
            Contains | NotContains | StartsWith | EndsWith => {
                let (Some(field), Some(needle)) = (lhs.as_str(), rhs.as_str()) else {
                    return false;
                };
                match self {
                    Contains => field.contains(needle),
                    NotContains => !field.contains(needle),
                    StartsWith => field.starts_with(needle),
                    _ => field.ends_with(needle),
                }
            }
            _ => {
                let Some(ordering) = lhs.compare(rhs) else {
                    return false;
                };
                match self {
                    Equal => ordering == Ordering::Equal,
                    NotEqual => ordering != Ordering::Equal,
                    Greater => ordering == Ordering::Greater,
                    Lesser => ordering == Ordering::Less,
                    GreaterOrEqual => ordering != Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

impl Filter {
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let field_type = schema.field_type(self.field)?;
        if !field_type.supports(self.op) {
            return Err(Error::UnsupportedOperator {
                field: self.field,
                op: self.op,
                field_type,
            });
        }
        if self.value.field_type() != field_type {
            return Err(Error::TypeMismatch {
                field: self.field,
                expected: field_type,
                actual: self.value.field_type(),
            });
        }
        Ok(())
    }

    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(self.field)
            .map(|value| self.op.apply(value, &self.value))
            .unwrap_or(false)
    }
}

impl Filters {
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.mode == FilterMode::None && !self.terms.is_empty() {
            return Err(Error::InvalidQuery(
                "filter terms need mode \"and\" or \"or\"".into(),
            ));
        }
        self.terms.iter().try_for_each(|term| term.validate(schema))
    }

    /// An empty term list matches every record.
    pub fn matches(&self, record: &Record) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::None => true,
            FilterMode::And => self.terms.iter().all(|t| t.matches(record)),
            FilterMode::Or => self.terms.iter().any(|t| t.matches(record)),
        }
    }
}

impl Order {
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let field_type = schema.field_type(self.field)?;
        if !field_type.is_ordered() {
            let op = match self.direction {
                super::Direction::Asc => Operator::Lesser,
                super::Direction::Desc => Operator::Greater,
            };
            return Err(Error::UnsupportedOperator {
                field: self.field,
                op,
                field_type,
            });
        }
        Ok(())
    }

    /// Compare two records on this clause, direction applied.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = match (a.get(self.field), b.get(self.field)) {
            (Ok(x), Ok(y)) => x.compare(y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        match self.direction {
            super::Direction::Asc => ordering,
            super::Direction::Desc => ordering.reverse(),
        }
    }
}

impl Query {
    /// Check every term and order clause against the schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        self.filters.validate(schema)?;
        self.orders.iter().try_for_each(|order| order.validate(schema))
    }
}
