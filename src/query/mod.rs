//! Queries over the indexed store
//!
//! A [`Query`] is a set of filter terms joined by AND or OR, an ordered
//! list of sort clauses and an optional limit. It is plain data: it travels
//! inside messages and can be written as JSON.

pub mod engine;
pub mod filter;

pub use engine::{evaluate, plan, Plan};

use crate::model::{FieldId, Value};
use serde::{Deserialize, Serialize};

/// How the filter terms combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// No filtering; every record matches
    #[default]
    None,
    And,
    Or,
}

/// Comparison between a record field (left) and a query value (right)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    Lesser,
    GreaterOrEqual,
    LesserOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: FieldId,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default)]
    pub terms: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: FieldId,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Query {
    /// Every record, unordered
    pub fn all() -> Self {
        Self::default()
    }

    /// Records matching every term
    pub fn and(terms: Vec<Filter>) -> Self {
        Self {
            filters: Filters {
                mode: FilterMode::And,
                terms,
            },
            ..Self::default()
        }
    }

    /// Records matching at least one term
    pub fn or(terms: Vec<Filter>) -> Self {
        Self {
            filters: Filters {
                mode: FilterMode::Or,
                terms,
            },
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: FieldId, direction: Direction) -> Self {
        self.orders.push(Order { field, direction });
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Effective limit; `None` when unbounded
    pub fn max_results(&self) -> Option<usize> {
        match self.limit {
            Some(n) if n > 0 => Some(n as usize),
            _ => None,
        }
    }
}

impl Filter {
    pub fn new(field: FieldId, op: Operator, value: Value) -> Self {
        Self { field, op, value }
    }
}
