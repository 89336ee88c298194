//! Query planner and evaluator
//!
//! Strategy, in priority order:
//! 1. no filtering and a single order clause on a sorted field: walk that
//!    index in the requested direction and stop at the limit;
//! 2. AND mode with an equality term on an indexed field: scan only the
//!    smallest such bucket, testing every term;
//! 3. otherwise a full scan.
//!
//! Paths 2 and 3 then apply a stable multi-key sort and the limit.

use super::{Direction, FilterMode, Operator, Order, Query};
use crate::common::Result;
use crate::model::{FieldId, Record, Value};
use crate::storage::IndexedStore;
use std::cmp::Ordering;

/// Access path chosen for a query
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    SortedIndex {
        field: FieldId,
        direction: Direction,
    },
    IndexLookup {
        field: FieldId,
        value: Value,
        candidates: usize,
    },
    FullScan,
}

/// Pick the access path. The query is assumed valid.
pub fn plan(query: &Query, store: &IndexedStore) -> Plan {
    let schema = store.schema();

    if query.filters.mode == FilterMode::None {
        if let [order] = query.orders.as_slice() {
            if schema.is_sorted(order.field) {
                return Plan::SortedIndex {
                    field: order.field,
                    direction: order.direction,
                };
            }
        }
    }

    if query.filters.mode == FilterMode::And {
        let smallest = query
            .filters
            .terms
            .iter()
            .filter(|term| term.op == Operator::Equal)
            .filter_map(|term| {
                store
                    .bucket(term.field, &term.value)
                    .map(|bucket| (term, bucket.len()))
            })
            .min_by_key(|(_, size)| *size);

        if let Some((term, candidates)) = smallest {
            return Plan::IndexLookup {
                field: term.field,
                value: term.value.clone(),
                candidates,
            };
        }
    }

    Plan::FullScan
}

/// Run a query against a store snapshot.
///
/// The whole query is validated first; any invalid term or order clause
/// fails it without partial results.
pub fn evaluate(query: &Query, store: &IndexedStore) -> Result<Vec<Record>> {
    query.validate(store.schema())?;

    let plan = plan(query, store);
    tracing::debug!("Query on {}: {:?}", store.schema().name(), plan);

    let limit = query.max_results();
    let filters = &query.filters;

    let candidates: Box<dyn Iterator<Item = &Record> + '_> = match &plan {
        Plan::SortedIndex { field, direction } => {
            let records = store
                .sorted_buckets(*field, *direction)
                .into_iter()
                .flatten()
                .flat_map(|bucket| store.resolve(bucket))
                .cloned();
            return Ok(match limit {
                Some(n) => records.take(n).collect(),
                None => records.collect(),
            });
        }
        Plan::IndexLookup { field, value, .. } => Box::new(
            store
                .resolve(store.bucket(*field, value).unwrap_or(&[]))
                .into_iter(),
        ),
        Plan::FullScan => Box::new(store.records().iter()),
    };

    let matching = candidates.filter(|record| filters.matches(record)).cloned();

    if query.orders.is_empty() {
        return Ok(match limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        });
    }

    let mut results: Vec<Record> = matching.collect();
    results.sort_by(|a, b| compare_by(&query.orders, a, b));
    if let Some(n) = limit {
        results.truncate(n);
    }
    Ok(results)
}

/// Compare on the first clause; ties fall through to the next one.
fn compare_by(orders: &[Order], a: &Record, b: &Record) -> Ordering {
    orders
        .iter()
        .map(|order| order.compare(a, b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
