//! Collection-join query.
//!
//! Fetches parents from a collection, then for each parent fetches its named
//! subcollection and nests the children under the subcollection's name.
//! Both reads use exact-equality filters taken from request parameters:
//! `collection_<field>=v` filters parents, `subcollection_<field>=v` filters
//! children.
//!
//! Inclusion rule: with no child filters every matching parent is returned
//! (even with zero children); with child filters a parent is returned only
//! if at least one child matched.
//!
//! Result order is the order the store returns parents in. The in-memory
//! store sorts by document id; Firestore returns documents ordered by name.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::models::{FilterSet, JoinedRecord};
use crate::store::DocumentStore;

pub const COLLECTION_PREFIX: &str = "collection_";
pub const SUBCOLLECTION_PREFIX: &str = "subcollection_";

/// Parent and child equality filters for one join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinFilters {
    pub collection: FilterSet,
    pub subcollection: FilterSet,
}

/// Splits `collection_*` / `subcollection_*` parameters into filter sets.
///
/// Other keys are ignored, as are keys with nothing after the prefix. When
/// a key repeats, the first value wins. Values are always strings.
pub fn parse_filters<I, K, V>(params: I) -> JoinFilters
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut filters = JoinFilters::default();
    for (key, value) in params {
        let key = key.as_ref();
        let (target, field) = if let Some(field) = key.strip_prefix(COLLECTION_PREFIX) {
            (&mut filters.collection, field)
        } else if let Some(field) = key.strip_prefix(SUBCOLLECTION_PREFIX) {
            (&mut filters.subcollection, field)
        } else {
            continue;
        };
        if field.is_empty() {
            continue;
        }
        target
            .entry(field.to_string())
            .or_insert_with(|| Value::String(value.into()));
    }
    filters
}

/// Runs the join against `store`.
pub async fn query_with_subcollection(
    store: &dyn DocumentStore,
    collection: &str,
    subcollection: &str,
    filters: &JoinFilters,
) -> Result<Vec<JoinedRecord>> {
    let parents = store
        .query_collection(collection, &filters.collection)
        .await
        .with_context(|| format!("querying collection '{}'", collection))?;

    let require_children = !filters.subcollection.is_empty();
    let mut results = Vec::with_capacity(parents.len());

    for parent in parents {
        let children = store
            .query_subcollection(collection, &parent.id, subcollection, &filters.subcollection)
            .await
            .with_context(|| {
                format!(
                    "querying subcollection '{}' of {}/{}",
                    subcollection, collection, parent.id
                )
            })?;

        if require_children && children.is_empty() {
            continue;
        }
        results.push(JoinedRecord {
            parent,
            subcollection: subcollection.to_string(),
            children,
        });
    }

    tracing::debug!(
        collection,
        subcollection,
        store = store.name(),
        returned = results.len(),
        "join query complete"
    );
    Ok(results)
}
