//! In-memory [`DocumentStore`] for tests and local development.
//!
//! Collections are `BTreeMap`s keyed by document id, so every query returns
//! documents in ascending id order. Subcollections hang off their parent
//! document and may nest. The store is read-only once loaded.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{FilterSet, StoredDocument};

use super::DocumentStore;

type Collection = BTreeMap<String, Node>;

#[derive(Debug, Default)]
struct Node {
    fields: Map<String, Value>,
    subcollections: BTreeMap<String, Collection>,
}

/// Fixture document: `{"id", "fields", "subcollections": {name: [docs]}}`.
#[derive(Debug, Deserialize)]
struct FixtureDoc {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    subcollections: BTreeMap<String, Vec<FixtureDoc>>,
}

impl From<FixtureDoc> for Node {
    fn from(doc: FixtureDoc) -> Self {
        Node {
            fields: doc.fields,
            subcollections: doc
                .subcollections
                .into_iter()
                .map(|(name, docs)| (name, collection_from(docs)))
                .collect(),
        }
    }
}

fn collection_from(docs: Vec<FixtureDoc>) -> Collection {
    docs.into_iter()
        .map(|d| (d.id.clone(), Node::from(d)))
        .collect()
}

fn filtered(collection: Option<&Collection>, filters: &FilterSet) -> Vec<StoredDocument> {
    collection
        .into_iter()
        .flatten()
        .map(|(id, node)| StoredDocument::new(id.clone(), node.fields.clone()))
        .filter(|doc| doc.matches(filters))
        .collect()
}

pub struct InMemoryStore {
    collections: BTreeMap<String, Collection>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: BTreeMap::new(),
        }
    }

    /// Parses a fixture of the form `{"<collection>": [FixtureDoc, ...]}`.
    pub fn from_fixture_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<FixtureDoc>> =
            serde_json::from_str(json).context("Failed to parse store fixture")?;
        let collections = raw
            .into_iter()
            .map(|(name, docs)| (name, collection_from(docs)))
            .collect();
        Ok(Self { collections })
    }

    pub fn load_fixture(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read store fixture: {}", path.display()))?;
        Self::from_fixture_str(&json)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query_collection(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>> {
        Ok(filtered(self.collections.get(collection), filters))
    }

    async fn query_subcollection(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>> {
        let children = self
            .collections
            .get(collection)
            .and_then(|c| c.get(parent_id))
            .and_then(|p| p.subcollections.get(subcollection));
        Ok(filtered(children, filters))
    }
}
