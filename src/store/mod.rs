//! Document store abstraction for the collection-join query.
//!
//! The [`DocumentStore`] trait covers the two reads the join needs: an
//! equality-filtered scan of a top-level collection, and the same over one
//! document's named subcollection. Backends:
//!
//! | Backend | `store.provider` | Notes |
//! |---------|------------------|-------|
//! | [`memory::InMemoryStore`] | `memory` | ordered by document id; optional JSON fixture |
//! | [`firestore::FirestoreStore`] | `firestore` | REST `runQuery`; emulator supported |
//!
//! Implementations must be `Send + Sync`; one instance is built at startup
//! and shared by every request.

pub mod firestore;
pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::models::{FilterSet, StoredDocument};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs (`"memory"`, `"firestore"`).
    fn name(&self) -> &str;

    /// All documents in `collection` whose fields equal every filter value.
    ///
    /// An empty filter set returns the whole collection.
    async fn query_collection(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>>;

    /// Documents in `collection/{parent_id}/{subcollection}` matching `filters`.
    async fn query_subcollection(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<StoredDocument>>;
}

/// Builds the backend selected by `store.provider`.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.provider.as_str() {
        "memory" => {
            let store = match &config.fixture {
                Some(path) => memory::InMemoryStore::load_fixture(path)?,
                None => memory::InMemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
        "firestore" => Ok(Arc::new(firestore::FirestoreStore::new(config)?)),
        other => bail!("Unknown store provider: {}", other),
    }
}
