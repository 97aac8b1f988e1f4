//! Storage backend abstraction.
//!
//! The mapping layer never talks to a database directly. Every read and write goes through
//! a [`StoreBackend`], which receives native (MongoDB-style) filter and update documents in
//! the storage layout and executes them verbatim against a named collection.
//!
//! # Traits
//!
//! - [`StoreBackend`]: the async collection-level interface
//! - [`StoreBackendBuilder`]: factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{QueryOptions, StoreBackend};
//! use bson::doc;
//!
//! let backend = InMemoryStore::builder().build().await?;
//!
//! backend.insert("users", doc! { "_id": 1, "name": "Alice" }).await?;
//! let found = backend.find("users", doc! { "name": "Alice" }, &QueryOptions::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt::Debug, sync::Arc};

use crate::{error::ModelResult, filter::TrashMode};

/// Read options passed along with a filter.
///
/// `trash` is resolved into the filter by the mapping layer before the backend sees it;
/// backends only honor projection, sort, skip, limit and hint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Native projection document.
    pub projection: Option<Document>,
    /// Sort keys in priority order; a leading `-` sorts descending.
    pub sort: Vec<String>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Index hint as an ordered key list.
    pub hint: Vec<String>,
    pub trash: TrashMode,
}

impl QueryOptions {
    /// Splits the sort keys into `(field, ascending)` pairs.
    pub fn sort_keys(&self) -> impl Iterator<Item = (&str, bool)> {
        self.sort.iter().map(|key| match key.strip_prefix('-') {
            Some(field) => (field, false),
            None => (key.strip_prefix('+').unwrap_or(key), true),
        })
    }
}

/// Abstract interface for document storage backends.
///
/// Implementers execute native filter and update documents against named collections.
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks; the population engine issues fetches for sibling relation paths
/// concurrently.
///
/// # Error Handling
///
/// "Nothing matched" conditions of the single-record operations are normalized to
/// [`ModelError::NotFound`](crate::error::ModelError::NotFound). Every other failure is
/// reported as the backend's native error, wrapped in
/// [`ModelError::Backend`](crate::error::ModelError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns every document of `collection` matching `filter`.
    ///
    /// Sort, skip, limit, projection and hint from `options` are applied in that order.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no document matches.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document>;

    /// Counts the documents matching `filter`, honoring skip and limit.
    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<u64>;

    /// Describes how the backend would execute the query.
    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document>;

    /// Applies `update` to the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no document matches.
    async fn update(&self, collection: &str, filter: Document, update: Document) -> ModelResult<()>;

    /// Applies `update` to every document matching `filter` and returns how many matched.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> ModelResult<u64>;

    /// Atomically applies `update` to the first matching document and returns it, in its
    /// updated form when `return_new` is set and its previous form otherwise.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no document matches.
    async fn update_and_return(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        return_new: bool,
    ) -> ModelResult<Document>;

    /// Removes the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no document matches.
    async fn remove(&self, collection: &str, filter: Document) -> ModelResult<()>;

    /// Removes every document matching `filter` and returns how many were removed.
    async fn remove_many(&self, collection: &str, filter: Document) -> ModelResult<u64>;

    /// Inserts a document. The collection is created on first use.
    ///
    /// # Errors
    ///
    /// Returns `DocumentAlreadyExists` when a document with the same `_id` is stored.
    async fn insert(&self, collection: &str, document: Document) -> ModelResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> ModelResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<Document>> {
        (**self).find(collection, filter, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        (**self).find_one(collection, filter, options).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<u64> {
        (**self).count(collection, filter, options).await
    }

    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        (**self).explain(collection, filter, options).await
    }

    async fn update(&self, collection: &str, filter: Document, update: Document) -> ModelResult<()> {
        (**self).update(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> ModelResult<u64> {
        (**self).update_many(collection, filter, update).await
    }

    async fn update_and_return(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        return_new: bool,
    ) -> ModelResult<Document> {
        (**self)
            .update_and_return(collection, filter, update, return_new)
            .await
    }

    async fn remove(&self, collection: &str, filter: Document) -> ModelResult<()> {
        (**self).remove(collection, filter).await
    }

    async fn remove_many(&self, collection: &str, filter: Document) -> ModelResult<u64> {
        (**self).remove_many(collection, filter).await
    }

    async fn insert(&self, collection: &str, document: Document) -> ModelResult<()> {
        (**self).insert(collection, document).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> ModelResult<Self::Backend>;
}
