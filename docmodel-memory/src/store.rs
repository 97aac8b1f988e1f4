//! In-memory storage implementation of the store backend.
//!
//! Collections are ordered vectors of BSON documents behind an async-aware read-write lock.
//! Filters and updates are evaluated natively by [`DocumentEvaluator`] and
//! [`apply_update`], so the store accepts the same documents a MongoDB server would for
//! the supported operator subset.

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use docmodel_core::{
    backend::{QueryOptions, StoreBackend, StoreBackendBuilder},
    error::{ModelError, ModelResult},
};

use crate::evaluator::{DocumentEvaluator, apply_update, project, resolve, sort_order};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state; clones share the
/// same data, so one store can back several models.
///
/// # Performance
///
/// Every query scans the whole collection. Index hints are accepted and ignored.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{QueryOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert("users", doc! { "_id": 1, "name": "Alice" }).await?;
///
/// let found = store.find("users", doc! { "name": "Alice" }, &QueryOptions::default()).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of the collections that have received documents.
    pub async fn collections(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }

    /// Number of stored documents in `collection`, ignoring any soft-delete state.
    pub async fn len(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Runs the filter, sort, skip and limit stages and returns the positions of the
    /// selected documents.
    fn select(
        documents: &[Document],
        filter: &Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(filter)? {
                positions.push(position);
            }
        }

        if !options.sort.is_empty() {
            let keys: Vec<(&str, bool)> = options.sort_keys().collect();
            positions.sort_by(|a, b| {
                keys.iter()
                    .map(|(field, ascending)| {
                        let ordering = sort_order(
                            resolve(&documents[*a], field).first().copied(),
                            resolve(&documents[*b], field).first().copied(),
                        );
                        if *ascending { ordering } else { ordering.reverse() }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };

        Ok(positions.into_iter().skip(skip).take(limit).collect())
    }

    fn first_match(documents: &[Document], filter: &Document) -> ModelResult<Option<usize>> {
        for (position, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(filter)? {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }
}

fn not_found(collection: &str, filter: &Document) -> ModelError {
    ModelError::NotFound(format!("no document in {collection} matches {filter}"))
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    #[tracing::instrument(level = "trace", skip(self, options))]
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let selected = Self::select(documents, &filter, options)?;
        tracing::trace!(count = selected.len(), "Selected documents");

        Ok(selected
            .into_iter()
            .map(|position| match &options.projection {
                Some(projection) => project(&documents[position], projection),
                None => documents[position].clone(),
            })
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        let options = QueryOptions {
            limit: Some(1),
            ..options.clone()
        };

        self.find(collection, filter.clone(), &options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(collection, &filter))
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        Ok(Self::select(documents, &filter, options)?.len() as u64)
    }

    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        let store = self.store.read().await;
        let documents = store.get(collection).map(Vec::as_slice).unwrap_or_default();
        let returned = Self::select(documents, &filter, options)?.len() as i64;

        Ok(doc! {
            "queryPlanner": {
                "namespace": collection,
                "parsedQuery": filter,
                "winningPlan": { "stage": "COLLSCAN" },
                "hint": options.hint.clone(),
            },
            "executionStats": {
                "nReturned": returned,
                "totalDocsExamined": documents.len() as i64,
            },
        })
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update(&self, collection: &str, filter: Document, update: Document) -> ModelResult<()> {
        let mut store = self.store.write().await;
        let documents = store
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, &filter))?;
        let position =
            Self::first_match(documents, &filter)?.ok_or_else(|| not_found(collection, &filter))?;

        apply_update(&mut documents[position], &update)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> ModelResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };
        let positions = Self::select(documents, &filter, &QueryOptions::default())?;

        let mut updated = Vec::with_capacity(positions.len());
        for position in &positions {
            let mut document = documents[*position].clone();
            apply_update(&mut document, &update)?;
            updated.push(document);
        }
        for (position, document) in positions.iter().zip(updated) {
            documents[*position] = document;
        }

        Ok(positions.len() as u64)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update_and_return(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        return_new: bool,
    ) -> ModelResult<Document> {
        let mut store = self.store.write().await;
        let documents = store
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, &filter))?;
        let position =
            Self::first_match(documents, &filter)?.ok_or_else(|| not_found(collection, &filter))?;

        let previous = documents[position].clone();
        apply_update(&mut documents[position], &update)?;

        Ok(if return_new { documents[position].clone() } else { previous })
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove(&self, collection: &str, filter: Document) -> ModelResult<()> {
        let mut store = self.store.write().await;
        let documents = store
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, &filter))?;
        let position =
            Self::first_match(documents, &filter)?.ok_or_else(|| not_found(collection, &filter))?;

        documents.remove(position);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove_many(&self, collection: &str, filter: Document) -> ModelResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };
        let positions = Self::select(documents, &filter, &QueryOptions::default())?;

        let mut position = 0;
        documents.retain(|_| {
            let keep = positions.binary_search(&position).is_err();
            position += 1;
            keep
        });

        Ok(positions.len() as u64)
    }

    /// Inserts a document, generating an object id when `_id` is missing.
    #[tracing::instrument(level = "trace", skip(self, document))]
    async fn insert(&self, collection: &str, mut document: Document) -> ModelResult<()> {
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();
        if documents.iter().any(|stored| stored.get("_id") == Some(&id)) {
            return Err(ModelError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
        }

        documents.push(document);
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: StoreMap,
}

impl InMemoryStoreBuilder {
    /// Preloads `documents` into `collection`. Documents are stored as given.
    pub fn seed(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.seed.entry(collection.into()).or_default().extend(documents);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> ModelResult<Self::Backend> {
        Ok(InMemoryStore {
            store: Arc::new(RwLock::new(self.seed)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemoryStore {
        InMemoryStore::builder()
            .seed(
                "users",
                vec![
                    doc! { "_id": 1, "name": "ada", "age": 36 },
                    doc! { "_id": 2, "name": "bob", "age": 17 },
                    doc! { "_id": 3, "name": "cy", "age": 52, "deleted": true },
                ],
            )
            .build()
            .await
            .unwrap()
    }

    fn names(documents: &[Document]) -> Vec<&str> {
        documents
            .iter()
            .map(|document| document.get_str("name").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn find_applies_sort_skip_limit_and_projection() {
        let store = seeded().await;
        let options = QueryOptions {
            sort: vec!["-age".to_string()],
            skip: Some(1),
            limit: Some(1),
            projection: Some(doc! { "name": 1 }),
            ..QueryOptions::default()
        };

        let found = store.find("users", doc! {}, &options).await.unwrap();
        assert_eq!(found, vec![doc! { "_id": 1, "name": "ada" }]);

        let adults = store
            .find("users", doc! { "age": { "$gte": 18 }, "deleted": { "$ne": true } }, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(names(&adults), vec!["ada"]);
        assert!(store.find("missing", doc! {}, &QueryOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_record_operations_report_not_found() {
        let store = seeded().await;
        let nobody = doc! { "_id": 99 };

        assert!(store.find_one("users", nobody.clone(), &QueryOptions::default()).await.unwrap_err().is_not_found());
        assert!(store.update("users", nobody.clone(), doc! { "$set": { "a": 1 } }).await.unwrap_err().is_not_found());
        assert!(store.remove("users", nobody.clone()).await.unwrap_err().is_not_found());
        assert!(store
            .update_and_return("users", nobody, doc! { "$set": { "a": 1 } }, true)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn updates_and_removals() {
        let store = seeded().await;

        let previous = store
            .update_and_return("users", doc! { "_id": 1 }, doc! { "$inc": { "age": 1 } }, false)
            .await
            .unwrap();
        assert_eq!(previous.get_i32("age").unwrap(), 36);
        let current = store
            .find_one("users", doc! { "_id": 1 }, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(current.get_i32("age").unwrap(), 37);

        let matched = store
            .update_many("users", doc! { "age": { "$lt": 40 } }, doc! { "$set": { "young": true } })
            .await
            .unwrap();
        assert_eq!(matched, 2);

        let removed = store.remove_many("users", doc! { "young": true }).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len("users").await, 1);
        assert_eq!(store.count("users", doc! {}, &QueryOptions::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = InMemoryStore::new();

        store.insert("users", doc! { "_id": 1 }).await.unwrap();
        store.insert("users", doc! { "name": "generated" }).await.unwrap();

        match store.insert("users", doc! { "_id": 1 }).await {
            Err(ModelError::DocumentAlreadyExists(id, collection)) => {
                assert_eq!(id, "1");
                assert_eq!(collection, "users");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let generated = store
            .find_one("users", doc! { "name": "generated" }, &QueryOptions::default())
            .await
            .unwrap();
        assert!(generated.get_object_id("_id").is_ok());
        assert_eq!(store.collections().await, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn explain_reports_a_collection_scan() {
        let store = seeded().await;

        let plan = store
            .explain("users", doc! { "name": "ada" }, &QueryOptions::default())
            .await
            .unwrap();
        let stats = plan.get_document("executionStats").unwrap();
        assert_eq!(stats.get_i64("nReturned").unwrap(), 1);
        assert_eq!(stats.get_i64("totalDocsExamined").unwrap(), 3);
    }
}
