//! MongoDB storage implementation of the store backend.
//!
//! Filters and updates arrive already compiled to MongoDB syntax, so the store forwards
//! them to the official driver unchanged and only translates [`QueryOptions`] and the
//! driver's results.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        ClientOptions, CountOptions, FindOneAndUpdateOptions, FindOptions, Hint, ReturnDocument,
    },
};

use docmodel_core::{
    backend::{QueryOptions, StoreBackend, StoreBackendBuilder},
    error::{ModelError, ModelResult},
};

const DUPLICATE_KEY: i32 = 11000;

fn backend_error(err: MongoError) -> ModelError {
    ModelError::Backend(err.to_string())
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn not_found(collection: &str, filter: &Document) -> ModelError {
    ModelError::NotFound(format!("no document in {collection} matches {filter}"))
}

fn sort_document(options: &QueryOptions) -> Option<Document> {
    if options.sort.is_empty() {
        return None;
    }

    Some(
        options
            .sort_keys()
            .map(|(field, ascending)| (field.to_string(), Bson::Int32(if ascending { 1 } else { -1 })))
            .collect(),
    )
}

fn hint(options: &QueryOptions) -> Option<Hint> {
    if options.hint.is_empty() {
        return None;
    }

    Some(Hint::Keys(
        options
            .hint
            .iter()
            .map(|key| match key.strip_prefix('-') {
                Some(field) => (field.to_string(), Bson::Int32(-1)),
                None => (key.clone(), Bson::Int32(1)),
            })
            .collect(),
    ))
}

fn find_options(options: &QueryOptions) -> FindOptions {
    let mut find = FindOptions::default();

    find.projection = options.projection.clone();
    find.sort = sort_document(options);
    find.skip = options.skip;
    find.limit = options.limit;
    find.hint = hint(options);

    find
}

fn count_options(options: &QueryOptions) -> CountOptions {
    let mut count = CountOptions::default();

    count.skip = options.skip;
    count.limit = options.limit.map(i64::unsigned_abs).filter(|limit| *limit > 0);
    count.hint = hint(options);

    count
}

/// MongoDB storage backend.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    /// Creates a builder connecting to `dsn` and using `database`.
    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    #[tracing::instrument(level = "trace", skip(self, options))]
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
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
        self.get_collection(collection)
            .count_documents(filter)
            .with_options(count_options(options))
            .await
            .map_err(backend_error)
    }

    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        let mut find = doc! { "find": collection, "filter": filter };
        if let Some(projection) = &options.projection {
            find.insert("projection", projection.clone());
        }
        if let Some(sort) = sort_document(options) {
            find.insert("sort", sort);
        }
        if let Some(skip) = options.skip {
            find.insert("skip", skip as i64);
        }
        if let Some(limit) = options.limit {
            find.insert("limit", limit);
        }
        if let Some(Hint::Keys(keys)) = hint(options) {
            find.insert("hint", keys);
        }

        self.client
            .database(&self.database)
            .run_command(doc! { "explain": find, "verbosity": "queryPlanner" })
            .await
            .map_err(backend_error)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update(&self, collection: &str, filter: Document, update: Document) -> ModelResult<()> {
        let result = self
            .get_collection(collection)
            .update_one(filter.clone(), update)
            .await
            .map_err(backend_error)?;

        if result.matched_count == 0 {
            return Err(not_found(collection, &filter));
        }

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> ModelResult<u64> {
        Ok(self
            .get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(backend_error)?
            .matched_count)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn update_and_return(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        return_new: bool,
    ) -> ModelResult<Document> {
        let mut options = FindOneAndUpdateOptions::default();
        options.return_document = Some(if return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        });

        self.get_collection(collection)
            .find_one_and_update(filter.clone(), update)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .ok_or_else(|| not_found(collection, &filter))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove(&self, collection: &str, filter: Document) -> ModelResult<()> {
        let result = self
            .get_collection(collection)
            .delete_one(filter.clone())
            .await
            .map_err(backend_error)?;

        if result.deleted_count == 0 {
            return Err(not_found(collection, &filter));
        }

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove_many(&self, collection: &str, filter: Document) -> ModelResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    #[tracing::instrument(level = "trace", skip(self, document))]
    async fn insert(&self, collection: &str, document: Document) -> ModelResult<()> {
        let id = document
            .get("_id")
            .map(ToString::to_string)
            .unwrap_or_default();

        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|err| {
                if is_duplicate_key(&err) {
                    ModelError::DocumentAlreadyExists(id, collection.to_string())
                } else {
                    backend_error(err)
                }
            })?;

        Ok(())
    }

    async fn shutdown(self) -> ModelResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`].
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }

    /// Sets the application name reported to the server.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> ModelResult<Self::Backend> {
        if self.database.is_empty() {
            return Err(ModelError::Initialization("database name must not be empty".to_string()));
        }

        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| ModelError::Initialization(e.to_string()))?;
        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        tracing::debug!(database = %self.database, "Connecting to MongoDB");

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| ModelError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_options_translate_to_driver_options() {
        let options = QueryOptions {
            projection: Some(doc! { "name": 1 }),
            sort: vec!["-age".to_string(), "name".to_string()],
            skip: Some(5),
            limit: Some(10),
            hint: vec!["age".to_string(), "-name".to_string()],
            ..QueryOptions::default()
        };

        let find = find_options(&options);
        assert_eq!(find.sort, Some(doc! { "age": -1, "name": 1 }));
        assert_eq!(find.projection, Some(doc! { "name": 1 }));
        assert_eq!(find.skip, Some(5));
        assert_eq!(find.limit, Some(10));
        assert!(matches!(find.hint, Some(Hint::Keys(keys)) if keys == doc! { "age": 1, "name": -1 }));

        let count = count_options(&options);
        assert_eq!(count.limit, Some(10));
    }

    #[test]
    fn empty_options_leave_driver_defaults() {
        let find = find_options(&QueryOptions::default());

        assert!(find.sort.is_none());
        assert!(find.hint.is_none());
        assert!(count_options(&QueryOptions::default()).limit.is_none());
    }

    #[tokio::test]
    async fn builder_rejects_empty_database_names() {
        let result = MongoDbStore::builder("mongodb://localhost:27017", "").build().await;

        assert!(matches!(result, Err(ModelError::Initialization(_))));
    }
}
