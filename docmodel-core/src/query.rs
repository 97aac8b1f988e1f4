//! Fluent queries over a model's collection.
//!
//! A [`Query<T>`] accumulates a [`FilterExpression`], [`QueryOptions`] and relation
//! population requests, then executes through one of its async executors. Field names are
//! given in the storage layout; the filter is compiled with the model's metadata so
//! soft-deleted records are excluded unless the trash mode says otherwise.
//!
//! # Example
//!
//! ```ignore
//! let posts = model
//!     .query()
//!     .gte("score", 10)
//!     .any_of("tags", vec!["rust", "db"])
//!     .sort(["-score", "title"])
//!     .limit(20)
//!     .populate("author", users.query())
//!     .all()
//!     .await?;
//! ```

use bson::{Bson, Document};

use crate::{
    backend::QueryOptions,
    document::{Record, RecordExt},
    error::{ModelError, ModelResult},
    filter::{self, FilterExpression, Operand, Operator, TrashMode},
    model::Model,
    populate::{Populate, RelationQuery},
};

/// A query bound to a [`Model`].
#[derive(Debug, Clone)]
pub struct Query<T: Record> {
    model: Model<T>,
    filter: FilterExpression,
    options: QueryOptions,
    populate: Populate,
}

impl<T: Record> Query<T> {
    pub fn new(model: Model<T>) -> Self {
        Self {
            model,
            filter: FilterExpression::new(),
            options: QueryOptions::default(),
            populate: Populate::new(),
        }
    }

    pub fn model(&self) -> &Model<T> {
        &self.model
    }

    pub fn filter(&self) -> &FilterExpression {
        &self.filter
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Replaces the filter with a raw filter document.
    pub fn find(mut self, filter: Document) -> Self {
        self.filter = FilterExpression::from_document(filter);
        self
    }

    /// Adds `field <operator> operand`; see [`Operator::parse`] for accepted tokens.
    pub fn name(
        mut self,
        field: impl Into<String>,
        operator: impl Into<Operator>,
        operand: impl Into<Operand>,
    ) -> Self {
        self.filter.name(field, operator, operand);
        self
    }

    pub fn eq(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Eq, operand)
    }

    pub fn ne(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Ne, operand)
    }

    pub fn gt(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Gt, operand)
    }

    pub fn gte(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Gte, operand)
    }

    pub fn lt(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Lt, operand)
    }

    pub fn lte(self, field: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.name(field, Operator::Lte, operand)
    }

    /// Matches when the field equals any of `values` (`$in`).
    pub fn any_of<V: Into<Bson>>(self, field: impl Into<String>, values: Vec<V>) -> Self {
        self.name(field, Operator::In, values)
    }

    /// Matches when the field equals none of `values` (`$nin`).
    pub fn none_of<V: Into<Bson>>(self, field: impl Into<String>, values: Vec<V>) -> Self {
        self.name(field, Operator::Nin, values)
    }

    pub fn exists(self, field: impl Into<String>, exists: bool) -> Self {
        self.name(field, Operator::Exists, exists)
    }

    pub fn regex(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.name(field, Operator::Regex, pattern.into())
    }

    /// Matches the record id. Hex strings that parse as object ids are converted.
    pub fn id(self, id: impl Into<Bson>) -> Self {
        let field = self.model.metadata().id_storage_name().to_string();
        self.name(field, Operator::Eq, filter::normalize_id(id.into()))
    }

    /// Only soft-deleted records, using the record's soft-delete field.
    pub fn eq_deleted(mut self) -> Self {
        let metadata = self.model.metadata().clone();
        self.filter.deleted(&metadata, true);
        self
    }

    /// Only records that are not soft-deleted, using the record's soft-delete field.
    pub fn ne_deleted(mut self) -> Self {
        let metadata = self.model.metadata().clone();
        self.filter.deleted(&metadata, false);
        self
    }

    /// Sets the projection document.
    pub fn fields(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Sets the sort keys; `-field` sorts descending.
    pub fn sort<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.sort = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn hint<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.hint = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn trash(mut self, trash: TrashMode) -> Self {
        self.options.trash = trash;
        self
    }

    /// Requests population of the relation at `path` with `relation` as the sub-query.
    pub fn populate(mut self, path: impl Into<String>, relation: impl Into<RelationQuery>) -> Self {
        self.populate.path(path, relation);
        self
    }

    /// Compiles the filter with the model's metadata and the current trash mode.
    pub fn compile(&self) -> Document {
        self.compile_with(self.options.trash)
    }

    fn compile_with(&self, trash: TrashMode) -> Document {
        self.filter.compile(Some(self.model.metadata()), trash)
    }

    /// Erases the record type, turning the query into a population sub-query.
    pub fn into_relation(self) -> RelationQuery {
        RelationQuery::new(self.model.core().clone(), self.filter, self.options, self.populate)
    }

    async fn decode(&self, mut documents: Vec<Document>) -> ModelResult<Vec<T>> {
        if !self.populate.is_empty() {
            self.populate
                .populate_documents(&mut documents, self.model.metadata())
                .await?;
        }

        documents.into_iter().map(T::from_natural).collect()
    }

    /// Returns the first matching record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn one(&self) -> ModelResult<T> {
        let found = self
            .model
            .backend()
            .find_one(self.model.name(), self.compile(), &self.options)
            .await?;
        let natural = self.model.metadata().to_natural(&found);

        self.decode(vec![natural])
            .await?
            .pop()
            .ok_or_else(|| ModelError::NotFound(format!("no record in {}", self.model.name())))
    }

    /// Returns every matching record.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn all(&self) -> ModelResult<Vec<T>> {
        let documents = self
            .model
            .core()
            .find_natural(self.compile(), &self.options)
            .await?;
        tracing::debug!(count = documents.len(), "Fetched records");

        self.decode(documents).await
    }

    pub async fn count(&self) -> ModelResult<u64> {
        self.model
            .backend()
            .count(self.model.name(), self.compile(), &self.options)
            .await
    }

    pub async fn explain(&self) -> ModelResult<Document> {
        self.model
            .backend()
            .explain(self.model.name(), self.compile(), &self.options)
            .await
    }

    /// Applies a native update document to the first matching record.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn update(&self, update: Document) -> ModelResult<()> {
        self.model
            .backend()
            .update(self.model.name(), self.compile(), update)
            .await
    }

    /// Applies a native update document to every matching record.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn update_all(&self, update: Document) -> ModelResult<u64> {
        self.model
            .backend()
            .update_many(self.model.name(), self.compile(), update)
            .await
    }

    /// Atomically updates the first matching record and returns it, in its updated form
    /// when `return_new` is set.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn update_and_find(&self, update: Document, return_new: bool) -> ModelResult<T> {
        let found = self
            .model
            .backend()
            .update_and_return(self.model.name(), self.compile(), update, return_new)
            .await?;

        T::from_storage(&found)
    }

    /// Soft-deletes the first matching record, or removes it when the record type has no
    /// soft-delete field.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn delete(&self) -> ModelResult<()> {
        let backend = self.model.backend();
        match filter::soft_delete_update(self.model.metadata(), bson::DateTime::now()) {
            Some(update) => backend.update(self.model.name(), self.compile(), update).await,
            None => backend.remove(self.model.name(), self.compile()).await,
        }
    }

    /// Soft-deletes (or removes) every matching record.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn delete_all(&self) -> ModelResult<u64> {
        let backend = self.model.backend();
        match filter::soft_delete_update(self.model.metadata(), bson::DateTime::now()) {
            Some(update) => {
                backend
                    .update_many(self.model.name(), self.compile(), update)
                    .await
            }
            None => backend.remove_many(self.model.name(), self.compile()).await,
        }
    }

    /// Removes the first matching record regardless of soft-delete support.
    pub async fn force_delete(&self) -> ModelResult<()> {
        self.model
            .backend()
            .remove(self.model.name(), self.compile())
            .await
    }

    pub async fn force_delete_all(&self) -> ModelResult<u64> {
        self.model
            .backend()
            .remove_many(self.model.name(), self.compile())
            .await
    }

    /// Restores the first matching soft-deleted record.
    ///
    /// Unless the trash mode is [`TrashMode::All`], only soft-deleted records are matched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the record type has no soft-delete field or nothing matches.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn restore(&self) -> ModelResult<()> {
        let update = self.restore_update()?;
        self.model
            .backend()
            .update(self.model.name(), self.compile_with(self.restore_scope()), update)
            .await
    }

    pub async fn restore_all(&self) -> ModelResult<u64> {
        let update = self.restore_update()?;
        self.model
            .backend()
            .update_many(self.model.name(), self.compile_with(self.restore_scope()), update)
            .await
    }

    fn restore_update(&self) -> ModelResult<Document> {
        filter::restore_update(self.model.metadata()).ok_or_else(|| {
            ModelError::NotFound(format!(
                "{} records cannot be soft-deleted",
                self.model.metadata().type_name()
            ))
        })
    }

    fn restore_scope(&self) -> TrashMode {
        match self.options.trash {
            TrashMode::All => TrashMode::All,
            _ => TrashMode::OnlyDeleted,
        }
    }
}

impl<T: Record> From<Query<T>> for RelationQuery {
    fn from(query: Query<T>) -> Self {
        query.into_relation()
    }
}
