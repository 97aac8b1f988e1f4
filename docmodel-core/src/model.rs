//! Models bind a record type to a collection of a storage backend.
//!
//! A [`Model<T>`] is cheap to clone and carries everything the record controller, the query
//! surface and the population engine need: the collection name, the backend, the parsed
//! record metadata, lifecycle hooks and an optional validator.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::model::{HookEvent, Model};
//!
//! let users = Model::<User>::builder("users")
//!     .on(HookEvent::Save, |user: &mut User| {
//!         user.updated_at = bson::DateTime::now();
//!         Ok(())
//!     })
//!     .build(store)?;
//!
//! let mut handle = users.handle(User::new("ada"));
//! handle.insert().await?;
//! ```

use bson::{Bson, Document};
use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    backend::{QueryOptions, StoreBackend},
    document::Record,
    error::{ModelError, ModelResult},
    metadata::StructMetadata,
    query::Query,
    record::RecordHandle,
};

/// Lifecycle events hooks can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Runs during validation, after the validator.
    Validate,
    /// Runs before every insert and update.
    Save,
    /// Runs before an insert, after the save hooks.
    Insert,
    /// Runs before an update, after the save hooks.
    Update,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Validate => "validate",
            HookEvent::Save => "save",
            HookEvent::Insert => "insert",
            HookEvent::Update => "update",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle hook. Hooks may modify the record; an error aborts the operation.
pub type Hook<T> = Arc<dyn Fn(&mut T) -> ModelResult<()> + Send + Sync>;

/// Validates records before they are inserted.
pub trait RecordValidator<T>: Send + Sync {
    fn validate(&self, record: &T) -> ModelResult<()>;
}

impl<T, F> RecordValidator<T> for F
where
    F: Fn(&T) -> ModelResult<()> + Send + Sync,
{
    fn validate(&self, record: &T) -> ModelResult<()> {
        self(record)
    }
}

/// The type-erased part of a model: collection, backend and metadata.
///
/// Relation queries only need this much to fetch related records.
#[derive(Debug)]
pub struct ModelCore {
    name: String,
    backend: Arc<dyn StoreBackend>,
    metadata: Arc<StructMetadata>,
}

impl ModelCore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn metadata(&self) -> &Arc<StructMetadata> {
        &self.metadata
    }

    /// Runs a find and converts the results into the natural layout.
    pub(crate) async fn find_natural(
        &self,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Vec<Document>> {
        let found = self.backend.find(&self.name, filter, options).await?;

        Ok(found
            .iter()
            .map(|document| self.metadata.to_natural(document))
            .collect())
    }
}

struct ModelInner<T> {
    core: Arc<ModelCore>,
    hooks: Vec<(HookEvent, Hook<T>)>,
    validator: Option<Arc<dyn RecordValidator<T>>>,
}

/// A record type bound to a backend collection.
pub struct Model<T: Record> {
    inner: Arc<ModelInner<T>>,
}

impl<T: Record> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> fmt::Debug for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.core.name)
            .field("record", &self.inner.core.metadata.type_name())
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

impl<T: Record> Model<T> {
    pub fn builder(name: impl Into<String>) -> ModelBuilder<T> {
        ModelBuilder::new(name)
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.inner.core.name
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.core.backend
    }

    pub fn metadata(&self) -> &Arc<StructMetadata> {
        &self.inner.core.metadata
    }

    pub fn core(&self) -> &Arc<ModelCore> {
        &self.inner.core
    }

    /// Starts a query against the model's collection.
    pub fn query(&self) -> Query<T> {
        Query::new(self.clone())
    }

    /// Wraps a record that has not been persisted yet.
    pub fn handle(&self, record: T) -> RecordHandle<T> {
        RecordHandle::new(self.clone(), record, true)
    }

    /// Wraps a record loaded from storage; its current value becomes the snapshot.
    pub fn persisted(&self, record: T) -> RecordHandle<T> {
        RecordHandle::new(self.clone(), record, false)
    }

    /// Loads the record with the given id into a persisted handle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no live record has that id.
    pub async fn load(&self, id: impl Into<Bson>) -> ModelResult<RecordHandle<T>> {
        let record = self.query().id(id).one().await?;

        Ok(self.persisted(record))
    }

    /// Runs the validator, then the validate hooks.
    pub(crate) fn validate(&self, record: &mut T) -> ModelResult<()> {
        if let Some(validator) = &self.inner.validator {
            validator.validate(record)?;
        }

        self.run_hooks(HookEvent::Validate, record)
    }

    /// Runs the hooks registered for `event` in registration order.
    pub(crate) fn run_hooks(&self, event: HookEvent, record: &mut T) -> ModelResult<()> {
        for (_, hook) in self.inner.hooks.iter().filter(|(on, _)| *on == event) {
            (**hook)(record).inspect_err(|err| {
                tracing::debug!(
                    model = self.name(),
                    event = %event,
                    error = %err,
                    "Hook rejected record"
                );
            })?;
        }

        Ok(())
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder<T: Record> {
    name: String,
    hooks: Vec<(HookEvent, Hook<T>)>,
    validator: Option<Arc<dyn RecordValidator<T>>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> ModelBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: Vec::new(),
            validator: None,
            _record: PhantomData,
        }
    }

    /// Registers a hook for `event`. Hooks for the same event run in registration order.
    pub fn on<F>(mut self, event: HookEvent, hook: F) -> Self
    where
        F: Fn(&mut T) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.hooks.push((event, Arc::new(hook)));
        self
    }

    pub fn validator(mut self, validator: impl RecordValidator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Builds the model on top of `backend`.
    ///
    /// # Errors
    ///
    /// Fails when the record metadata cannot be parsed.
    pub fn build(self, backend: impl StoreBackend + 'static) -> ModelResult<Model<T>> {
        self.build_shared(Arc::new(backend))
    }

    /// Builds the model on top of a backend shared with other models.
    ///
    /// # Errors
    ///
    /// Fails when the record metadata cannot be parsed.
    pub fn build_shared(self, backend: Arc<dyn StoreBackend>) -> ModelResult<Model<T>> {
        if self.name.is_empty() {
            return Err(ModelError::Initialization("model name must not be empty".to_string()));
        }
        let metadata = T::metadata()?;
        tracing::debug!(model = %self.name, record = metadata.type_name(), "Built model");

        Ok(Model {
            inner: Arc::new(ModelInner {
                core: Arc::new(ModelCore {
                    name: self.name,
                    backend,
                    metadata,
                }),
                hooks: self.hooks,
                validator: self.validator,
            }),
        })
    }
}
