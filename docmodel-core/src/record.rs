//! The record controller: lifecycle and change tracking of one record.
//!
//! A [`RecordHandle`] owns a live record, whether it has been persisted, and a snapshot of
//! its last persisted state. Updates send only the fields that differ from the snapshot.
//!
//! ```text
//! new --insert--> persisted --update / update_and_find--> persisted
//!                 persisted --delete--> soft-deleted (or removed)
//!                 soft-deleted --restore--> persisted
//! ```

use bson::{Bson, Document, doc, oid::ObjectId};

use crate::{
    diff,
    document::{self, Record, RecordExt},
    error::{ModelError, ModelResult},
    filter::{FilterExpression, Operator, TrashMode},
    metadata::{Container, ElementKind, FieldDescriptor},
    model::{HookEvent, Model},
    populate::Populate,
    query::Query,
    shape::ScalarKind,
};

/// A record bound to its model, with lifecycle state and a persisted snapshot.
pub struct RecordHandle<T: Record> {
    model: Model<T>,
    record: Option<T>,
    snapshot: Option<T>,
    is_new: bool,
}

impl<T: Record + std::fmt::Debug> std::fmt::Debug for RecordHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordHandle")
            .field("model", &self.model.name())
            .field("record", &self.record)
            .field("is_new", &self.is_new)
            .finish()
    }
}

impl<T: Record> RecordHandle<T> {
    pub(crate) fn new(model: Model<T>, record: T, is_new: bool) -> Self {
        let snapshot = (!is_new).then(|| record.clone());

        Self {
            model,
            record: Some(record),
            snapshot,
            is_new,
        }
    }

    pub fn model(&self) -> &Model<T> {
        &self.model
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn record(&self) -> Option<&T> {
        self.record.as_ref()
    }

    pub fn record_mut(&mut self) -> Option<&mut T> {
        self.record.as_mut()
    }

    /// The last persisted state, `None` for new records.
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    /// Removes the record from the handle. Later operations fail with a state error.
    pub fn detach(&mut self) -> Option<T> {
        self.record.take()
    }

    pub fn into_record(self) -> Option<T> {
        self.record
    }

    fn live(&self) -> ModelResult<&T> {
        self.record
            .as_ref()
            .ok_or_else(|| ModelError::State("record is detached".to_string()))
    }

    fn tracked(&self) -> Option<(Document, Document)> {
        if self.is_new {
            return None;
        }
        let current = self.record.as_ref()?.to_natural().ok()?;
        let snapshot = self.snapshot.as_ref()?.to_natural().ok()?;

        Some((current, snapshot))
    }

    /// Returns `true` when the value at the dotted `path` differs from the snapshot.
    ///
    /// Always `false` for new or detached records.
    pub fn is_modified(&self, path: &str) -> bool {
        self.tracked().is_some_and(|(current, snapshot)| {
            diff::is_modified(self.model.metadata(), &current, &snapshot, path)
        })
    }

    /// Lists the field paths that differ from the snapshot.
    pub fn modified(&self, include_nested: bool) -> Vec<String> {
        self.tracked()
            .map(|(current, snapshot)| {
                diff::modified(self.model.metadata(), &current, &snapshot, include_nested)
            })
            .unwrap_or_default()
    }

    /// Runs the model's validator and validate hooks.
    pub fn validate(&mut self) -> ModelResult<()> {
        let model = self.model.clone();
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| ModelError::State("record is detached".to_string()))?;

        model.validate(record)
    }

    /// Inserts new records and updates persisted ones.
    pub async fn save(&mut self) -> ModelResult<()> {
        if self.is_new { self.insert().await } else { self.update().await }
    }

    /// Inserts the record.
    ///
    /// An empty object id is generated; empty text and zero integer ids are rejected.
    /// Validation, then the save and insert hooks run before the storage write.
    ///
    /// # Errors
    ///
    /// - `State` if the record is already persisted or detached.
    /// - `Validation` if the id is missing or empty, or validation fails.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn insert(&mut self) -> ModelResult<()> {
        if !self.is_new {
            return Err(ModelError::State("record is already persisted".to_string()));
        }
        let model = self.model.clone();
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| ModelError::State("record is detached".to_string()))?;

        assign_id(record, model.metadata().id_field())?;
        model.validate(record)?;
        model.run_hooks(HookEvent::Save, record)?;
        model.run_hooks(HookEvent::Insert, record)?;

        let document = model.metadata().to_storage(&record.to_natural()?, true);
        model.backend().insert(model.name(), document).await?;

        self.is_new = false;
        self.snapshot = self.record.clone();
        tracing::debug!("Inserted record");

        Ok(())
    }

    /// Persists the fields that changed since the snapshot.
    ///
    /// The save and update hooks run first. Nothing is sent when no field changed.
    ///
    /// # Errors
    ///
    /// - `State` if the record is new or detached.
    /// - `NotFound` if the stored record no longer exists.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn update(&mut self) -> ModelResult<()> {
        if self.is_new {
            return Err(ModelError::State("record is not persisted".to_string()));
        }
        let model = self.model.clone();
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| ModelError::State("record is detached".to_string()))?;

        model.run_hooks(HookEvent::Save, record)?;
        model.run_hooks(HookEvent::Update, record)?;

        let metadata = model.metadata();
        let current = metadata.to_storage(&record.to_natural()?, false);
        let previous = match &self.snapshot {
            Some(snapshot) => metadata.to_storage(&snapshot.to_natural()?, false),
            None => Document::new(),
        };

        let update = delta(metadata.fields(), &current, &previous);
        if update.is_empty() {
            tracing::trace!("No changes to persist");
            return Ok(());
        }

        model
            .backend()
            .update(model.name(), self.id_filter()?, update)
            .await?;
        self.snapshot = self.record.clone();

        Ok(())
    }

    /// Applies a native update atomically and replaces the record with the returned version.
    ///
    /// # Errors
    ///
    /// - `State` if the record is new or detached.
    /// - `NotFound` if the stored record no longer exists.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn update_and_find(&mut self, update: Document, return_new: bool) -> ModelResult<()> {
        if self.is_new {
            return Err(ModelError::State("record is not persisted".to_string()));
        }
        self.live()?;

        let found = self
            .model
            .backend()
            .update_and_return(self.model.name(), self.id_filter()?, update, return_new)
            .await?;
        let record = T::from_storage(&found)?;

        self.snapshot = Some(record.clone());
        self.record = Some(record);

        Ok(())
    }

    /// Soft-deletes the record, or removes it when the record type has no soft-delete field.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn delete(&mut self) -> ModelResult<()> {
        if self.is_new {
            return Err(ModelError::State("record is not persisted".to_string()));
        }

        self.scoped_query(TrashMode::ExcludeDeleted)?.delete().await
    }

    /// Restores a soft-deleted record.
    #[tracing::instrument(level = "debug", skip(self), fields(model = self.model.name()))]
    pub async fn restore(&mut self) -> ModelResult<()> {
        if self.is_new {
            return Err(ModelError::State("record is not persisted".to_string()));
        }

        self.scoped_query(TrashMode::OnlyDeleted)?.restore().await
    }

    /// Populates relations of the live record.
    pub async fn populate(&mut self, populate: &Populate) -> ModelResult<()> {
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| ModelError::State("record is detached".to_string()))?;

        populate.one(record).await
    }

    fn snapshot_id(&self) -> ModelResult<Bson> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or_else(|| ModelError::State("record has no persisted snapshot".to_string()))?;
        let id_field = self
            .model
            .metadata()
            .id_field()
            .ok_or_else(|| ModelError::Validation("record has no id field".to_string()))?;

        Ok(snapshot
            .to_natural()?
            .get(id_field.natural_key())
            .cloned()
            .unwrap_or(Bson::Null))
    }

    fn id_filter(&self) -> ModelResult<Document> {
        let mut filter = FilterExpression::new();
        filter.name(self.model.metadata().id_storage_name(), Operator::Eq, self.snapshot_id()?);

        Ok(filter.compile(Some(self.model.metadata()), TrashMode::All))
    }

    fn scoped_query(&self, trash: TrashMode) -> ModelResult<Query<T>> {
        Ok(self.model.query().id(self.snapshot_id()?).trash(trash))
    }
}

/// Checks the record id before an insert, generating empty object ids.
fn assign_id<T: Record>(record: &mut T, id_field: Option<&FieldDescriptor>) -> ModelResult<()> {
    let id_field =
        id_field.ok_or_else(|| ModelError::Validation("record has no id field".to_string()))?;
    let mut natural = record.to_natural()?;

    let generate = match natural.get(id_field.natural_key()) {
        Some(Bson::ObjectId(id)) => id.bytes() == [0; 12],
        Some(Bson::String(id)) => {
            if id.is_empty() {
                return Err(ModelError::Validation("record id is empty".to_string()));
            }
            false
        }
        Some(Bson::Int32(0)) | Some(Bson::Int64(0)) => {
            return Err(ModelError::Validation("record id is zero".to_string()));
        }
        Some(Bson::Null) | None => {
            if id_field.kind != ElementKind::Scalar(ScalarKind::ObjectId) {
                return Err(ModelError::Validation("record id is missing".to_string()));
            }
            true
        }
        Some(_) => false,
    };

    if generate {
        natural.insert(id_field.natural_key(), ObjectId::new());
        *record = T::from_natural(natural)?;
    }

    Ok(())
}

/// Whether an omit-empty field holding `value` should be unset rather than set.
fn clears(field: &FieldDescriptor, value: Option<&Bson>) -> bool {
    let Some(value) = value.filter(|value| !matches!(value, Bson::Null)) else {
        return field.storage_omit_empty;
    };
    if !field.storage_omit_empty || field.nullable {
        return false;
    }

    let measurable = match field.container {
        Container::Sequence | Container::Mapping => true,
        Container::Plain => matches!(
            field.kind,
            ElementKind::Scalar(ScalarKind::Text | ScalarKind::Int | ScalarKind::Float)
        ),
    };

    measurable && document::is_empty_value(value)
}

/// Builds the `$set` / `$unset` update for the storage fields that changed.
fn delta(fields: &[FieldDescriptor], current: &Document, previous: &Document) -> Document {
    let mut set = Document::new();
    let mut unset = Document::new();

    for field in fields.iter().filter(|field| field.is_persisted()) {
        let value = current.get(&field.storage);
        if value == previous.get(&field.storage) {
            continue;
        }

        if clears(field, value) {
            unset.insert(field.storage.clone(), "");
        } else {
            set.insert(field.storage.clone(), value.cloned().unwrap_or(Bson::Null));
        }
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::StoreBackend,
        fixtures::{Account, Address, FixtureStore, Post, User},
    };
    use std::sync::Arc;

    fn users(store: &Arc<FixtureStore>) -> Model<User> {
        let shared: Arc<dyn StoreBackend> = store.clone();
        Model::builder("users").build_shared(shared).unwrap()
    }

    fn ada() -> User {
        User {
            name: "ada".to_string(),
            age: 36,
            tags: vec!["math".to_string()],
            ..User::default()
        }
    }

    #[tokio::test]
    async fn insert_generates_object_ids_and_snapshots() {
        let store = Arc::new(FixtureStore::default());
        let mut handle = users(&store).handle(ada());

        assert!(!handle.is_modified("name"));
        handle.insert().await.unwrap();

        let user = handle.record().unwrap();
        assert_ne!(user.id.bytes(), [0; 12]);
        assert!(!handle.is_new());
        assert_eq!(handle.snapshot(), Some(user));

        let inserts = store.inserts.lock();
        assert_eq!(inserts[0].1.get_object_id("_id").unwrap(), user.id);
        assert!(inserts[0].1.get("deleted_at").is_none());
    }

    #[tokio::test]
    async fn insert_rejects_persisted_and_detached_records() {
        let store = Arc::new(FixtureStore::default());
        let model = users(&store);

        let mut persisted = model.persisted(User { id: ObjectId::new(), ..ada() });
        assert!(matches!(persisted.insert().await, Err(ModelError::State(_))));

        let mut detached = model.handle(ada());
        detached.detach();
        assert!(matches!(detached.insert().await, Err(ModelError::State(_))));
        assert!(store.inserts.lock().is_empty());
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_short_circuit() {
        let store = Arc::new(FixtureStore::default());
        let shared: Arc<dyn StoreBackend> = store.clone();
        let model = Model::<User>::builder("users")
            .on(HookEvent::Save, |user: &mut User| {
                user.tags.push("save".to_string());
                Ok(())
            })
            .on(HookEvent::Insert, |user: &mut User| {
                user.tags.push("insert".to_string());
                Ok(())
            })
            .on(HookEvent::Validate, |user: &mut User| {
                user.tags.push("validate".to_string());
                Ok(())
            })
            .build_shared(shared)
            .unwrap();

        let mut handle = model.handle(User { tags: Vec::new(), ..ada() });
        handle.insert().await.unwrap();
        assert_eq!(handle.record().unwrap().tags, vec!["validate", "save", "insert"]);

        let rejecting = Model::<User>::builder("users")
            .validator(|user: &User| {
                if user.name.is_empty() {
                    Err(ModelError::Validation("name is required".to_string()))
                } else {
                    Ok(())
                }
            })
            .on(HookEvent::Insert, |_: &mut User| {
                Err(ModelError::Validation("unreachable".to_string()))
            })
            .build(FixtureStore::default())
            .unwrap();
        let mut nameless = rejecting.handle(User { name: String::new(), ..ada() });
        match nameless.insert().await {
            Err(ModelError::Validation(message)) => assert_eq!(message, "name is required"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_sends_only_the_delta() {
        let store = Arc::new(FixtureStore::default());
        let model = users(&store);
        let mut handle = model.handle(ada());
        handle.insert().await.unwrap();

        handle.update().await.unwrap();
        assert!(store.updates.lock().is_empty());

        {
            let user = handle.record_mut().unwrap();
            user.name = "ada lovelace".to_string();
            user.age = 0;
            user.address = Some(Address { city: "London".to_string(), zip: String::new() });
        }
        assert_eq!(handle.modified(false), vec!["name", "age", "address"]);
        handle.update().await.unwrap();

        let updates = store.updates.lock();
        let (_, filter, update) = &updates[0];
        assert_eq!(filter, &doc! { "_id": handle.record().unwrap().id });
        assert_eq!(
            update,
            &doc! {
                "$set": { "name": "ada lovelace", "address": { "city": "London", "postal_code": "" } },
                "$unset": { "age": "" },
            }
        );
        drop(updates);
        assert!(handle.modified(true).is_empty());
    }

    #[tokio::test]
    async fn hidden_fields_are_inserted_and_updated() {
        let store = Arc::new(FixtureStore::default());
        let shared: Arc<dyn StoreBackend> = store.clone();
        let accounts = Model::<Account>::builder("accounts").build_shared(shared).unwrap();
        let mut handle = accounts.handle(Account {
            name: "ada".to_string(),
            secret: "first".to_string(),
            ..Account::default()
        });

        handle.insert().await.unwrap();
        assert_eq!(store.inserts.lock()[0].1.get_str("secret_hash").unwrap(), "first");

        handle.record_mut().unwrap().secret = "second".to_string();
        assert!(handle.is_modified("secret"));
        handle.update().await.unwrap();

        let updates = store.updates.lock();
        assert_eq!(updates[0].2, doc! { "$set": { "secret_hash": "second" } });
    }

    #[test]
    fn delta_classification() {
        let metadata = crate::metadata::MetadataCache::new(16).parse::<Post>().unwrap();
        let previous = doc! { "title": "a", "reviewer_ids": [ObjectId::new()], "deleted": true };
        let current = doc! { "title": "", "reviewer_ids": [], "deleted": false };

        assert_eq!(
            delta(metadata.fields(), &current, &previous),
            doc! {
                "$set": { "title": "", "deleted": false },
                "$unset": { "reviewer_ids": "" },
            }
        );
    }

    #[tokio::test]
    async fn update_requires_a_persisted_record() {
        let store = Arc::new(FixtureStore::default());
        let mut handle = users(&store).handle(ada());

        assert!(matches!(handle.update().await, Err(ModelError::State(_))));
        assert!(matches!(handle.delete().await, Err(ModelError::State(_))));
    }

    #[tokio::test]
    async fn update_and_find_replaces_the_record() {
        let store = Arc::new(FixtureStore::default());
        let model = users(&store);
        let mut handle = model.handle(ada());
        handle.insert().await.unwrap();
        handle.record_mut().unwrap().name = "local edit".to_string();

        handle
            .update_and_find(doc! { "$set": { "age": 37 } }, true)
            .await
            .unwrap();

        assert_eq!(handle.record().unwrap().name, "ada");
        assert!(handle.modified(false).is_empty());
    }

    #[tokio::test]
    async fn delete_soft_deletes_by_snapshot_id() {
        let store = Arc::new(FixtureStore::default());
        let model = users(&store);
        let mut handle = model.handle(ada());
        handle.insert().await.unwrap();
        let id = handle.record().unwrap().id;

        handle.delete().await.unwrap();

        let updates = store.updates.lock();
        let (_, filter, update) = &updates[0];
        assert_eq!(filter, &doc! { "_id": id, "deleted_at": { "$exists": false } });
        assert!(update.get_document("$set").unwrap().contains_key("deleted_at"));
    }
}
