//! Record types and a recording backend shared by the unit tests.

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    backend::{QueryOptions, StoreBackend},
    document::{self, Record, RecordExt},
    error::{ModelError, ModelResult},
    shape::{FieldShape, RecordShape, Shaped, TypeShape},
};

/// Counts how often the field table of [`Tally`] is evaluated.
pub static TALLY_FIELD_WALKS: AtomicUsize = AtomicUsize::new(0);

fn zero_id() -> ObjectId {
    ObjectId::from_bytes([0; 12])
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub city: String,
    pub zip: String,
}

impl Shaped for Address {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Address>("Address", || {
            vec![
                FieldShape::new("city", String::type_shape()),
                FieldShape::new("zip", String::type_shape()).storage("postal_code,omitempty"),
            ]
        }))
    }
}

impl Record for Address {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: ObjectId,
    pub name: String,
    pub age: i64,
    pub tags: Vec<String>,
    pub address: Option<Address>,
    pub deleted_at: Option<bson::DateTime>,
    #[serde(skip)]
    pub password: String,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: zero_id(),
            name: String::new(),
            age: 0,
            tags: Vec::new(),
            address: None,
            deleted_at: None,
            password: String::new(),
        }
    }
}

impl Shaped for User {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<User>("User", || {
            vec![
                FieldShape::new("id", ObjectId::type_shape()).storage("_id"),
                FieldShape::new("name", String::type_shape()),
                FieldShape::new("age", i64::type_shape()).storage("age,omitempty"),
                FieldShape::new("tags", <Vec<String>>::type_shape()).storage("tags,omitempty"),
                FieldShape::new("address", <Option<Address>>::type_shape()),
                FieldShape::new("deleted_at", <Option<bson::DateTime>>::type_shape())
                    .storage("deleted_at,omitempty"),
                FieldShape::new("password", String::type_shape())
                    .natural("-")
                    .storage("-"),
            ]
        }))
    }
}

impl Record for User {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: ObjectId,
    pub title: String,
    pub author_id: ObjectId,
    pub author: Option<User>,
    pub reviewer_ids: Vec<ObjectId>,
    pub reviewers: Vec<User>,
    pub editor_ids: HashMap<String, ObjectId>,
    pub editors: HashMap<String, User>,
    pub deleted: bool,
}

impl Default for Post {
    fn default() -> Self {
        Self {
            id: zero_id(),
            title: String::new(),
            author_id: zero_id(),
            author: None,
            reviewer_ids: Vec::new(),
            reviewers: Vec::new(),
            editor_ids: HashMap::new(),
            editors: HashMap::new(),
            deleted: false,
        }
    }
}

impl Shaped for Post {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Post>("Post", || {
            vec![
                FieldShape::new("id", ObjectId::type_shape()).storage("_id"),
                FieldShape::new("title", String::type_shape()),
                FieldShape::new("author_id", ObjectId::type_shape()),
                FieldShape::new("author", <Option<User>>::type_shape())
                    .storage("-")
                    .relation("author_id"),
                FieldShape::new("reviewer_ids", <Vec<ObjectId>>::type_shape())
                    .storage("reviewer_ids,omitempty"),
                FieldShape::new("reviewers", <Vec<User>>::type_shape())
                    .storage("-")
                    .relation("reviewer_ids"),
                FieldShape::new("editor_ids", <HashMap<String, ObjectId>>::type_shape())
                    .storage("editor_ids,omitempty"),
                FieldShape::new("editors", <HashMap<String, User>>::type_shape())
                    .storage("-")
                    .relation("editor_ids"),
                FieldShape::new("deleted", bool::type_shape()).storage("deleted,omitempty"),
            ]
        }))
    }
}

impl Record for Post {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub id: ObjectId,
    pub title: String,
    pub posts: Vec<Post>,
}

impl Default for Thread {
    fn default() -> Self {
        Self {
            id: zero_id(),
            title: String::new(),
            posts: Vec::new(),
        }
    }
}

impl Shaped for Thread {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Thread>("Thread", || {
            vec![
                FieldShape::new("id", ObjectId::type_shape()).storage("_id"),
                FieldShape::new("title", String::type_shape()),
                FieldShape::new("posts", <Vec<Post>>::type_shape()),
            ]
        }))
    }
}

impl Record for Thread {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: ObjectId,
    pub post_id: ObjectId,
    pub post: Option<Post>,
}

impl Default for Comment {
    fn default() -> Self {
        Self {
            id: zero_id(),
            post_id: zero_id(),
            post: None,
        }
    }
}

impl Shaped for Comment {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Comment>("Comment", || {
            vec![
                FieldShape::new("id", ObjectId::type_shape()).storage("_id"),
                FieldShape::new("post_id", ObjectId::type_shape()),
                FieldShape::new("post", <Option<Post>>::type_shape())
                    .storage("-")
                    .relation("post_id"),
            ]
        }))
    }
}

impl Record for Comment {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tally {
    pub id: i64,
    pub label: String,
}

impl Shaped for Tally {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Tally>("Tally", || {
            TALLY_FIELD_WALKS.fetch_add(1, Ordering::SeqCst);
            vec![
                FieldShape::new("id", i64::type_shape()).storage("_id"),
                FieldShape::new("label", String::type_shape()),
            ]
        }))
    }
}

impl Record for Tally {}

/// Self-referential record, rejected by the metadata cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub children: Vec<Node>,
}

impl Shaped for Node {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Node>("Node", || {
            vec![
                FieldShape::new("id", i64::type_shape()),
                FieldShape::new("children", <Vec<Node>>::type_shape()),
            ]
        }))
    }
}

impl Record for Node {}

/// Record with a credential hidden from the natural layout but kept in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub id: ObjectId,
    pub name: String,
    pub secret: String,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: zero_id(),
            name: String::new(),
            secret: String::new(),
        }
    }
}

impl Shaped for Account {
    fn type_shape() -> TypeShape {
        TypeShape::Record(RecordShape::new::<Account>("Account", || {
            vec![
                FieldShape::new("id", ObjectId::type_shape()).storage("_id"),
                FieldShape::new("name", String::type_shape()),
                FieldShape::new("secret", String::type_shape())
                    .natural("-")
                    .storage("secret_hash"),
            ]
        }))
    }
}

impl Record for Account {}

macro_rules! nested_record {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl Shaped for $name {
            fn type_shape() -> TypeShape {
                TypeShape::Record(RecordShape::new::<$name>(stringify!($name), || {
                    vec![$(FieldShape::new(stringify!($field), <$ty>::type_shape())),*]
                }))
            }
        }

        impl Record for $name {}
    };
}

nested_record!(Layer6 { value: i64 });
nested_record!(Layer5 { inner: Layer6 });
nested_record!(Layer4 { inner: Layer5 });
nested_record!(Layer3 { inner: Layer4 });
nested_record!(Layer2 { label: String, inner: Layer3 });
nested_record!(Layer1 { inner: Layer2 });
nested_record!(Layered { id: i64, chain: Layer1 });

/// Backend recording every call, with just enough filter support for `_id`, `$in`,
/// `$ne` and `$exists` conditions.
#[derive(Debug, Default)]
pub struct FixtureStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    fetches: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    unfiltered: Mutex<HashSet<String>>,
    pub updates: Mutex<Vec<(String, Document, Document)>>,
    pub inserts: Mutex<Vec<(String, Document)>>,
}

impl FixtureStore {
    pub fn seed_records<T: Record>(&self, records: &[T], collection: &str) {
        let documents = records
            .iter()
            .map(|record| record.to_storage(true).unwrap());
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn fetches(&self, collection: &str) -> usize {
        self.fetches.lock().get(collection).copied().unwrap_or_default()
    }

    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().insert(collection.to_string());
    }

    pub fn ignore_filters(&self, collection: &str) {
        self.unfiltered.lock().insert(collection.to_string());
    }

    fn matching(&self, collection: &str, filter: &Document) -> ModelResult<Vec<Document>> {
        if self.failing.lock().contains(collection) {
            return Err(ModelError::Backend(format!("collection {collection} is unavailable")));
        }
        let unfiltered = self.unfiltered.lock().contains(collection);

        Ok(self
            .collections
            .lock()
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| unfiltered || matches(document, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| {
        let value = document::lookup(document, key);
        match condition {
            Bson::Document(operators) if operators.keys().all(|op| op.starts_with('$')) => {
                operators.iter().all(|(op, operand)| match (op.as_str(), operand) {
                    ("$in", Bson::Array(items)) => value.is_some_and(|value| items.contains(value)),
                    ("$ne", operand) => value != Some(operand),
                    ("$exists", Bson::Boolean(exists)) => value.is_some() == *exists,
                    ("$eq", operand) => value == Some(operand),
                    _ => false,
                })
            }
            literal => value == Some(literal),
        }
    })
}

#[async_trait]
impl StoreBackend for FixtureStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        _options: &QueryOptions,
    ) -> ModelResult<Vec<Document>> {
        *self.fetches.lock().entry(collection.to_string()).or_default() += 1;
        self.matching(collection, &filter)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> ModelResult<Document> {
        self.find(collection, filter, options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::NotFound(collection.to_string()))
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        _options: &QueryOptions,
    ) -> ModelResult<u64> {
        Ok(self.matching(collection, &filter)?.len() as u64)
    }

    async fn explain(
        &self,
        collection: &str,
        filter: Document,
        _options: &QueryOptions,
    ) -> ModelResult<Document> {
        Ok(doc! { "collection": collection, "filter": filter })
    }

    async fn update(&self, collection: &str, filter: Document, update: Document) -> ModelResult<()> {
        if self.matching(collection, &filter)?.is_empty() {
            return Err(ModelError::NotFound(collection.to_string()));
        }
        self.updates.lock().push((collection.to_string(), filter, update));
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> ModelResult<u64> {
        let matched = self.matching(collection, &filter)?.len() as u64;
        self.updates.lock().push((collection.to_string(), filter, update));
        Ok(matched)
    }

    async fn update_and_return(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        _return_new: bool,
    ) -> ModelResult<Document> {
        let found = self
            .matching(collection, &filter)?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::NotFound(collection.to_string()))?;
        self.updates.lock().push((collection.to_string(), filter, update));
        Ok(found)
    }

    async fn remove(&self, collection: &str, filter: Document) -> ModelResult<()> {
        let mut collections = self.collections.lock();
        let documents = collections.entry(collection.to_string()).or_default();
        let position = documents
            .iter()
            .position(|document| matches(document, &filter))
            .ok_or_else(|| ModelError::NotFound(collection.to_string()))?;
        documents.remove(position);
        Ok(())
    }

    async fn remove_many(&self, collection: &str, filter: Document) -> ModelResult<u64> {
        let mut collections = self.collections.lock();
        let documents = collections.entry(collection.to_string()).or_default();
        let before = documents.len();
        documents.retain(|document| !matches(document, &filter));
        Ok((before - documents.len()) as u64)
    }

    async fn insert(&self, collection: &str, document: Document) -> ModelResult<()> {
        self.inserts.lock().push((collection.to_string(), document.clone()));
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }
}
