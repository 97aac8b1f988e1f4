#![allow(dead_code)]

use bson::oid::ObjectId;
use docmodel::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct User {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    #[record(storage = "age,omitempty")]
    pub age: i64,
    #[serde(default)]
    #[record(storage = "tags,omitempty")]
    pub tags: Vec<String>,
    #[serde(default)]
    #[record(storage = "deleted_at,omitempty")]
    pub deleted_at: Option<bson::DateTime>,
}

impl User {
    pub fn new(name: &str, age: i64) -> Self {
        Self {
            id: ObjectId::from_bytes([0; 12]),
            name: name.to_string(),
            age,
            tags: Vec::new(),
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Category {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Label {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub code: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Post {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub author_id: ObjectId,
    #[serde(default)]
    #[record(relation = "author_id")]
    pub author: Option<User>,
    #[serde(default)]
    #[record(storage = "reviewer_ids,omitempty")]
    pub reviewer_ids: Vec<ObjectId>,
    #[serde(default)]
    #[record(relation = "reviewer_ids")]
    pub reviewers: Vec<User>,
    #[serde(default)]
    #[record(storage = "editor_ids,omitempty")]
    pub editor_ids: BTreeMap<String, ObjectId>,
    #[serde(default)]
    #[record(relation = "editor_ids")]
    pub editors: BTreeMap<String, User>,
    pub category_id: ObjectId,
    #[serde(default)]
    #[record(relation = "category_id")]
    pub category: Option<Category>,
    #[serde(default)]
    #[record(storage = "label_codes,omitempty")]
    pub label_codes: Vec<i64>,
    #[serde(default)]
    #[record(relation = "label_codes,code")]
    pub labels: Vec<Label>,
    #[serde(default)]
    #[record(storage = "deleted,omitempty")]
    pub deleted: bool,
}

impl Post {
    pub fn new(title: &str, author: &User, category: &Category) -> Self {
        Self {
            id: ObjectId::new(),
            title: title.to_string(),
            author_id: author.id,
            author: None,
            reviewer_ids: Vec::new(),
            reviewers: Vec::new(),
            editor_ids: BTreeMap::new(),
            editors: BTreeMap::new(),
            category_id: category.id,
            category: None,
            label_codes: Vec::new(),
            labels: Vec::new(),
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Comment {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub body: String,
    pub post_id: ObjectId,
    #[serde(default)]
    #[record(relation = "post_id")]
    pub post: Option<Post>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    #[serde(default)]
    #[record(storage = "favourite_tags,omitempty")]
    pub favourite_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Account {
    #[record(storage = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    #[record(natural = "-", storage = "secret_hash")]
    pub secret: String,
}

pub struct Models {
    pub store: Arc<InMemoryStore>,
    pub users: Model<User>,
    pub categories: Model<Category>,
    pub labels: Model<Label>,
    pub posts: Model<Post>,
    pub comments: Model<Comment>,
    pub profiles: Model<Profile>,
    pub accounts: Model<Account>,
}

pub async fn models() -> Models {
    let store = Arc::new(InMemoryStore::builder().build().await.unwrap());
    let shared: Arc<dyn StoreBackend> = store.clone();

    Models {
        users: Model::builder("users").build_shared(shared.clone()).unwrap(),
        categories: Model::builder("categories").build_shared(shared.clone()).unwrap(),
        labels: Model::builder("labels").build_shared(shared.clone()).unwrap(),
        posts: Model::builder("posts").build_shared(shared.clone()).unwrap(),
        comments: Model::builder("comments").build_shared(shared.clone()).unwrap(),
        profiles: Model::builder("profiles").build_shared(shared.clone()).unwrap(),
        accounts: Model::builder("accounts").build_shared(shared).unwrap(),
        store,
    }
}

/// Inserts `record` through a fresh handle and returns the stored version.
pub async fn insert<T: Record>(model: &Model<T>, record: T) -> T {
    let mut handle = model.handle(record);
    handle.insert().await.unwrap();
    handle.into_record().unwrap()
}
