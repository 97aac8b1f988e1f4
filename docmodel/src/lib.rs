//! Main docmodel crate: a document mapping layer for Rust records.
//!
//! This crate is the primary entry point of the docmodel framework. It re-exports the core
//! types, the `#[derive(Record)]` macro and the storage backends.
//!
//! # Features
//!
//! - **Record metadata** - Natural and storage names, omit-empty rules and relations derived
//!   once per type and cached
//! - **Change tracking** - Updates send only the fields that differ from the last persisted
//!   snapshot
//! - **Filters** - Operator expressions compiled to MongoDB syntax, with soft-delete scoping
//! - **Population** - Relation fields hydrated with one fetch per relation path
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
//! #[serde(default)]
//! pub struct User {
//!     #[record(storage = "_id")]
//!     pub id: ObjectId,
//!     pub name: String,
//!     #[record(storage = "age,omitempty")]
//!     pub age: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> ModelResult<()> {
//!     let store = InMemoryStore::builder().build().await?;
//!     let users = Model::<User>::builder("users").build(store)?;
//!
//!     // Insert a record; the empty object id is generated.
//!     let mut ada = users.handle(User { name: "Ada".to_string(), ..User::default() });
//!     ada.insert().await?;
//!
//!     // Partial update: only `age` is sent.
//!     ada.record_mut().unwrap().age = 36;
//!     ada.update().await?;
//!
//!     let adults = users.query().gte("age", 18).all().await?;
//!     println!("Adults: {adults:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Relations
//!
//! ```ignore
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
//! #[serde(default)]
//! pub struct Post {
//!     #[record(storage = "_id")]
//!     pub id: ObjectId,
//!     pub author_id: ObjectId,
//!     #[record(relation = "author_id")]
//!     pub author: Option<User>,
//! }
//!
//! let posts = posts_model
//!     .query()
//!     .populate("author", users.query())
//!     .all()
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docmodel;

pub mod prelude;

pub use docmodel_core::{
    backend, diff, document, error, filter, metadata, model, populate, query, record, shape,
};
pub use docmodel_macros::Record;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
