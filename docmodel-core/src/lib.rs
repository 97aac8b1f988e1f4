//! A document mapping layer between application records and schemaless document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Record shapes** ([`shape`]) - Static type descriptions used in place of reflection
//! - **Record metadata** ([`metadata`]) - The cached field catalog of each record type
//! - **Record traits** ([`document`]) - Conversion between the natural and storage layouts
//! - **Change detection** ([`diff`]) - Structural comparison against the persisted snapshot
//! - **Filters** ([`filter`]) - Operator expressions compiled into native filter documents
//! - **Store backend abstraction** ([`backend`]) - The storage collaborator trait
//! - **Models and queries** ([`model`], [`query`]) - Record types bound to collections
//! - **Record controller** ([`record`]) - Insert, partial update, soft delete and restore
//! - **Population** ([`populate`]) - Batched resolution of relation fields
//! - **Error handling** ([`error`]) - The error taxonomy and result alias
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
//! #[serde(default)]
//! pub struct Post {
//!     #[record(storage = "_id")]
//!     pub id: ObjectId,
//!     pub title: String,
//!     pub author_id: ObjectId,
//!     #[record(relation = "author_id")]
//!     pub author: Option<User>,
//! }
//!
//! let store = std::sync::Arc::new(InMemoryStore::builder().build().await?);
//! let posts = Model::<Post>::builder("posts").build_shared(store.clone())?;
//! let users = Model::<User>::builder("users").build_shared(store)?;
//!
//! let recent = posts
//!     .query()
//!     .sort(["-_id"])
//!     .limit(10)
//!     .populate("author", users.query())
//!     .all()
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod diff;
pub mod document;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod model;
pub mod populate;
pub mod query;
pub mod record;
pub mod shape;

#[cfg(test)]
mod fixtures;
