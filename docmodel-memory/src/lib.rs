//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It evaluates native filter and update documents itself, which makes it a drop-in stand-in
//! for a MongoDB collection during development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Native documents** - Filters, updates, sorts and projections in MongoDB syntax
//! - **Seeding** - Preload collections through the builder
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! let store = InMemoryStore::builder().build().await?;
//! let users = Model::<User>::builder("users").build(store)?;
//!
//! let mut ada = users.handle(User::new("ada"));
//! ada.insert().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
