//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Record` trait and derive macro
//! - Models, queries and record handles
//! - Filters, trash modes and population requests
//! - Store backends and builders
//! - Error types

pub use docmodel_core::{
    backend::{QueryOptions, StoreBackend, StoreBackendBuilder},
    document::{Record, RecordExt},
    error::{ModelError, ModelResult},
    filter::{FilterExpression, Operand, Operator, TrashMode},
    metadata::{MetadataCache, StructMetadata},
    model::{HookEvent, Model, ModelBuilder, RecordValidator},
    populate::{Populate, RelationQuery},
    query::Query,
    record::RecordHandle,
    shape::Shaped,
};
pub use docmodel_macros::Record;
