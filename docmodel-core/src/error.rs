//! Error types and result types for model operations.
//!
//! Every fallible operation in this crate returns [`ModelResult<T>`]. The variants of
//! [`ModelError`] follow the layers they originate from: type introspection, record
//! validation and lifecycle state, relation paths, population consistency and the
//! storage backend.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while mapping records to and from a document store.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The target is not a record type (or not a sequence of records where one is required).
    #[error("Type error: {0}")]
    Type(String),
    /// The record failed validation: a missing or invalid identifier, or a hook rejected it.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The operation is not valid for the record's lifecycle state.
    #[error("State error: {0}")]
    State(String),
    /// A relation path could not be resolved against the record metadata or document shape.
    #[error("Path error: {0}")]
    Path(String),
    /// A fetched related record could not be matched against any pending reference.
    #[error("Consistency error: {0}")]
    Consistency(String),
    /// The storage backend reported that no record matched.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The metadata registry overflowed. This is a programming defect, not a runtime condition.
    #[error("Fatal error: {0}")]
    Fatal(String),
    /// Serialization/deserialization error when converting between record formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given id already exists in the collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ModelError {
    /// Returns `true` when the error is the normalized "no matching record" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound(_))
    }
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
