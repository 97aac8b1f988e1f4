//! Core traits for records and their conversion between layouts.
//!
//! A record has two document layouts:
//!
//! - the **natural** layout, produced by the record's serde implementation, and
//! - the **storage** layout, derived from it through the record's
//!   [`StructMetadata`](crate::metadata::StructMetadata) (storage names, omit-empty rules,
//!   fields excluded from storage).
//!
//! Change detection, population and filter compilation all operate on the natural layout;
//! only the backend ever sees the storage layout.

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};
use std::sync::Arc;

use crate::{
    error::{ModelError, ModelResult},
    metadata::{Container, MetadataCache, StructMetadata},
    shape::Shaped,
};

/// Trait implemented by every type that can be stored as a record.
///
/// Usually derived with `#[derive(Record)]`, which also implements [`Shaped`]. The record
/// must serialize to a BSON document and must declare an `id` field to be inserted.
///
/// # Example
///
/// ```ignore
/// use docmodel::Record;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Record)]
/// pub struct User {
///     #[record(storage = "_id")]
///     pub id: ObjectId,
///     pub name: String,
///     #[record(storage = "age,omitempty")]
///     pub age: i64,
/// }
/// ```
pub trait Record: Shaped + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Returns the cached metadata of this record type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be parsed or the metadata cache is full.
    fn metadata() -> ModelResult<Arc<StructMetadata>> {
        MetadataCache::global().parse::<Self>()
    }
}

/// Extension trait converting records between their natural, storage and JSON forms.
///
/// Automatically implemented for all types that implement [`Record`].
pub trait RecordExt: Record {
    /// Serializes the record into its natural document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the record does not serialize to a document.
    fn to_natural(&self) -> ModelResult<Document>;

    /// Deserializes a record from its natural document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    fn from_natural(document: Document) -> ModelResult<Self>;

    /// Serializes the record into its storage document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_storage(&self, omit_empty: bool) -> ModelResult<Document>;

    /// Deserializes a record from a storage document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    fn from_storage(document: &Document) -> ModelResult<Self>;

    /// Renders the record as JSON without the fields hidden from the natural layout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_json(&self) -> ModelResult<Value>;

    fn from_json(value: Value) -> ModelResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_natural(&self) -> ModelResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(ModelError::Type(format!(
                "record serialized to {:?}, document expected",
                other.element_type()
            ))),
        }
    }

    fn from_natural(document: Document) -> ModelResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_storage(&self, omit_empty: bool) -> ModelResult<Document> {
        Ok(Self::metadata()?.to_storage(&self.to_natural()?, omit_empty))
    }

    fn from_storage(document: &Document) -> ModelResult<Self> {
        Self::from_natural(Self::metadata()?.to_natural(document))
    }

    fn to_json(&self) -> ModelResult<Value> {
        let mut value = to_value(self)?;
        strip_hidden(&*Self::metadata()?, &mut value);

        Ok(value)
    }

    fn from_json(value: Value) -> ModelResult<Self> {
        Ok(from_value(value)?)
    }
}

fn strip_hidden(metadata: &StructMetadata, value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    for field in metadata.fields() {
        if field.is_hidden() {
            map.remove(&field.name);
            continue;
        }
        let (Some(children), Some(nested)) = (&field.children, map.get_mut(&field.natural)) else {
            continue;
        };

        match (field.container, nested) {
            (Container::Sequence, Value::Array(items)) => {
                items.iter_mut().for_each(|item| strip_hidden(children, item));
            }
            (Container::Mapping, Value::Object(entries)) => {
                entries.values_mut().for_each(|item| strip_hidden(children, item));
            }
            (_, nested) => strip_hidden(children, nested),
        }
    }
}

/// Returns `true` for the values dropped by omit-empty fields: null, `""`, numeric zero,
/// `false` and empty arrays or documents.
pub fn is_empty_value(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(text) => text.is_empty(),
        Bson::Int32(number) => *number == 0,
        Bson::Int64(number) => *number == 0,
        Bson::Double(number) => *number == 0.0,
        Bson::Boolean(flag) => !flag,
        Bson::Array(items) => items.is_empty(),
        Bson::Document(document) => document.is_empty(),
        _ => false,
    }
}

/// Reads a dotted path of keys from a document. Array hops are not followed.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }

    Some(current)
}
