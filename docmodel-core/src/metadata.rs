//! Record metadata: the parsed, cached field catalog of a record type.
//!
//! [`MetadataCache::parse`] turns the static [`TypeShape`] of a record into a
//! [`StructMetadata`]: one [`FieldDescriptor`] per mapped field with its natural (serde) and
//! storage names, omit-empty flags, relation annotation and, for nested records, the
//! metadata of the nested type. Parsed catalogs are immutable and shared as `Arc`s, keyed by
//! `TypeId` in a bounded cache.
//!
//! # Annotations
//!
//! - natural / storage: `"name"`, `"name,omitempty"`, `",omitempty"` (keeps the Rust name)
//!   or `"-"` (not mapped in that layout).
//! - relation: `"id_field"`, `"id_field,lookup_field"` or `",lookup_field"`. The id field
//!   defaults to `id` when only a lookup field is given, and the lookup field defaults to
//!   `id` when only an id field is given.
//!
//! A field with no natural name, no storage name and no relation is not mapped at all.

use bson::{Bson, Document};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use crate::{
    document::is_empty_value,
    error::{ModelError, ModelResult},
    shape::{RecordShape, ScalarKind, Shaped, TypeShape},
};

/// Hard ceiling on distinct record types held by a cache. Reaching it means types are being
/// generated dynamically.
pub const MAX_CACHED_TYPES: usize = 10_000;

/// Name of the identifier field, and the default side of relation annotations.
pub const ID_FIELD: &str = "id";

static GLOBAL_CACHE: LazyLock<MetadataCache> = LazyLock::new(MetadataCache::default);

/// Container layer between a field and its element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    Plain,
    Sequence,
    Mapping,
}

/// Kind of a field's element type once container and reference layers are stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Scalar(ScalarKind),
    Timestamp,
    Record(String),
}

/// Relation annotation of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Positional index of the local id field.
    pub index: usize,
    /// Rust name of the local id field.
    pub name: String,
    /// Lookup field on the related record, dotted for multi-hop lookups.
    pub find: String,
}

/// One mapped field of a record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Positional index within the declared fields.
    pub index: usize,
    /// Rust field name.
    pub name: String,
    /// Natural (serde) name; empty when the field is not serialized naturally.
    pub natural: String,
    pub natural_omit_empty: bool,
    /// Storage name; empty when the field is not persisted.
    pub storage: String,
    pub storage_omit_empty: bool,
    pub relation: Option<RelationDescriptor>,
    /// Metadata of the nested record type. Never set together with `relation`.
    pub children: Option<Arc<StructMetadata>>,
    pub container: Container,
    pub nullable: bool,
    pub kind: ElementKind,
}

impl FieldDescriptor {
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn is_persisted(&self) -> bool {
        !self.storage.is_empty()
    }

    /// Whether the field is left out of the natural layout.
    pub fn is_hidden(&self) -> bool {
        self.natural.is_empty()
    }

    /// Key holding the field in the serialized record: the natural name, or the Rust name for
    /// hidden fields that serde still writes.
    pub fn natural_key(&self) -> &str {
        if self.is_hidden() { &self.name } else { &self.natural }
    }

    /// Applies `convert` to every nested record document held by `value`.
    fn map_nested(
        &self,
        value: &Bson,
        convert: &dyn Fn(&StructMetadata, &Document) -> Document,
    ) -> Bson {
        let Some(children) = &self.children else {
            return value.clone();
        };
        let element = |item: &Bson| match item {
            Bson::Document(doc) => Bson::Document(convert(children, doc)),
            other => other.clone(),
        };

        match (self.container, value) {
            (Container::Sequence, Bson::Array(items)) => {
                Bson::Array(items.iter().map(element).collect())
            }
            (Container::Mapping, Bson::Document(entries)) => Bson::Document(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), element(item)))
                    .collect(),
            ),
            (_, other) => element(other),
        }
    }
}

/// The field catalog of one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructMetadata {
    type_name: String,
    fields: Vec<FieldDescriptor>,
}

impl StructMetadata {
    /// Returns the metadata of `T` from the process-wide cache.
    pub fn of<T: Shaped>() -> ModelResult<Arc<StructMetadata>> {
        MetadataCache::global().parse::<T>()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Mapped fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by its Rust name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_index(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.index == index)
    }

    pub fn id_field(&self) -> Option<&FieldDescriptor> {
        self.field(ID_FIELD)
    }

    /// Storage name of the id field, `_id` when the record does not map one.
    pub fn id_storage_name(&self) -> &str {
        self.id_field()
            .filter(|field| field.is_persisted())
            .map(|field| field.storage.as_str())
            .unwrap_or("_id")
    }

    /// Rewrites a dotted path of Rust field names into storage names, hop by hop.
    pub fn storage_path(&self, path: &str) -> ModelResult<String> {
        self.remap_path(path, |field| {
            if field.storage.is_empty() { field.natural_key() } else { field.storage.as_str() }
        })
    }

    /// Rewrites a dotted path of Rust field names into natural names, hop by hop.
    pub fn natural_path(&self, path: &str) -> ModelResult<String> {
        self.remap_path(path, FieldDescriptor::natural_key)
    }

    fn remap_path(
        &self,
        path: &str,
        pick: impl Fn(&FieldDescriptor) -> &str,
    ) -> ModelResult<String> {
        let mut metadata = Some(self);
        let mut mapped = Vec::new();

        for segment in path.split('.') {
            let field = metadata
                .and_then(|metadata| metadata.field(segment))
                .ok_or_else(|| ModelError::Path(format!("path ({path}) not found")))?;

            mapped.push(pick(field).to_string());
            metadata = field.children.as_deref();
        }

        Ok(mapped.join("."))
    }

    /// Converts a natural document into the storage layout.
    ///
    /// Keys are renamed to storage names recursively, fields without a storage name are
    /// dropped, and with `omit_empty` storage omit-empty fields holding an empty value are
    /// left out. Hidden fields are read from their Rust name.
    pub fn to_storage(&self, natural: &Document, omit_empty: bool) -> Document {
        let mut storage = Document::new();

        for field in &self.fields {
            if !field.is_persisted() {
                continue;
            }
            let Some(value) = natural.get(field.natural_key()) else {
                continue;
            };
            if omit_empty && field.storage_omit_empty && is_empty_value(value) {
                continue;
            }

            storage.insert(
                field.storage.clone(),
                field.map_nested(value, &|metadata, doc| metadata.to_storage(doc, omit_empty)),
            );
        }

        storage
    }

    /// Converts a storage document back into the natural layout.
    pub fn to_natural(&self, storage: &Document) -> Document {
        let mut natural = Document::new();

        for field in &self.fields {
            if !field.is_persisted() {
                continue;
            }
            let Some(value) = storage.get(&field.storage) else {
                continue;
            };

            natural.insert(
                field.natural_key(),
                field.map_nested(value, &|metadata, doc| metadata.to_natural(doc)),
            );
        }

        natural
    }
}

/// Bounded, thread-safe cache of parsed record metadata keyed by type identity.
///
/// Reads take a shared lock; the write lock is only taken to insert a freshly parsed entry.
#[derive(Debug)]
pub struct MetadataCache {
    ceiling: usize,
    entries: RwLock<HashMap<TypeId, Arc<StructMetadata>>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(MAX_CACHED_TYPES)
    }
}

impl MetadataCache {
    /// Creates an empty cache holding at most `ceiling` record types.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide cache used by models and the population engine.
    pub fn global() -> &'static MetadataCache {
        &GLOBAL_CACHE
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains<T: Shaped>(&self) -> bool {
        match T::type_shape().deref_once() {
            TypeShape::Record(record) => self.entries.read().contains_key(&record.type_id),
            _ => false,
        }
    }

    /// Registers `T` (and every nested record type) at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Fatal`] when the registration would exceed the ceiling.
    pub fn register<T: Shaped>(&self) -> ModelResult<Arc<StructMetadata>> {
        let metadata = self.parse::<T>()?;
        tracing::debug!(
            record = metadata.type_name(),
            cached = self.len(),
            "Registered record metadata"
        );

        Ok(metadata)
    }

    /// Returns the metadata of `T`, parsing and caching it on first use.
    pub fn parse<T: Shaped>(&self) -> ModelResult<Arc<StructMetadata>> {
        self.parse_shape(&T::type_shape())
    }

    /// Returns the metadata of the record described by `shape`, following one reference layer.
    ///
    /// # Errors
    ///
    /// - [`ModelError::Type`] if the shape is not a record or the record is self-referential.
    /// - [`ModelError::Fatal`] if caching the record would exceed the ceiling.
    pub fn parse_shape(&self, shape: &TypeShape) -> ModelResult<Arc<StructMetadata>> {
        match shape.deref_once() {
            TypeShape::Record(record) => self.parse_record(record, &mut Vec::new()),
            other => Err(ModelError::Type(format!("record type expected, found {other:?}"))),
        }
    }

    fn parse_record(
        &self,
        record: &RecordShape,
        stack: &mut Vec<TypeId>,
    ) -> ModelResult<Arc<StructMetadata>> {
        if let Some(cached) = self.entries.read().get(&record.type_id) {
            return Ok(Arc::clone(cached));
        }
        if stack.contains(&record.type_id) {
            return Err(ModelError::Type(format!(
                "record type {} is self-referential",
                record.type_name
            )));
        }

        stack.push(record.type_id);
        let parsed = self.build(record, stack);
        stack.pop();

        self.insert(record, parsed?)
    }

    fn build(&self, record: &RecordShape, stack: &mut Vec<TypeId>) -> ModelResult<StructMetadata> {
        tracing::trace!(record = record.type_name, "Parsing record metadata");

        let declared = (record.fields)();
        let mut fields = Vec::with_capacity(declared.len());

        for (index, field) in declared.iter().enumerate() {
            if field.base {
                continue;
            }

            let (natural, natural_omit_empty) = parse_name_tag(field.natural, field.name);
            let (storage, storage_omit_empty) = parse_name_tag(field.storage, field.name);
            let (relation_name, relation_find) = parse_relation_tag(field.relation);

            if natural.is_empty() && storage.is_empty() && relation_name.is_empty() {
                continue;
            }

            let (container, nullable, element) = strip_layers(&field.shape);
            let mut relation = None;
            let mut children = None;

            if !relation_name.is_empty() {
                match declared.iter().position(|other| other.name == relation_name) {
                    Some(id_index) => {
                        relation = Some(RelationDescriptor {
                            index: id_index,
                            name: relation_name,
                            find: relation_find,
                        });
                    }
                    None => tracing::warn!(
                        record = record.type_name,
                        field = field.name,
                        id_field = %relation_name,
                        "Relation id field not declared, field will not populate"
                    ),
                }
            } else if !storage.is_empty() {
                if let TypeShape::Record(nested) = element {
                    children = Some(self.parse_record(nested, stack)?);
                }
            }

            fields.push(FieldDescriptor {
                index,
                name: field.name.to_string(),
                natural,
                natural_omit_empty,
                storage,
                storage_omit_empty,
                relation,
                children,
                container,
                nullable,
                kind: element_kind(element),
            });
        }

        Ok(StructMetadata {
            type_name: record.type_name.to_string(),
            fields,
        })
    }

    fn insert(
        &self,
        record: &RecordShape,
        metadata: StructMetadata,
    ) -> ModelResult<Arc<StructMetadata>> {
        let mut entries = self.entries.write();

        // A concurrent parse may have won the race; keep its entry.
        if let Some(existing) = entries.get(&record.type_id) {
            return Ok(Arc::clone(existing));
        }
        if entries.len() >= self.ceiling {
            tracing::error!(
                record = record.type_name,
                ceiling = self.ceiling,
                "Metadata cache ceiling exceeded"
            );
            return Err(ModelError::Fatal(format!(
                "metadata cache ceiling of {} record types exceeded while parsing {}",
                self.ceiling, record.type_name
            )));
        }

        let metadata = Arc::new(metadata);
        entries.insert(record.type_id, Arc::clone(&metadata));

        Ok(metadata)
    }
}

/// Parses a natural or storage annotation into `(name, omit_empty)`.
fn parse_name_tag(tag: Option<&str>, field_name: &str) -> (String, bool) {
    let Some(tag) = tag else {
        return (field_name.to_string(), false);
    };
    let mut parts = tag.splitn(2, ',');
    let name = parts.next().unwrap_or_default().trim();
    let omit_empty = parts
        .next()
        .is_some_and(|options| options.split(',').any(|option| option.trim() == "omitempty"));

    let name = match name {
        "" => field_name.to_string(),
        "-" => String::new(),
        name => name.to_string(),
    };

    (name, omit_empty)
}

/// Parses a relation annotation into `(id_field, lookup_field)`.
fn parse_relation_tag(tag: Option<&str>) -> (String, String) {
    let Some(tag) = tag else {
        return (String::new(), String::new());
    };
    let mut parts = tag.splitn(2, ',');
    let mut name = parts.next().unwrap_or_default().trim().to_string();
    let mut find = parts.next().unwrap_or_default().trim().to_string();

    if name == "-" {
        name.clear();
    }
    if name.is_empty() && !find.is_empty() {
        name = ID_FIELD.to_string();
    }
    if !name.is_empty() && find.is_empty() {
        find = ID_FIELD.to_string();
    }

    (name, find)
}

/// Strips an optional reference, one sequence or mapping layer and one more reference.
fn strip_layers(shape: &TypeShape) -> (Container, bool, &TypeShape) {
    let mut nullable = false;
    let mut shape = shape;

    if let TypeShape::Reference(inner) = shape {
        nullable = true;
        shape = inner;
    }

    let container = match shape {
        TypeShape::Sequence(inner) => {
            shape = inner;
            Container::Sequence
        }
        TypeShape::Mapping(inner) => {
            shape = inner;
            Container::Mapping
        }
        _ => Container::Plain,
    };

    if let TypeShape::Reference(inner) = shape {
        nullable |= container == Container::Plain;
        shape = inner;
    }

    (container, nullable, shape)
}

fn element_kind(shape: &TypeShape) -> ElementKind {
    match shape {
        TypeShape::Scalar(kind) => ElementKind::Scalar(*kind),
        TypeShape::Timestamp => ElementKind::Timestamp,
        TypeShape::Record(record) => ElementKind::Record(record.type_name.to_string()),
        _ => ElementKind::Scalar(ScalarKind::Any),
    }
}
