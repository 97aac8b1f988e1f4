//! Batched relation population.
//!
//! A [`Populate`] maps dotted relation paths to sub-queries. Populating a batch of records
//! resolves each path as an independent unit, all units running concurrently:
//!
//! 1. **walk**: every record is walked along the path and each non-empty foreign id is
//!    recorded together with the destination it must be written to;
//! 2. **short-circuit**: when every destination already holds a related record, nothing is
//!    fetched and only nested requests are applied to the existing values;
//! 3. **fetch**: the distinct ids are fetched in one `$in` query against the related
//!    collection;
//! 4. **hydrate**: fetched records are matched back to their destinations by lookup value.
//!
//! Walks and fetches only read the records. The resulting writes are applied once every
//! unit has finished, so a failing path never prevents its siblings from being hydrated.
//! The first error in path order is returned.

use bson::{Bson, Document};
use futures::future::{BoxFuture, FutureExt, join_all};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{
    backend::QueryOptions,
    document::{self, Record, RecordExt},
    error::{ModelError, ModelResult},
    filter::{FilterExpression, Operator},
    metadata::{Container, ID_FIELD, StructMetadata},
    model::ModelCore,
};

/// A type-erased population sub-query: the related collection, its filter and options,
/// and further relations to populate on the fetched records.
#[derive(Debug, Clone)]
pub struct RelationQuery {
    core: Arc<ModelCore>,
    filter: FilterExpression,
    options: QueryOptions,
    populate: Populate,
}

impl RelationQuery {
    pub fn new(
        core: Arc<ModelCore>,
        filter: FilterExpression,
        options: QueryOptions,
        populate: Populate,
    ) -> Self {
        Self {
            core,
            filter,
            options,
            populate,
        }
    }

    pub fn collection(&self) -> &str {
        self.core.name()
    }
}

/// Ordered set of relation population requests.
#[derive(Debug, Clone, Default)]
pub struct Populate {
    requests: Vec<(String, RelationQuery)>,
}

impl Populate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Adds (or replaces) the request for `path`.
    pub fn path(&mut self, path: impl Into<String>, relation: impl Into<RelationQuery>) -> &mut Self {
        let path = path.into();
        let relation = relation.into();

        match self.requests.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, existing)) => *existing = relation,
            None => self.requests.push((path, relation)),
        }

        self
    }

    /// Populates a single record.
    pub async fn one<T: Record>(&self, record: &mut T) -> ModelResult<()> {
        self.all(std::slice::from_mut(record)).await
    }

    /// Populates every requested path across `records`.
    ///
    /// Paths that succeed are hydrated even when another path fails; the first error in
    /// path order is returned.
    pub async fn all<T: Record>(&self, records: &mut [T]) -> ModelResult<()> {
        if records.is_empty() || self.is_empty() {
            return Ok(());
        }

        let metadata = T::metadata()?;
        let mut documents = records
            .iter()
            .map(RecordExt::to_natural)
            .collect::<ModelResult<Vec<_>>>()?;

        let outcome = self.populate_documents(&mut documents, &metadata).await;
        for (record, document) in records.iter_mut().zip(documents) {
            *record = T::from_natural(document)?;
        }

        outcome
    }

    /// Populates natural-layout documents described by `metadata` in place.
    pub fn populate_documents<'a>(
        &'a self,
        documents: &'a mut [Document],
        metadata: &'a StructMetadata,
    ) -> BoxFuture<'a, ModelResult<()>> {
        async move {
            if documents.is_empty() || self.requests.is_empty() {
                return Ok(());
            }

            let outcomes = {
                let roots: &[Document] = documents;
                join_all(
                    self.requests
                        .iter()
                        .map(|(path, relation)| resolve_path(roots, metadata, path, relation)),
                )
                .await
            };

            let mut first_error = None;
            for ((path, _), outcome) in self.requests.iter().zip(outcomes) {
                let applied = outcome.and_then(|writes| {
                    writes
                        .into_iter()
                        .try_for_each(|write| apply(documents, write))
                });
                if let Err(err) = applied {
                    tracing::debug!(path = %path, error = %err, "Relation population failed");
                    first_error.get_or_insert(err);
                }
            }

            first_error.map_or(Ok(()), Err)
        }
        .boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Step {
    Key(String),
    Index(usize),
}

/// Where a related record is written: the document reached from root `root` through
/// `steps`, under `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Destination {
    root: usize,
    steps: Vec<Step>,
    key: String,
}

#[derive(Debug, Clone)]
enum SlotKind {
    Single,
    MapKey(String),
    Append,
}

#[derive(Debug)]
struct Slot {
    id: Bson,
    destination: Destination,
    kind: SlotKind,
}

#[derive(Debug, Default)]
struct PathScan {
    find: Option<String>,
    /// Plain non-nullable destinations always hold a value and are never treated as resolved.
    nullable: bool,
    slots: Vec<Slot>,
}

#[derive(Debug)]
enum Action {
    Reset,
    Set(Bson),
    SetKey(String, Bson),
    Push(Bson),
}

#[derive(Debug)]
struct Write {
    destination: Destination,
    action: Action,
}

impl Write {
    fn for_slot(slot: &Slot, value: Bson) -> Self {
        let action = match &slot.kind {
            SlotKind::Single => Action::Set(value),
            SlotKind::MapKey(key) => Action::SetKey(key.clone(), value),
            SlotKind::Append => Action::Push(value),
        };

        Write {
            destination: slot.destination.clone(),
            action,
        }
    }
}

fn not_found(path: &str) -> ModelError {
    ModelError::Path(format!("populate: path ({path}) not found"))
}

/// Canonical form of an id, so integers of different widths meet.
fn canonical_id(id: &Bson) -> String {
    match id {
        Bson::Int32(number) => format!("int:{number}"),
        Bson::Int64(number) => format!("int:{number}"),
        Bson::String(text) => format!("str:{text}"),
        Bson::ObjectId(oid) => format!("oid:{oid}"),
        other => format!("{other:?}"),
    }
}

fn is_empty_id(id: &Bson) -> bool {
    match id {
        Bson::ObjectId(oid) => oid.bytes() == [0; 12],
        other => document::is_empty_value(other),
    }
}

fn scan(
    document: &Document,
    metadata: &StructMetadata,
    segments: &[&str],
    path: &str,
    root: usize,
    steps: &mut Vec<Step>,
    found: &mut PathScan,
) -> ModelResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    let field = metadata.field(head).ok_or_else(|| not_found(path))?;

    if rest.is_empty() {
        let relation = field.relation.as_ref().ok_or_else(|| {
            ModelError::Path(format!("populate: path ({path}) relation tag missing"))
        })?;
        let id_field = metadata
            .field_by_index(relation.index)
            .ok_or_else(|| {
                ModelError::Path(format!(
                    "populate: path ({path}) id field {} not mapped",
                    relation.name
                ))
            })?;

        found.find.get_or_insert_with(|| relation.find.clone());
        found.nullable = field.nullable || field.container != Container::Plain;

        let Some(ids) = document.get(id_field.natural_key()) else {
            return Ok(());
        };
        let destination = Destination {
            root,
            steps: steps.clone(),
            key: field.natural_key().to_string(),
        };
        let mut record = |id: &Bson, key: Option<&str>| {
            let kind = match field.container {
                Container::Plain => SlotKind::Single,
                Container::Sequence => SlotKind::Append,
                Container::Mapping => {
                    SlotKind::MapKey(key.map_or_else(|| canonical_id(id), str::to_string))
                }
            };
            found.slots.push(Slot {
                id: id.clone(),
                destination: destination.clone(),
                kind,
            });
        };

        match ids {
            Bson::Array(items) => items
                .iter()
                .filter(|id| !is_empty_id(id))
                .for_each(|id| record(id, None)),
            Bson::Document(entries) => entries
                .iter()
                .filter(|(_, id)| !is_empty_id(id))
                .for_each(|(key, id)| record(id, Some(key))),
            id if !is_empty_id(id) => record(id, None),
            _ => {}
        }

        return Ok(());
    }

    let children = field.children.as_deref().ok_or_else(|| not_found(path))?;
    let Some(value) = document.get(field.natural_key()) else {
        return Ok(());
    };

    steps.push(Step::Key(field.natural_key().to_string()));
    let scanned = match (field.container, value) {
        (Container::Sequence, Bson::Array(items)) => {
            items.iter().enumerate().try_for_each(|(index, item)| match item {
                Bson::Document(inner) => {
                    steps.push(Step::Index(index));
                    let scanned = scan(inner, children, rest, path, root, steps, found);
                    steps.pop();
                    scanned
                }
                _ => Ok(()),
            })
        }
        (Container::Mapping, Bson::Document(entries)) => {
            entries.iter().try_for_each(|(key, item)| match item {
                Bson::Document(inner) => {
                    steps.push(Step::Key(key.clone()));
                    let scanned = scan(inner, children, rest, path, root, steps, found);
                    steps.pop();
                    scanned
                }
                _ => Ok(()),
            })
        }
        (Container::Plain, Bson::Document(inner)) => {
            scan(inner, children, rest, path, root, steps, found)
        }
        _ => Ok(()),
    };
    steps.pop();

    scanned
}

fn locate<'a>(documents: &'a [Document], destination: &Destination) -> Option<&'a Document> {
    let root = documents.get(destination.root)?;
    let mut current: Option<&Bson> = None;

    for step in &destination.steps {
        current = Some(match (step, current) {
            (Step::Key(key), None) => root.get(key)?,
            (Step::Key(key), Some(Bson::Document(inner))) => inner.get(key)?,
            (Step::Index(index), Some(Bson::Array(items))) => items.get(*index)?,
            _ => return None,
        });
    }

    match current {
        None => Some(root),
        Some(Bson::Document(inner)) => Some(inner),
        Some(_) => None,
    }
}

fn current_value<'a>(documents: &'a [Document], slot: &Slot) -> Option<&'a Bson> {
    let value = locate(documents, &slot.destination)?.get(&slot.destination.key)?;

    match &slot.kind {
        SlotKind::MapKey(key) => value.as_document()?.get(key),
        _ => Some(value),
    }
}

fn is_resolved(documents: &[Document], slot: &Slot) -> bool {
    match (&slot.kind, current_value(documents, slot)) {
        (SlotKind::Append, Some(Bson::Array(items))) => {
            !items.is_empty() && items.iter().all(|item| matches!(item, Bson::Document(_)))
        }
        (SlotKind::Append, _) => false,
        (_, Some(Bson::Document(_))) => true,
        _ => false,
    }
}

async fn resolve_path(
    documents: &[Document],
    metadata: &StructMetadata,
    path: &str,
    relation: &RelationQuery,
) -> ModelResult<Vec<Write>> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = PathScan::default();
    for (root, document) in documents.iter().enumerate() {
        scan(document, metadata, &segments, path, root, &mut Vec::new(), &mut found)?;
    }

    if found.slots.is_empty() {
        tracing::trace!(path, "No relation ids to populate");
        return Ok(Vec::new());
    }
    if found.nullable && found.slots.iter().all(|slot| is_resolved(documents, slot)) {
        return reuse_resolved(documents, path, relation, &found.slots).await;
    }

    let target = relation.core.metadata();
    let find = found.find.as_deref().unwrap_or(ID_FIELD);
    let storage_find = target.storage_path(find)?;
    let natural_find = target.natural_path(find)?;

    let mut pending: BTreeMap<String, (Bson, Vec<usize>)> = BTreeMap::new();
    for (index, slot) in found.slots.iter().enumerate() {
        pending
            .entry(canonical_id(&slot.id))
            .or_insert_with(|| (slot.id.clone(), Vec::new()))
            .1
            .push(index);
    }

    let mut filter = relation.filter.clone();
    filter.name(
        storage_find,
        Operator::In,
        Bson::Array(pending.values().map(|(id, _)| id.clone()).collect()),
    );
    let compiled = filter.compile(Some(target), relation.options.trash);

    tracing::debug!(
        path,
        collection = relation.core.name(),
        ids = pending.len(),
        slots = found.slots.len(),
        "Fetching relation batch"
    );
    let mut fetched = relation.core.find_natural(compiled, &relation.options).await?;
    relation.populate.populate_documents(&mut fetched, target).await?;

    let mut writes = Vec::with_capacity(found.slots.len());
    let mut reset = HashSet::new();
    for slot in found.slots.iter().filter(|slot| matches!(slot.kind, SlotKind::Append)) {
        if reset.insert(&slot.destination) {
            writes.push(Write {
                destination: slot.destination.clone(),
                action: Action::Reset,
            });
        }
    }

    for record in &fetched {
        let lookup = document::lookup(record, &natural_find);
        let values: Vec<&Bson> = match lookup {
            Some(Bson::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        };

        let mut matched = false;
        for value in values {
            if let Some((_, slots)) = pending.get(&canonical_id(value)) {
                matched = true;
                for &index in slots {
                    let hydrated = Bson::Document(record.clone());
                    writes.push(Write::for_slot(&found.slots[index], hydrated));
                }
            }
        }
        if !matched {
            return Err(ModelError::Consistency(format!(
                "populate: id not exists {}",
                lookup.map_or_else(|| "null".to_string(), |value| value.to_string())
            )));
        }
    }

    tracing::debug!(path, fetched = fetched.len(), writes = writes.len(), "Hydrated relation");

    Ok(writes)
}

/// Applies nested requests to destinations that already hold related records.
async fn reuse_resolved(
    documents: &[Document],
    path: &str,
    relation: &RelationQuery,
    slots: &[Slot],
) -> ModelResult<Vec<Write>> {
    if relation.populate.is_empty() {
        tracing::trace!(path, "Relation already populated");
        return Ok(Vec::new());
    }

    let mut batch = Vec::new();
    let mut targets: Vec<(&Slot, usize)> = Vec::new();
    let mut seen = HashSet::new();
    for slot in slots {
        let key = match &slot.kind {
            SlotKind::MapKey(key) => Some(key.as_str()),
            _ => None,
        };
        if !seen.insert((&slot.destination, key)) {
            continue;
        }

        let start = batch.len();
        match current_value(documents, slot) {
            Some(Bson::Document(existing)) => batch.push(existing.clone()),
            Some(Bson::Array(items)) => {
                batch.extend(items.iter().filter_map(|item| item.as_document().cloned()))
            }
            _ => {}
        }
        targets.push((slot, batch.len() - start));
    }

    tracing::debug!(path, records = batch.len(), "Populating already resolved relation");
    relation
        .populate
        .populate_documents(&mut batch, relation.core.metadata())
        .await?;

    let mut values = batch.into_iter().map(Bson::Document);
    let mut writes = Vec::new();
    for (slot, count) in targets {
        if matches!(slot.kind, SlotKind::Append) {
            writes.push(Write {
                destination: slot.destination.clone(),
                action: Action::Reset,
            });
        }
        for value in values.by_ref().take(count) {
            writes.push(Write::for_slot(slot, value));
        }
    }

    Ok(writes)
}

fn locate_mut<'a>(document: &'a mut Document, steps: &[Step]) -> ModelResult<&'a mut Document> {
    let not_container = || ModelError::Path("populate: not struct or map".to_string());
    let key_not_found = |key: &str| ModelError::Path(format!("populate: key not found {key}"));

    let Some((first, rest)) = steps.split_first() else {
        return Ok(document);
    };
    let Step::Key(key) = first else {
        return Err(not_container());
    };

    let mut value = document.get_mut(key).ok_or_else(|| key_not_found(key))?;
    for step in rest {
        value = match step {
            Step::Key(key) => match value {
                Bson::Document(inner) => inner.get_mut(key).ok_or_else(|| key_not_found(key))?,
                _ => return Err(not_container()),
            },
            Step::Index(index) => match value {
                Bson::Array(items) => items
                    .get_mut(*index)
                    .ok_or_else(|| key_not_found(&index.to_string()))?,
                _ => return Err(not_container()),
            },
        };
    }

    match value {
        Bson::Document(inner) => Ok(inner),
        _ => Err(not_container()),
    }
}

fn apply(documents: &mut [Document], write: Write) -> ModelResult<()> {
    let Write { destination, action } = write;
    let root = documents
        .get_mut(destination.root)
        .ok_or_else(|| ModelError::Path(format!("populate: key not found {}", destination.root)))?;
    let owner = locate_mut(root, &destination.steps)?;
    let key = destination.key;

    match action {
        Action::Reset => {
            owner.insert(key, Bson::Array(Vec::new()));
        }
        Action::Set(value) => {
            owner.insert(key, value);
        }
        Action::SetKey(entry, value) => match owner.get_mut(&key) {
            Some(Bson::Document(entries)) => {
                entries.insert(entry, value);
            }
            Some(Bson::Null) | None => {
                let mut entries = Document::new();
                entries.insert(entry, value);
                owner.insert(key, entries);
            }
            Some(_) => return Err(ModelError::Path("populate: not struct or map".to_string())),
        },
        Action::Push(value) => match owner.get_mut(&key) {
            Some(Bson::Array(items)) => items.push(value),
            Some(Bson::Null) | None => {
                owner.insert(key, Bson::Array(vec![value]));
            }
            Some(_) => return Err(ModelError::Path("populate: not struct or map".to_string())),
        },
    }

    Ok(())
}
