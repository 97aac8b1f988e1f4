//! Structural comparison between a live record and its snapshot.
//!
//! Both sides are compared in their natural layout, guided by the record metadata. Paths are
//! dotted Rust field names; numeric segments index sequences and other segments select
//! mapping keys or nested record fields.

use bson::{Bson, Document};

use crate::metadata::{Container, FieldDescriptor, StructMetadata};

/// Maximum depth [`modified`] descends into nested values.
pub const MODIFIED_DEPTH: usize = 5;

/// Returns `true` when the value at `path` differs between `current` and `snapshot`.
///
/// Absent and null values are equal to each other. A non-numeric segment applied to a
/// sequence compares that member on every element. Unknown fields compare equal.
pub fn is_modified(
    metadata: &StructMetadata,
    current: &Document,
    snapshot: &Document,
    path: &str,
) -> bool {
    let segments: Vec<&str> = path.split('.').filter(|segment| !segment.is_empty()).collect();
    if segments.is_empty() {
        return current != snapshot;
    }

    !struct_equal(metadata, current, snapshot, &segments)
}

/// Lists every field path whose value differs, in declaration order.
///
/// With `include_nested`, differing values are descended into (nested records, sequences of
/// equal length, mappings) up to [`MODIFIED_DEPTH`] levels and the innermost differing paths
/// are reported instead.
pub fn modified(
    metadata: &StructMetadata,
    current: &Document,
    snapshot: &Document,
    include_nested: bool,
) -> Vec<String> {
    let depth = if include_nested { MODIFIED_DEPTH } else { 0 };
    let mut paths = Vec::new();
    collect_struct(metadata, current, snapshot, "", depth, &mut paths);

    paths
}

fn present(value: Option<&Bson>) -> Option<&Bson> {
    value.filter(|value| !matches!(value, Bson::Null | Bson::Undefined))
}

fn struct_equal(metadata: &StructMetadata, a: &Document, b: &Document, path: &[&str]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return a == b;
    };
    let Some(field) = metadata.field(head) else {
        return true;
    };

    field_equal(field, a.get(field.natural_key()), b.get(field.natural_key()), rest)
}

fn field_equal(field: &FieldDescriptor, a: Option<&Bson>, b: Option<&Bson>, rest: &[&str]) -> bool {
    match (present(a), present(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => value_equal(field, a, b, rest),
        _ => false,
    }
}

fn value_equal(field: &FieldDescriptor, a: &Bson, b: &Bson, rest: &[&str]) -> bool {
    let Some((head, tail)) = rest.split_first() else {
        return a == b;
    };

    match (field.container, a, b) {
        (Container::Sequence, Bson::Array(left), Bson::Array(right)) => {
            if left.len() != right.len() {
                return false;
            }
            match head.parse::<usize>() {
                Ok(index) => element_equal(field, left.get(index), right.get(index), tail),
                Err(_) => left
                    .iter()
                    .zip(right)
                    .all(|(l, r)| element_equal(field, Some(l), Some(r), rest)),
            }
        }
        (Container::Mapping, Bson::Document(left), Bson::Document(right)) => {
            if left.len() != right.len() {
                return false;
            }
            element_equal(field, left.get(*head), right.get(*head), tail)
        }
        _ => element_equal(field, Some(a), Some(b), rest),
    }
}

fn element_equal(field: &FieldDescriptor, a: Option<&Bson>, b: Option<&Bson>, rest: &[&str]) -> bool {
    let (a, b) = match (present(a), present(b)) {
        (None, None) => return true,
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if rest.is_empty() {
        return a == b;
    }

    match (&field.children, a, b) {
        (Some(children), Bson::Document(left), Bson::Document(right)) => {
            struct_equal(children, left, right, rest)
        }
        _ => a == b,
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() { segment.to_string() } else { format!("{prefix}.{segment}") }
}

fn collect_struct(
    metadata: &StructMetadata,
    a: &Document,
    b: &Document,
    prefix: &str,
    depth: usize,
    paths: &mut Vec<String>,
) {
    for field in metadata.fields() {
        collect_field(
            field,
            present(a.get(field.natural_key())),
            present(b.get(field.natural_key())),
            join(prefix, &field.name),
            depth,
            paths,
        );
    }
}

fn collect_field(
    field: &FieldDescriptor,
    a: Option<&Bson>,
    b: Option<&Bson>,
    path: String,
    depth: usize,
    paths: &mut Vec<String>,
) {
    if a == b {
        return;
    }
    let (Some(a), Some(b)) = (a, b) else {
        paths.push(path);
        return;
    };
    if depth == 0 {
        paths.push(path);
        return;
    }

    match (field.container, a, b) {
        (Container::Sequence, Bson::Array(left), Bson::Array(right)) if left.len() == right.len() => {
            for (index, (l, r)) in left.iter().zip(right).enumerate() {
                collect_element(
                    field,
                    present(Some(l)),
                    present(Some(r)),
                    format!("{path}.{index}"),
                    depth - 1,
                    paths,
                );
            }
        }
        (Container::Mapping, Bson::Document(left), Bson::Document(right)) => {
            let removed = right.keys().filter(|key| !left.contains_key(key.as_str()));
            for key in left.keys().chain(removed) {
                collect_element(
                    field,
                    present(left.get(key)),
                    present(right.get(key)),
                    format!("{path}.{key}"),
                    depth - 1,
                    paths,
                );
            }
        }
        (Container::Plain, Bson::Document(_), Bson::Document(_)) if field.children.is_some() => {
            collect_element(field, Some(a), Some(b), path, depth, paths);
        }
        _ => paths.push(path),
    }
}

fn collect_element(
    field: &FieldDescriptor,
    a: Option<&Bson>,
    b: Option<&Bson>,
    path: String,
    depth: usize,
    paths: &mut Vec<String>,
) {
    if a == b {
        return;
    }

    match (&field.children, a, b) {
        (Some(children), Some(Bson::Document(left)), Some(Bson::Document(right))) if depth > 0 => {
            collect_struct(children, left, right, &path, depth - 1, paths);
        }
        _ => paths.push(path),
    }
}
