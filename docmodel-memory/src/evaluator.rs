//! Native filter and update evaluation for in-memory documents.
//!
//! Supports the subset of the MongoDB query language the mapping layer emits, plus the
//! common operators applications pass through raw filters:
//!
//! - logical: `$and`, `$or`, `$nor`, `$not`
//! - comparison: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`
//! - element and array: `$exists`, `$size`, `$all`
//! - pattern: `$regex` with `$options` (`i`, `m`, `s`, `x`) and regex literals
//! - `$expr` with `$and` / `$or` and comparison operators over `"$field"` references
//! - updates: `$set`, `$unset`, `$inc`, `$push`, `$pull`, and whole-document replacement
//!
//! Dotted paths descend into embedded documents and fan out over arrays. A field holding an
//! array matches a literal when any element does. Unsupported operators are reported as
//! backend errors.

use bson::{Bson, Document, datetime::DateTime, doc, oid::ObjectId};
use regex::{Regex, RegexBuilder};
use std::{cmp::Ordering, collections::HashMap};

use docmodel_core::error::{ModelError, ModelResult};

/// Type-erased, comparable representation of BSON values.
///
/// Integers and floats are normalized to `f64` so mixed numeric types compare.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values with no ordering (binary, uuid, regex, ...), compared by equality only.
    Opaque(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            other => Comparable::Opaque(other),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Orders two optional values for sorting: missing and null first, then by value.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

/// Collects every value reachable through a dotted path, fanning out over arrays.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Vec::new();
    };
    let mut current: Vec<&Bson> = document.get(first).into_iter().collect();

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => next.extend(items.get(index)),
                    Err(_) => next.extend(items.iter().filter_map(|item| match item {
                        Bson::Document(inner) => inner.get(segment),
                        _ => None,
                    })),
                },
                _ => {}
            }
        }
        current = next;
    }

    current
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Evaluates a native filter document against the wrapped document.
    pub fn matches(&self, filter: &Document) -> ModelResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all_of(condition)?,
                "$or" => self.any_of(condition)?,
                "$nor" => !self.any_of(condition)?,
                "$expr" => truthy(&self.expression(condition)?),
                other if other.starts_with('$') => {
                    return Err(ModelError::Backend(format!(
                        "unsupported top-level operator {other}"
                    )));
                }
                field => self.field_matches(field, condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn clauses(value: &Bson) -> ModelResult<impl Iterator<Item = &Document>> {
        let Bson::Array(items) = value else {
            return Err(ModelError::Backend("logical operators require an array".to_string()));
        };
        if items.iter().any(|item| !matches!(item, Bson::Document(_))) {
            return Err(ModelError::Backend(
                "logical operator clauses must be documents".to_string(),
            ));
        }

        Ok(items.iter().filter_map(Bson::as_document))
    }

    fn all_of(&self, value: &Bson) -> ModelResult<bool> {
        for clause in Self::clauses(value)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any_of(&self, value: &Bson) -> ModelResult<bool> {
        for clause in Self::clauses(value)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn field_matches(&self, field: &str, condition: &Bson) -> ModelResult<bool> {
        let values = resolve(self.document, field);

        match condition {
            Bson::Document(operators)
                if !operators.is_empty() && operators.keys().all(|key| key.starts_with('$')) =>
            {
                apply_operators(&values, operators)
            }
            Bson::RegularExpression(regex) => Ok(regex_matches(
                &values,
                &compile_regex(regex.pattern.as_str(), regex.options.as_str())?,
            )),
            literal => Ok(equals_any(&values, literal)),
        }
    }

    /// Evaluates an aggregation expression: field references, literals, `$and`, `$or`,
    /// `$not` and comparison operators.
    fn expression(&self, expression: &Bson) -> ModelResult<Bson> {
        match expression {
            Bson::String(reference) if reference.starts_with('$') => Ok(resolve(
                self.document,
                &reference[1..],
            )
            .first()
            .map(|value| (*value).clone())
            .unwrap_or(Bson::Null)),
            Bson::Document(operation) if operation.len() == 1 => {
                let Some((operator, arguments)) = operation.iter().next() else {
                    return Ok(Bson::Null);
                };
                let arguments = match arguments {
                    Bson::Array(items) => items
                        .iter()
                        .map(|item| self.expression(item))
                        .collect::<ModelResult<Vec<_>>>()?,
                    single => vec![self.expression(single)?],
                };

                match operator.as_str() {
                    "$and" => Ok(Bson::Boolean(arguments.iter().all(truthy))),
                    "$or" => Ok(Bson::Boolean(arguments.iter().any(truthy))),
                    "$not" => Ok(Bson::Boolean(!arguments.first().is_some_and(truthy))),
                    "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                        let [left, right] = arguments.as_slice() else {
                            return Err(ModelError::Backend(format!(
                                "{operator} expects two arguments"
                            )));
                        };
                        let ordering = sort_order(Some(left), Some(right));
                        let equal = Comparable::from(left) == Comparable::from(right);

                        Ok(Bson::Boolean(match operator.as_str() {
                            "$eq" => equal,
                            "$ne" => !equal,
                            "$gt" => ordering == Ordering::Greater,
                            "$gte" => equal || ordering == Ordering::Greater,
                            "$lt" => ordering == Ordering::Less,
                            _ => equal || ordering == Ordering::Less,
                        }))
                    }
                    other => Err(ModelError::Backend(format!(
                        "unsupported expression operator {other}"
                    ))),
                }
            }
            literal => Ok(literal.clone()),
        }
    }
}

fn truthy(value: &Bson) -> bool {
    !matches!(
        value,
        Bson::Null | Bson::Undefined | Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0)
    )
}

/// Literal equality. Arrays match when equal or when one element is equal; `null` matches
/// missing fields.
fn equals_any(values: &[&Bson], literal: &Bson) -> bool {
    let expected = Comparable::from(literal);
    if values.is_empty() {
        return expected == Comparable::Null;
    }

    values.iter().any(|value| {
        Comparable::from(*value) == expected
            || matches!(value, Bson::Array(items) if items.iter().any(|item| Comparable::from(item) == expected))
    })
}

/// Applies `accept` to the ordering of every candidate value and to the elements of array candidates.
fn any_compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    let check = |value: &Bson| {
        Comparable::from(value)
            .partial_cmp(&expected)
            .is_some_and(&accept)
    };

    values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(check),
        single => check(*single),
    })
}

/// Builds a regex from a pattern and MongoDB option letters (`i`, `m`, `s`, `x`).
fn compile_regex(pattern: &str, options: &str) -> ModelResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for option in options.chars() {
        match option {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(ModelError::Backend(format!("unsupported regex option {other}")));
            }
        };
    }

    builder
        .build()
        .map_err(|err| ModelError::Backend(format!("invalid regex {pattern}: {err}")))
}

/// Matches string candidates, and the string elements of array candidates, against `regex`.
fn regex_matches(values: &[&Bson], regex: &Regex) -> bool {
    let check = |value: &Bson| matches!(value, Bson::String(text) if regex.is_match(text));

    values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(check),
        single => check(*single),
    })
}

/// Applies every operator of an operator document; `$options` qualifies `$regex`.
fn apply_operators(values: &[&Bson], operators: &Document) -> ModelResult<bool> {
    let options = match operators.get("$options") {
        None => "",
        Some(Bson::String(options)) if operators.contains_key("$regex") => options.as_str(),
        Some(_) => {
            return Err(ModelError::Backend("$options requires a string and $regex".to_string()));
        }
    };

    for (operator, operand) in operators {
        let matched = match (operator.as_str(), operand) {
            ("$options", _) => true,
            ("$regex", Bson::String(pattern)) => {
                regex_matches(values, &compile_regex(pattern, options)?)
            }
            ("$regex", Bson::RegularExpression(regex)) => {
                let flags = if options.is_empty() { regex.options.as_str() } else { options };
                regex_matches(values, &compile_regex(regex.pattern.as_str(), flags)?)
            }
            ("$regex", _) => {
                return Err(ModelError::Backend("$regex requires a pattern".to_string()));
            }
            (operator, operand) => apply_operator(values, operator, operand)?,
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn apply_operator(values: &[&Bson], operator: &str, operand: &Bson) -> ModelResult<bool> {
    let in_list = |operand: &Bson| -> ModelResult<bool> {
        let Bson::Array(items) = operand else {
            return Err(ModelError::Backend(format!("{operator} requires an array")));
        };
        Ok(items.iter().any(|item| equals_any(values, item)))
    };

    match operator {
        "$eq" => Ok(equals_any(values, operand)),
        "$ne" => Ok(!equals_any(values, operand)),
        "$gt" => Ok(any_compares(values, operand, |ord| ord == Ordering::Greater)),
        "$gte" => Ok(any_compares(values, operand, |ord| ord != Ordering::Less)),
        "$lt" => Ok(any_compares(values, operand, |ord| ord == Ordering::Less)),
        "$lte" => Ok(any_compares(values, operand, |ord| ord != Ordering::Greater)),
        "$in" => in_list(operand),
        "$nin" => Ok(!in_list(operand)?),
        "$exists" => Ok(!values.is_empty() == truthy(operand)),
        "$size" => {
            let expected = match operand {
                Bson::Int32(size) => *size as i64,
                Bson::Int64(size) => *size,
                _ => return Err(ModelError::Backend("$size requires an integer".to_string())),
            };
            Ok(values
                .iter()
                .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == expected)))
        }
        "$all" => {
            let Bson::Array(items) = operand else {
                return Err(ModelError::Backend("$all requires an array".to_string()));
            };
            Ok(items.iter().all(|item| equals_any(values, item)))
        }
        "$not" => {
            let operators = match operand {
                Bson::Document(operators) => operators.clone(),
                Bson::RegularExpression(regex) => doc! { "$regex": regex.clone() },
                _ => {
                    return Err(ModelError::Backend(
                        "$not requires an operator document".to_string(),
                    ));
                }
            };
            Ok(!apply_operators(values, &operators)?)
        }
        other => Err(ModelError::Backend(format!("unsupported operator {other}"))),
    }
}

/// Applies a native update document in place.
///
/// A document without `$` keys replaces the stored document, keeping its `_id`.
///
/// # Errors
///
/// Returns a backend error for unsupported operators or mixed replacement and operator keys;
/// `document` is left untouched in that case.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> ModelResult<()> {
    let operators = update.keys().filter(|key| key.starts_with('$')).count();

    if operators == 0 {
        let id = document.get("_id").cloned();
        *document = update.clone();
        if let Some(id) = id {
            document.insert("_id", id);
        }
        return Ok(());
    }
    if operators != update.len() {
        return Err(ModelError::Backend(
            "update documents cannot mix operators and fields".to_string(),
        ));
    }

    let mut updated = document.clone();
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(ModelError::Backend(format!("{operator} requires a document")));
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(&mut updated, path, value.clone())?,
                "$unset" => unset_path(&mut updated, path),
                "$inc" => {
                    let current = get_path(&updated, path).cloned().unwrap_or(Bson::Int32(0));
                    set_path(&mut updated, path, add(&current, value)?)?;
                }
                "$push" => {
                    let mut items = match get_path(&updated, path) {
                        Some(Bson::Array(items)) => items.clone(),
                        None | Some(Bson::Null) => Vec::new(),
                        Some(_) => {
                            return Err(ModelError::Backend(format!("{path} is not an array")));
                        }
                    };
                    items.push(value.clone());
                    set_path(&mut updated, path, Bson::Array(items))?;
                }
                "$pull" => {
                    if let Some(Bson::Array(items)) = get_path(&updated, path) {
                        let expected = Comparable::from(value);
                        let kept: Vec<Bson> = items
                            .iter()
                            .filter(|item| Comparable::from(*item) != expected)
                            .cloned()
                            .collect();
                        set_path(&mut updated, path, Bson::Array(kept))?;
                    }
                }
                other => {
                    return Err(ModelError::Backend(format!("unsupported update operator {other}")));
                }
            }
        }
    }

    *document = updated;
    Ok(())
}

fn add(current: &Bson, delta: &Bson) -> ModelResult<Bson> {
    Ok(match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return Err(ModelError::Backend("$inc requires numeric values".to_string())),
    })
}

fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = document.get(head)?;

    match (rest, value) {
        (None, value) => Some(value),
        (Some(rest), Bson::Document(inner)) => get_path(inner, rest),
        _ => None,
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> ModelResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    match document
        .entry(head.to_string())
        .or_insert_with(|| Bson::Document(Document::new()))
    {
        Bson::Document(inner) => set_path(inner, rest, value),
        _ => Err(ModelError::Backend(format!("cannot set {rest} on non-document {head}"))),
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let included = |value: &Bson| !matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false));
    let inclusion = projection
        .iter()
        .any(|(key, value)| key != "_id" && included(value));

    if inclusion {
        let mut projected = Document::new();
        if projection.get("_id").is_none_or(included) {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (key, value) in projection {
            if key != "_id" && included(value) {
                if let Some(found) = get_path(document, key) {
                    set_path(&mut projected, key, found.clone()).ok();
                }
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for key in projection.keys() {
            unset_path(&mut projected, key);
        }
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: &Document, filter: Document) -> bool {
        DocumentEvaluator::new(document).matches(&filter).unwrap()
    }

    #[test]
    fn literal_and_comparison_operators() {
        let document = doc! { "name": "ada", "age": 36, "score": 9.5 };

        assert!(matches(&document, doc! { "name": "ada" }));
        assert!(!matches(&document, doc! { "name": "bob" }));
        assert!(matches(&document, doc! { "age": { "$gte": 36_i64, "$lt": 40.0 } }));
        assert!(!matches(&document, doc! { "age": { "$gt": 36 } }));
        assert!(matches(&document, doc! { "score": { "$ne": 1 } }));
        assert!(matches(&document, doc! { "missing": null }));
        assert!(matches(&document, doc! { "missing": { "$exists": false } }));
    }

    #[test]
    fn arrays_match_elements() {
        let id = ObjectId::new();
        let document = doc! { "tags": ["a", "b"], "refs": [id] };

        assert!(matches(&document, doc! { "tags": "a" }));
        assert!(matches(&document, doc! { "refs": { "$in": [ObjectId::new(), id] } }));
        assert!(matches(&document, doc! { "tags": { "$nin": ["c"] } }));
        assert!(matches(&document, doc! { "tags": { "$all": ["b", "a"], "$size": 2 } }));
    }

    #[test]
    fn dotted_paths_fan_out_over_arrays() {
        let document = doc! {
            "address": { "city": "London" },
            "posts": [{ "title": "one" }, { "title": "two" }],
        };

        assert!(matches(&document, doc! { "address.city": "London" }));
        assert!(matches(&document, doc! { "posts.title": "two" }));
        assert!(matches(&document, doc! { "posts.0.title": "one" }));
        assert!(!matches(&document, doc! { "posts.1.title": "one" }));
    }

    #[test]
    fn logical_operators_and_field_references() {
        let document = doc! { "spent": 12, "budget": 10, "deleted": false };

        assert!(matches(
            &document,
            doc! { "$or": [{ "spent": 1 }, { "budget": 10 }], "$nor": [{ "deleted": true }] }
        ));
        assert!(matches(
            &document,
            doc! { "$expr": { "$and": [{ "$gt": ["$spent", "$budget"] }] } }
        ));
        assert!(!matches(&document, doc! { "$expr": { "$lt": ["$spent", "$budget"] } }));
        assert!(matches(&document, doc! { "spent": { "$not": { "$lt": 5 } } }));
    }

    #[test]
    fn regex_patterns_and_options() {
        let document = doc! { "name": "Ada Lovelace", "tags": ["math", "Poetry"] };

        assert!(matches(&document, doc! { "name": { "$regex": "^Ada" } }));
        assert!(!matches(&document, doc! { "name": { "$regex": "^ada" } }));
        assert!(matches(&document, doc! { "name": { "$regex": "^ada", "$options": "i" } }));
        assert!(matches(&document, doc! { "tags": { "$regex": "^poe", "$options": "i" } }));
        assert!(matches(&document, doc! { "name": { "$not": { "$regex": "^Bob" } } }));
        assert!(!matches(&document, doc! { "missing": { "$regex": "." } }));
    }

    #[test]
    fn unsupported_operators_fail() {
        let document = doc! { "name": "ada" };
        let evaluate = |filter: Document| DocumentEvaluator::new(&document).matches(&filter);

        assert!(matches!(evaluate(doc! { "$where": "true" }), Err(ModelError::Backend(_))));
        assert!(matches!(
            evaluate(doc! { "name": { "$type": "string" } }),
            Err(ModelError::Backend(_))
        ));
        assert!(matches!(
            evaluate(doc! { "name": { "$regex": "(" } }),
            Err(ModelError::Backend(_))
        ));
        assert!(matches!(
            evaluate(doc! { "name": { "$options": "i" } }),
            Err(ModelError::Backend(_))
        ));
    }

    #[test]
    fn updates_apply_atomically() {
        let mut document = doc! { "_id": 1, "name": "ada", "age": 36, "tags": ["a"] };

        apply_update(
            &mut document,
            &doc! {
                "$set": { "address.city": "London" },
                "$unset": { "age": "" },
                "$inc": { "visits": 2 },
                "$push": { "tags": "b" },
            },
        )
        .unwrap();
        assert_eq!(
            document,
            doc! {
                "_id": 1,
                "name": "ada",
                "tags": ["a", "b"],
                "address": { "city": "London" },
                "visits": 2,
            }
        );

        let before = document.clone();
        let result = apply_update(&mut document, &doc! { "$set": { "x": 1 }, "$rename": { "a": "b" } });
        assert!(matches!(result, Err(ModelError::Backend(_))));
        assert_eq!(document, before);

        apply_update(&mut document, &doc! { "name": "replaced" }).unwrap();
        assert_eq!(document, doc! { "name": "replaced", "_id": 1 });
    }

    #[test]
    fn projections_include_or_exclude() {
        let document = doc! { "_id": 1, "name": "ada", "address": { "city": "London", "zip": "N1" } };

        assert_eq!(
            project(&document, &doc! { "address.city": 1 }),
            doc! { "_id": 1, "address": { "city": "London" } }
        );
        assert_eq!(
            project(&document, &doc! { "address": 0, "_id": 0 }),
            doc! { "name": "ada" }
        );
    }

    #[test]
    fn sort_order_puts_missing_first() {
        let one = Bson::Int32(1);
        let two = Bson::Double(2.0);

        assert_eq!(sort_order(None, Some(&one)), Ordering::Less);
        assert_eq!(sort_order(Some(&two), Some(&one)), Ordering::Greater);
    }
}
