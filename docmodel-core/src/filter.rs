//! Filter expressions and their compilation into native filter documents.
//!
//! A [`FilterExpression`] is an ordered list of field conditions built through
//! [`FilterExpression::name`] (operator tokens such as `"=="`, `">="` or `"in"`) or taken
//! verbatim from a raw document. [`FilterExpression::compile`] produces the MongoDB-style
//! filter document handed to the backend, including field-to-field comparisons under
//! `$expr` and soft-delete scoping derived from the record metadata.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::filter::{FilterExpression, Operand, TrashMode};
//!
//! let mut filter = FilterExpression::new();
//! filter
//!     .name("age", ">=", 18)
//!     .name("age", "<", 65)
//!     .name("updated_at", ">", Operand::field("created_at"));
//!
//! // { "age": { "$gte": 18, "$lt": 65 },
//! //   "$expr": { "$and": [{ "$gt": ["$updated_at", "$created_at"] }] },
//! //   "deleted_at": { "$exists": false } }
//! let compiled = filter.compile(Some(&metadata), TrashMode::ExcludeDeleted);
//! ```

use bson::{Bson, Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::{
    metadata::{ElementKind, FieldDescriptor, StructMetadata},
    shape::ScalarKind,
};

/// Name of the boolean soft-delete flag field.
pub const DELETED_FIELD: &str = "deleted";
/// Name of the soft-delete timestamp field.
pub const DELETED_AT_FIELD: &str = "deleted_at";

/// Prefix given to user field names that start with `$`, so they cannot smuggle operators.
const INVALID_FIELD_PREFIX: &str = "..invalid$";

/// Soft-delete visibility of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrashMode {
    /// Only soft-deleted records.
    OnlyDeleted,
    /// Every record regardless of its soft-delete state.
    All,
    /// Only records that are not soft-deleted.
    #[default]
    ExcludeDeleted,
}

/// Comparison operator of a field condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
    /// Any other native operator, stored with its `$` prefix.
    Other(String),
}

impl Operator {
    /// Normalizes an operator token: symbolic comparisons, bare names and `$`-prefixed names.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "" | "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" | "=>" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" | "=<" => Operator::Lte,
            other => match other.trim_start_matches('$') {
                "eq" => Operator::Eq,
                "ne" => Operator::Ne,
                "gt" => Operator::Gt,
                "gte" => Operator::Gte,
                "lt" => Operator::Lt,
                "lte" => Operator::Lte,
                "in" => Operator::In,
                "nin" => Operator::Nin,
                "exists" => Operator::Exists,
                "regex" => Operator::Regex,
                name => Operator::Other(format!("${name}")),
            },
        }
    }

    /// The native, `$`-prefixed operator name.
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
            Operator::Regex => "$regex",
            Operator::Other(name) => name,
        }
    }
}

impl From<&str> for Operator {
    fn from(token: &str) -> Self {
        Operator::parse(token)
    }
}

/// Right-hand side of a condition: a literal or another field of the same record.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Bson),
    Field(String),
}

impl Operand {
    /// Refers to another field, compiling the condition to a `$expr` comparison.
    pub fn field(name: impl Into<String>) -> Self {
        Operand::Field(name.into())
    }
}

macro_rules! impl_operand_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Value(value.into())
                }
            }
        )+
    };
}

impl_operand_value!(
    Bson,
    Document,
    &str,
    String,
    bool,
    i32,
    i64,
    f64,
    ObjectId,
    bson::DateTime,
    bson::Uuid,
);

impl<T: Into<Bson>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand::Value(Bson::Array(values.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Bson>> From<Option<T>> for Operand {
    fn from(value: Option<T>) -> Self {
        Operand::Value(value.map_or(Bson::Null, Into::into))
    }
}

/// Condition attached to one field (or raw `$` key) of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Emitted verbatim.
    Raw(Bson),
    /// Operator list in insertion order; repeating an operator replaces its operand.
    Operators(Vec<(Operator, Operand)>),
}

/// Ordered mapping from field name to condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    entries: Vec<(String, Condition)>,
}

impl FilterExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an expression from a raw filter document.
    ///
    /// `$` keys and plain values are kept raw; documents made only of `$` operators become
    /// operator lists so later [`name`](Self::name) calls merge into them.
    pub fn from_document(document: Document) -> Self {
        let mut filter = Self::new();

        for (key, value) in document {
            let condition = match value {
                Bson::Document(operators)
                    if !key.starts_with('$')
                        && !operators.is_empty()
                        && operators.keys().all(|op| op.starts_with('$')) =>
                {
                    Condition::Operators(
                        operators
                            .into_iter()
                            .map(|(op, operand)| (Operator::parse(&op), Operand::Value(operand)))
                            .collect(),
                    )
                }
                value => Condition::Raw(value),
            };
            filter.set(key, condition);
        }

        filter
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, condition)| condition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a raw condition, replacing whatever the field held.
    pub fn raw(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.set(name.into(), Condition::Raw(value.into()));
        self
    }

    /// Adds `field <operator> operand`, merging into the field's operator list.
    ///
    /// Field names starting with `$` are renamed so they can never match.
    pub fn name(
        &mut self,
        field: impl Into<String>,
        operator: impl Into<Operator>,
        operand: impl Into<Operand>,
    ) -> &mut Self {
        let mut field = field.into();
        if field.starts_with('$') {
            field = format!("{INVALID_FIELD_PREFIX}{field}");
        }
        let operator = operator.into();
        let operand = operand.into();

        match self.entries.iter_mut().find(|(key, _)| *key == field) {
            Some((_, Condition::Operators(operators))) => {
                match operators.iter_mut().find(|(existing, _)| *existing == operator) {
                    Some((_, existing)) => *existing = operand,
                    None => operators.push((operator, operand)),
                }
            }
            Some((_, condition)) => *condition = Condition::Operators(vec![(operator, operand)]),
            None => self
                .entries
                .push((field, Condition::Operators(vec![(operator, operand)]))),
        }

        self
    }

    /// Constrains the soft-delete state explicitly, using the record's deleted flag or
    /// deletion timestamp. Records without either are left unconstrained.
    pub fn deleted(&mut self, metadata: &StructMetadata, deleted: bool) -> &mut Self {
        if let Some(field) = deleted_flag(metadata) {
            let storage = field.storage.clone();
            if deleted {
                self.name(storage, Operator::Eq, true);
            } else {
                self.name(storage, Operator::Ne, true);
            }
        } else if let Some(field) = deleted_timestamp(metadata) {
            self.name(field.storage.clone(), Operator::Exists, deleted);
        }

        self
    }

    fn set(&mut self, name: String, condition: Condition) {
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = condition,
            None => self.entries.push((name, condition)),
        }
    }

    /// Compiles the expression into a native filter document.
    ///
    /// Trash scoping is only added when `metadata` declares a soft-delete field and the
    /// compiled document does not already constrain it.
    pub fn compile(&self, metadata: Option<&StructMetadata>, trash: TrashMode) -> Document {
        let mut compiled = Document::new();
        let mut expr = Vec::new();

        for (name, condition) in &self.entries {
            let operators = match condition {
                Condition::Raw(value) => {
                    compiled.insert(name.clone(), value.clone());
                    continue;
                }
                Condition::Operators(operators) => operators,
            };

            if let [(Operator::Eq, Operand::Value(value))] = operators.as_slice() {
                if !matches!(value, Bson::Document(_)) {
                    compiled.insert(name.clone(), value.clone());
                    continue;
                }
            }

            let mut clauses = Document::new();
            for (operator, operand) in operators {
                match operand {
                    Operand::Field(other) => expr.push(Bson::Document(doc! {
                        operator.as_str(): [format!("${name}"), format!("${other}")],
                    })),
                    Operand::Value(value) => {
                        clauses.insert(operator.as_str(), value.clone());
                    }
                }
            }
            if !clauses.is_empty() {
                compiled.insert(name.clone(), clauses);
            }
        }

        if !expr.is_empty() {
            let mut conjunction = Vec::new();
            match compiled.remove("$expr") {
                Some(Bson::Document(existing)) => {
                    if let Some(Bson::Array(items)) =
                        existing.get("$and").filter(|_| existing.len() == 1)
                    {
                        conjunction.extend(items.iter().cloned());
                    } else if !existing.is_empty() {
                        conjunction.push(Bson::Document(existing));
                    }
                }
                Some(other) => conjunction.push(other),
                None => {}
            }
            conjunction.extend(expr);
            compiled.insert("$expr", doc! { "$and": conjunction });
        }

        if let Some((key, value)) = metadata.and_then(|metadata| trash_scope(metadata, trash)) {
            if !compiled.contains_key(&key) {
                compiled.insert(key, value);
            }
        }

        compiled
    }
}

impl From<Document> for FilterExpression {
    fn from(document: Document) -> Self {
        FilterExpression::from_document(document)
    }
}

/// Converts hex strings that parse as object ids into object ids.
pub fn normalize_id(value: Bson) -> Bson {
    match value {
        Bson::String(hex) => match ObjectId::parse_str(&hex) {
            Ok(id) => Bson::ObjectId(id),
            Err(_) => Bson::String(hex),
        },
        other => other,
    }
}

fn deleted_flag(metadata: &StructMetadata) -> Option<&FieldDescriptor> {
    metadata
        .field(DELETED_FIELD)
        .filter(|field| field.is_persisted())
        .filter(|field| field.kind == ElementKind::Scalar(ScalarKind::Bool))
}

fn deleted_timestamp(metadata: &StructMetadata) -> Option<&FieldDescriptor> {
    metadata
        .field(DELETED_AT_FIELD)
        .filter(|field| field.is_persisted())
}

fn trash_scope(metadata: &StructMetadata, trash: TrashMode) -> Option<(String, Bson)> {
    let deleted = match trash {
        TrashMode::All => return None,
        TrashMode::OnlyDeleted => true,
        TrashMode::ExcludeDeleted => false,
    };

    if let Some(field) = deleted_flag(metadata) {
        let condition = if deleted { Bson::Boolean(true) } else { doc! { "$ne": true }.into() };
        return Some((field.storage.clone(), condition));
    }

    deleted_timestamp(metadata)
        .map(|field| (field.storage.clone(), doc! { "$exists": deleted }.into()))
}

/// Update document marking a record as soft-deleted at `now`, or `None` when the record has
/// no soft-delete field and must be removed instead.
pub fn soft_delete_update(metadata: &StructMetadata, now: bson::DateTime) -> Option<Document> {
    let mut set = Document::new();
    if let Some(field) = deleted_flag(metadata) {
        set.insert(field.storage.clone(), true);
    }
    if let Some(field) = deleted_timestamp(metadata) {
        set.insert(field.storage.clone(), now);
    }

    (!set.is_empty()).then(|| doc! { "$set": set })
}

/// Update document clearing the soft-delete state, or `None` when the record has no
/// soft-delete field.
pub fn restore_update(metadata: &StructMetadata) -> Option<Document> {
    let mut update = Document::new();
    if let Some(field) = deleted_flag(metadata) {
        update.insert("$set", doc! { field.storage.clone(): false });
    }
    if let Some(field) = deleted_timestamp(metadata) {
        update.insert("$unset", doc! { field.storage.clone(): 1 });
    }

    (!update.is_empty()).then_some(update)
}
