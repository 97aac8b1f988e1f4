//! Static type shapes used in place of runtime reflection.
//!
//! Every type that can appear inside a record implements [`Shaped`], which describes the
//! type as a tree of [`TypeShape`] nodes: scalars, the reserved timestamp leaf, sequences,
//! mappings, references (`Option`, `Box`, `Arc`) and records. Record types get their
//! implementation from `#[derive(Record)]`, which also emits the per-field annotation table
//! ([`FieldShape`]) that the metadata cache turns into a
//! [`StructMetadata`](crate::metadata::StructMetadata).
//!
//! Record shapes list their fields lazily through a function pointer, so building the shape
//! of a self-referential type does not recurse.

use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

/// Scalar leaf kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Text,
    ObjectId,
    Uuid,
    Binary,
    /// Schemaless values (`Bson`, `bson::Document`, `serde_json::Value`).
    Any,
}

/// The static shape of a Rust type as seen by the mapping layer.
#[derive(Clone)]
pub enum TypeShape {
    Scalar(ScalarKind),
    /// Reserved timestamp leaf. Never descended into, even though it is a struct in Rust.
    Timestamp,
    Sequence(Box<TypeShape>),
    /// String-keyed mapping; the boxed shape describes the values.
    Mapping(Box<TypeShape>),
    /// A single level of indirection: `Option<T>`, `Box<T>`, `Arc<T>`.
    Reference(Box<TypeShape>),
    Record(RecordShape),
}

impl TypeShape {
    /// Follows at most one reference layer.
    pub fn deref_once(&self) -> &TypeShape {
        match self {
            TypeShape::Reference(inner) => inner,
            other => other,
        }
    }

    /// Returns the record shape if this is a record.
    pub fn as_record(&self) -> Option<&RecordShape> {
        match self {
            TypeShape::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Scalar(kind) => write!(f, "{kind:?}"),
            TypeShape::Timestamp => write!(f, "Timestamp"),
            TypeShape::Sequence(inner) => write!(f, "Sequence<{inner:?}>"),
            TypeShape::Mapping(inner) => write!(f, "Mapping<{inner:?}>"),
            TypeShape::Reference(inner) => write!(f, "Reference<{inner:?}>"),
            TypeShape::Record(record) => write!(f, "Record<{}>", record.type_name),
        }
    }
}

/// Identity and field table of a record type.
#[derive(Clone, Copy)]
pub struct RecordShape {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub fields: fn() -> Vec<FieldShape>,
}

impl RecordShape {
    pub fn new<T: 'static>(type_name: &'static str, fields: fn() -> Vec<FieldShape>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name,
            fields,
        }
    }
}

/// One declared field of a record together with its raw annotations.
///
/// Annotations are kept unparsed (`"name,omitempty"`, `"author_id,id"`); their interpretation
/// belongs to the metadata cache.
#[derive(Debug, Clone)]
pub struct FieldShape {
    /// Rust field name.
    pub name: &'static str,
    /// Natural (serde) name annotation.
    pub natural: Option<&'static str>,
    /// Storage name annotation.
    pub storage: Option<&'static str>,
    /// Relation annotation: `id_field[,lookup_field]`.
    pub relation: Option<&'static str>,
    /// Marks an embedded base-record field that is never mapped.
    pub base: bool,
    pub shape: TypeShape,
}

impl FieldShape {
    pub fn new(name: &'static str, shape: TypeShape) -> Self {
        Self {
            name,
            natural: None,
            storage: None,
            relation: None,
            base: false,
            shape,
        }
    }

    pub fn natural(mut self, tag: &'static str) -> Self {
        self.natural = Some(tag);
        self
    }

    pub fn storage(mut self, tag: &'static str) -> Self {
        self.storage = Some(tag);
        self
    }

    pub fn relation(mut self, tag: &'static str) -> Self {
        self.relation = Some(tag);
        self
    }

    pub fn base(mut self) -> Self {
        self.base = true;
        self
    }
}

/// Describes the static shape of a type.
pub trait Shaped {
    fn type_shape() -> TypeShape;
}

macro_rules! impl_scalar {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Shaped for $ty {
                fn type_shape() -> TypeShape {
                    TypeShape::Scalar($kind)
                }
            }
        )+
    };
}

impl_scalar!(ScalarKind::Bool => bool);
impl_scalar!(ScalarKind::Int => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
impl_scalar!(ScalarKind::Float => f32, f64);
impl_scalar!(ScalarKind::Text => String, char);
impl_scalar!(ScalarKind::ObjectId => bson::oid::ObjectId);
impl_scalar!(ScalarKind::Uuid => bson::Uuid, uuid::Uuid);
impl_scalar!(ScalarKind::Binary => bson::Binary);
impl_scalar!(ScalarKind::Any => bson::Bson, bson::Document, serde_json::Value);

impl Shaped for bson::DateTime {
    fn type_shape() -> TypeShape {
        TypeShape::Timestamp
    }
}

impl<Tz: chrono::TimeZone> Shaped for chrono::DateTime<Tz> {
    fn type_shape() -> TypeShape {
        TypeShape::Timestamp
    }
}

impl Shaped for chrono::NaiveDateTime {
    fn type_shape() -> TypeShape {
        TypeShape::Timestamp
    }
}

impl<T: Shaped> Shaped for Option<T> {
    fn type_shape() -> TypeShape {
        TypeShape::Reference(Box::new(T::type_shape()))
    }
}

impl<T: Shaped> Shaped for Box<T> {
    fn type_shape() -> TypeShape {
        TypeShape::Reference(Box::new(T::type_shape()))
    }
}

impl<T: Shaped> Shaped for Arc<T> {
    fn type_shape() -> TypeShape {
        TypeShape::Reference(Box::new(T::type_shape()))
    }
}

macro_rules! impl_sequence {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl<T: Shaped> Shaped for $ty<T> {
                fn type_shape() -> TypeShape {
                    TypeShape::Sequence(Box::new(T::type_shape()))
                }
            }
        )+
    };
}

impl_sequence!(Vec, VecDeque, HashSet, BTreeSet);

impl<K, V: Shaped, S> Shaped for HashMap<K, V, S> {
    fn type_shape() -> TypeShape {
        TypeShape::Mapping(Box::new(V::type_shape()))
    }
}

impl<K, V: Shaped> Shaped for BTreeMap<K, V> {
    fn type_shape() -> TypeShape {
        TypeShape::Mapping(Box::new(V::type_shape()))
    }
}
