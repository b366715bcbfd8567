use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::EntityId;

static ABSENT: Value = Value::Absent;

/// An atomic, comparable leaf value.
///
/// Scalars are totally ordered (floats compare with `total_cmp`) so that
/// they can be members of a [`Value::Set`]. Values of different kinds order
/// by kind first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Id(EntityId),
}

impl Scalar {
    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Bytes(_) => 4,
            Self::Id(_) => 5,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Id(a), Self::Id(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Bytes(v) => v.hash(state),
            Self::Id(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Id(v) => write!(f, "{v}"),
        }
    }
}

/// The structural kind of a present [`Value`].
///
/// A field's shape is fixed by its schema; the merge engine refuses to
/// reconcile values of different shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Counter,
    Set,
    Sequence,
    Keyed,
    Record,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::Counter => "counter",
            Self::Set => "set",
            Self::Sequence => "sequence",
            Self::Keyed => "keyed map",
            Self::Record => "record",
        };
        f.write_str(name)
    }
}

/// Tagged representation of any storable shape.
///
/// Every domain entity is mapped to and from a `Value` tree once, at the
/// boundary (see [`Entity`](crate::Entity)); everything below that boundary
/// (merging, caching, transactions, the log) only ever sees `Value`s.
///
/// `Set` and `Sequence` are the unordered and ordered flavours of a
/// collection. `Keyed` maps identifiers to independent values, `Record`
/// holds the schema-defined named fields of a nested entity.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Value {
    #[default]
    Absent,
    Scalar(Scalar),
    Counter(i64),
    Set(BTreeSet<Value>),
    Sequence(Vec<Value>),
    Keyed(BTreeMap<String, Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// An empty record.
    pub fn record() -> Self {
        Self::Record(BTreeMap::new())
    }

    /// An empty keyed map.
    pub fn keyed() -> Self {
        Self::Keyed(BTreeMap::new())
    }

    pub fn set<I, V>(members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Set(members.into_iter().map(Into::into).collect())
    }

    pub fn sequence<I, V>(elements: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Sequence(elements.into_iter().map(Into::into).collect())
    }

    pub fn counter(count: i64) -> Self {
        Self::Counter(count)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(text.into()))
    }

    /// Builder form of [`set_field`](Self::set_field). A non-record is
    /// returned unchanged.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Builder form of [`insert_entry`](Self::insert_entry). A non-keyed
    /// value is returned unchanged.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_entry(key, value);
        self
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// The shape of this value, `None` when absent.
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Self::Absent => None,
            Self::Scalar(_) => Some(Shape::Scalar),
            Self::Counter(_) => Some(Shape::Counter),
            Self::Set(_) => Some(Shape::Set),
            Self::Sequence(_) => Some(Shape::Sequence),
            Self::Keyed(_) => Some(Shape::Keyed),
            Self::Record(_) => Some(Shape::Record),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }

    /// `Some(self)` when present.
    pub fn present(&self) -> Option<&Value> {
        if self.is_absent() { None } else { Some(self) }
    }

    /// A record field, or `Absent` when missing (or when this is not a record).
    pub fn field(&self, name: &str) -> &Value {
        match self {
            Self::Record(fields) => fields.get(name).unwrap_or(&ABSENT),
            _ => &ABSENT,
        }
    }

    /// A keyed-map entry, or `Absent` when missing (or when this is not keyed).
    pub fn entry(&self, key: &str) -> &Value {
        match self {
            Self::Keyed(entries) => entries.get(key).unwrap_or(&ABSENT),
            _ => &ABSENT,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            Self::Counter(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Self::Set(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Keyed(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// A record field that must be present.
    pub fn require(&self, name: &str) -> Result<&Value, TypeError> {
        match self.field(name) {
            Value::Absent => Err(TypeError::MissingField(name.to_string())),
            value => Ok(value),
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Set a record field. Setting `Absent` removes the field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if let Self::Record(fields) = self {
            let value = value.into();
            let name = name.into();
            if value.is_absent() {
                fields.remove(&name);
            } else {
                fields.insert(name, value);
            }
        }
    }

    /// Insert a keyed-map entry. Inserting `Absent` removes the key.
    pub fn insert_entry(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Self::Keyed(entries) = self {
            let value = value.into();
            let key = key.into();
            if value.is_absent() {
                entries.remove(&key);
            } else {
                entries.insert(key, value);
            }
        }
    }

    /// Remove a keyed-map entry, returning it.
    pub fn remove_entry(&mut self, key: &str) -> Option<Value> {
        match self {
            Self::Keyed(entries) => entries.remove(key),
            _ => None,
        }
    }

    /// Add a member to a set. Returns `true` if it was newly inserted.
    pub fn insert_member(&mut self, member: impl Into<Value>) -> bool {
        match self {
            Self::Set(members) => members.insert(member.into()),
            _ => false,
        }
    }

    /// Remove a member from a set. Returns `true` if it was present.
    pub fn remove_member(&mut self, member: &Value) -> bool {
        match self {
            Self::Set(members) => members.remove(member),
            _ => false,
        }
    }

    /// Append an element to a sequence.
    pub fn push(&mut self, element: impl Into<Value>) {
        if let Self::Sequence(elements) = self {
            elements.push(element.into());
        }
    }

    /// Adjust a counter, saturating at the `i64` bounds.
    pub fn increment(&mut self, delta: i64) {
        if let Self::Counter(count) = self {
            *count = count.saturating_add(delta);
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check that the tree is well formed: no `Absent` nested inside a
    /// collection, keyed map or record. An absent root is valid (it is a
    /// deletion).
    pub fn validate(&self) -> Result<(), TypeError> {
        self.validate_at(&mut String::from("$"))
    }

    fn validate_at(&self, path: &mut String) -> Result<(), TypeError> {
        let container = match self.shape() {
            Some(shape) => shape,
            None => return Ok(()),
        };
        let len = path.len();
        let check = |child: &Value, path: &mut String| -> Result<(), TypeError> {
            if child.is_absent() {
                return Err(TypeError::NestedAbsent {
                    path: path.clone(),
                    container,
                });
            }
            child.validate_at(path)?;
            path.truncate(len);
            Ok(())
        };
        match self {
            Self::Set(members) => {
                for member in members {
                    path.push_str("[*]");
                    check(member, path)?;
                }
            }
            Self::Sequence(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    path.push_str(&format!("[{index}]"));
                    check(element, path)?;
                }
            }
            Self::Keyed(entries) => {
                for (key, entry) in entries {
                    path.push_str(&format!("[{key:?}]"));
                    check(entry, path)?;
                }
            }
            Self::Record(fields) => {
                for (name, field) in fields {
                    path.push('.');
                    path.push_str(name);
                    check(field, path)?;
                }
            }
            Self::Absent | Self::Scalar(_) | Self::Counter(_) => {}
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("<absent>"),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Counter(c) => write!(f, "counter({c})"),
            Self::Set(members) => {
                f.write_str("{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str("}")
            }
            Self::Sequence(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
            Self::Keyed(entries) | Self::Record(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Self::Scalar(scalar)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Text(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Text(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Scalar(Scalar::Bytes(v))
    }
}

impl From<EntityId> for Value {
    fn from(v: EntityId) -> Self {
        Self::Scalar(Scalar::Id(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Absent)
    }
}
