//! Plain data model shared by decode and encode.
//!
//! `Value` is the loosely-typed tree that decode consumes and encode
//! produces (maps, sequences, scalars), widened with the shaped results a
//! decode can hand back: enum members, record values, and the domain leaves
//! built by extensions.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;
use thiserror::Error;
use uuid::Uuid;

use crate::ir::RecordDef;

#[derive(Debug, Clone)]
pub enum Value {
    /// The absence-of-value sentinel.
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Bytes(Vec<u8>),
    /// Mutable sequence.
    List(Vec<Value>),
    /// Immutable sequence.
    Tuple(Vec<Value>),
    Set(IndexSet<Value>),
    FrozenSet(IndexSet<Value>),
    Map(IndexMap<Value, Value>),
    Member(Member),
    Record(Record),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Ip(IpAddr),
    Interface(IpInterface),
}

/// Runtime shape of a value, as seen by the encoder.
#[derive(Debug, Clone)]
pub enum Shape<'a> {
    Map(&'a IndexMap<Value, Value>),
    Iterable(Elements<'a>),
    Member(&'a Member),
    Record(&'a Record),
    Scalar(&'a Value),
}

/// Borrowing iterator over the elements of any sequence or set.
#[derive(Debug, Clone)]
pub enum Elements<'a> {
    Seq(std::slice::Iter<'a, Value>),
    Set(indexmap::set::Iter<'a, Value>),
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self {
            Elements::Seq(it) => it.next(),
            Elements::Set(it) => it.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Elements::Seq(it) => it.size_hint(),
            Elements::Set(it) => it.size_hint(),
        }
    }
}

impl Value {
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn tuple<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::Tuple(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Map(_) => "map",
            Value::Member(_) => "member",
            Value::Record(_) => "record",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Ip(_) => "ip_address",
            Value::Interface(_) => "ip_interface",
        }
    }

    pub fn shape(&self) -> Shape<'_> {
        match self {
            Value::Map(m) => Shape::Map(m),
            Value::Member(m) => Shape::Member(m),
            Value::Record(r) => Shape::Record(r),
            other => match other.elements() {
                Some(items) => Shape::Iterable(items),
                None => Shape::Scalar(other),
            },
        }
    }

    /// Elements of a list, tuple, set or frozenset. Text and bytes are not
    /// iterable here.
    pub fn elements(&self) -> Option<Elements<'_>> {
        match self {
            Value::List(xs) | Value::Tuple(xs) => Some(Elements::Seq(xs.iter())),
            Value::Set(xs) | Value::FrozenSet(xs) => Some(Elements::Set(xs.iter())),
            _ => None,
        }
    }

    /// Ordered sequences only (list or tuple).
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(xs) | Value::Tuple(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Bytes(_)
        )
    }

    /// Lower into `serde_json::Value`. Only plain data converts; sets and
    /// tuples become arrays and scalar map keys are stringified.
    pub fn to_json(&self) -> Result<serde_json::Value, ToJsonError> {
        use serde_json::Value as J;
        Ok(match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(x) => serde_json::Number::from_f64(x.0)
                .map(J::Number)
                .ok_or(ToJsonError::NonFinite(x.0))?,
            Value::Str(s) => J::String(s.clone()),
            Value::List(xs) | Value::Tuple(xs) => {
                J::Array(xs.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Value::Set(xs) | Value::FrozenSet(xs) => {
                J::Array(xs.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Value::Map(m) => {
                let mut out = serde_json::Map::with_capacity(m.len());
                for (k, v) in m {
                    out.insert(json_key(k)?, v.to_json()?);
                }
                J::Object(out)
            }
            other => {
                return Err(ToJsonError::NotPlain {
                    kind: other.kind(),
                    value: other.to_string(),
                });
            }
        })
    }
}

fn json_key(key: &Value) -> Result<String, ToJsonError> {
    match key {
        Value::Str(s) => Ok(s.clone()),
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(x) => Ok(x.0.to_string()),
        other => Err(ToJsonError::Key(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToJsonError {
    #[error("{kind} value `{value}` has no plain JSON form")]
    NotPlain { kind: &'static str, value: String },
    #[error("non-finite float {0} has no JSON form")]
    NonFinite(f64),
    #[error("map key `{0}` is not a scalar")]
    Key(String),
}

// ------------------------------ Equality ---------------------------------- //

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Set(a), Set(b)) | (FrozenSet(a), FrozenSet(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Member(a), Member(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Ip(a), Ip(b)) => a == b,
            (Interface(a), Interface(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::List(xs) | Value::Tuple(xs) => xs.hash(state),
            // set and map equality ignore order, so must their hashes
            Value::Set(xs) | Value::FrozenSet(xs) => hash_unordered(xs.iter(), state),
            Value::Map(m) => hash_unordered(m.iter(), state),
            Value::Member(m) => m.hash(state),
            Value::Record(r) => r.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Ip(ip) => ip.hash(state),
            Value::Interface(i) => i.hash(state),
        }
    }
}

fn hash_unordered<T: Hash, H: Hasher>(items: impl Iterator<Item = T>, state: &mut H) {
    let mut acc = 0u64;
    let mut len = 0usize;
    for item in items {
        let mut h = DefaultHasher::new();
        item.hash(&mut h);
        acc = acc.wrapping_add(h.finish());
        len += 1;
    }
    len.hash(state);
    acc.hash(state);
}

// ------------------------------ Conversions ------------------------------- //

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                // u64 beyond i64::MAX and real floats
                None => Value::Float(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            },
            J::String(s) => Value::Str(s),
            J::Array(xs) => Value::List(xs.into_iter().map(Value::from).collect()),
            J::Object(m) => Value::Map(
                m.into_iter()
                    .map(|(k, v)| (Value::Str(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        Value::from(v.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(OrderedFloat(x))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<IpAddr> for Value {
    fn from(ip: IpAddr) -> Self {
        Value::Ip(ip)
    }
}

// -------------------------------- Members --------------------------------- //

/// A member of an enumeration: its declared name and the constant bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    enumeration: Arc<str>,
    name: Arc<str>,
    constant: Arc<Value>,
}

impl Member {
    pub(crate) fn new(enumeration: Arc<str>, name: &str, constant: Value) -> Self {
        Self {
            enumeration,
            name: Arc::from(name),
            constant: Arc::new(constant),
        }
    }

    pub fn enumeration(&self) -> &str {
        &self.enumeration
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constant(&self) -> &Value {
        &self.constant
    }
}

// -------------------------------- Records --------------------------------- //

/// An instance of a record type. Holds one value per declared field, in
/// declaration order.
#[derive(Debug, Clone)]
pub struct Record {
    def: Arc<RecordDef>,
    values: Vec<Value>,
}

impl Record {
    /// Build from one value per declared field; `None` if the count is off.
    pub fn new(def: Arc<RecordDef>, values: Vec<Value>) -> Option<Self> {
        (def.fields().len() == values.len()).then_some(Self { def, values })
    }

    pub(crate) fn from_parts(def: Arc<RecordDef>, values: Vec<Value>) -> Self {
        debug_assert_eq!(def.fields().len(), values.len());
        Self { def, values }
    }

    pub fn def(&self) -> &Arc<RecordDef> {
        &self.def
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.def.position(field).and_then(|i| self.values.get(i))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.def
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.def.name() == other.def.name() && self.fields().eq(other.fields())
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.def.name().hash(state);
        self.values.hash(state);
    }
}

// ----------------------------- IP interfaces ------------------------------ //

/// An address together with its network prefix length, e.g. `10.0.0.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpInterface {
    addr: IpAddr,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceParseError {
    #[error("missing `/prefix`")]
    MissingPrefix,
    #[error("invalid address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("invalid prefix length `{0}`")]
    Prefix(String),
}

impl IpInterface {
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        (prefix <= max).then_some(Self { addr, prefix })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for IpInterface {
    type Err = InterfaceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').ok_or(InterfaceParseError::MissingPrefix)?;
        let addr: IpAddr = addr.parse()?;
        prefix
            .parse::<u8>()
            .ok()
            .and_then(|p| IpInterface::new(addr, p))
            .ok_or_else(|| InterfaceParseError::Prefix(prefix.to_string()))
    }
}

impl fmt::Display for IpInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

// -------------------------------- Display --------------------------------- //

/// Floats always carry a decimal point so they read back as floats.
pub(crate) fn fmt_float(x: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x}")
    }
}

fn fmt_items<'a>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = &'a Value>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => fmt_float(x.0, f),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "b\"{}\"", b.escape_ascii()),
            Value::List(xs) => {
                f.write_str("[")?;
                fmt_items(f, xs.iter())?;
                f.write_str("]")
            }
            Value::Tuple(xs) => {
                f.write_str("(")?;
                fmt_items(f, xs.iter())?;
                if xs.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Set(xs) if xs.is_empty() => f.write_str("set()"),
            Value::Set(xs) => {
                f.write_str("{")?;
                fmt_items(f, xs.iter())?;
                f.write_str("}")
            }
            Value::FrozenSet(xs) => {
                f.write_str("frozenset({")?;
                fmt_items(f, xs.iter())?;
                f.write_str("})")
            }
            Value::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Member(m) => write!(f, "{}.{}", m.enumeration(), m.name()),
            Value::Record(r) => {
                write!(f, "{}(", r.name())?;
                for (i, (name, v)) in r.fields().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={v}")?;
                }
                f.write_str(")")
            }
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Ip(ip) => write!(f, "{ip}"),
            Value::Interface(i) => write!(f, "{i}"),
        }
    }
}

// --------------------------------- Tests ---------------------------------- //
