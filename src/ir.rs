// Type descriptor IR. Pure data consumed by the normalizer, decoder and encoder.

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::{IndexMap, IndexSet};

use crate::value::{Member, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int,
    /// Also accepts ints that convert to a float exactly; larger ints that
    /// would round are rejected.
    Float,
    Str,
    Bytes,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Str => "str",
            Primitive::Bytes => "bytes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Primitive::Bool,
            "int" => Primitive::Int,
            "float" => Primitive::Float,
            "str" => Primitive::Str,
            "bytes" => Primitive::Bytes,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Any,
    None,
    Primitive(Primitive),
    Union(Vec<Ty>),          // ordered choice
    Literal(IndexSet<Value>), // scalars only
    Mapping {
        key: Box<Ty>,
        value: Box<Ty>,
        mutable: bool,
    },
    Set {
        element: Box<Ty>,
        mutable: bool,
    },
    Sequence {
        element: Box<Ty>,
        mutable: bool,
    },
    Tuple {
        elements: Vec<Ty>,
        variadic: bool,      // last element repeats
    },
    Enumeration(Arc<EnumDef>),
    Record(Arc<RecordDef>),
    Named(String),           // domain type, decodable only through extensions
}

impl Ty {
    pub const BOOL: Ty = Ty::Primitive(Primitive::Bool);
    pub const INT: Ty = Ty::Primitive(Primitive::Int);
    pub const FLOAT: Ty = Ty::Primitive(Primitive::Float);
    pub const STR: Ty = Ty::Primitive(Primitive::Str);
    pub const BYTES: Ty = Ty::Primitive(Primitive::Bytes);

    /// Union with nested unions flattened and duplicates dropped. A single
    /// surviving member is returned as is.
    pub fn union(members: impl IntoIterator<Item = Ty>) -> Ty {
        let mut flat: Vec<Ty> = Vec::new();
        for member in members {
            let parts = match member {
                Ty::Union(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                if !flat.contains(&part) {
                    flat.push(part);
                }
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Ty::Union(flat)
        }
    }

    pub fn optional(inner: Ty) -> Ty {
        Ty::union([inner, Ty::None])
    }

    pub fn literal(values: impl IntoIterator<Item = Value>) -> Ty {
        Ty::Literal(values.into_iter().collect())
    }

    pub fn mapping(key: Ty, value: Ty) -> Ty {
        Ty::Mapping { key: Box::new(key), value: Box::new(value), mutable: false }
    }

    pub fn dict(key: Ty, value: Ty) -> Ty {
        Ty::Mapping { key: Box::new(key), value: Box::new(value), mutable: true }
    }

    pub fn sequence(element: Ty) -> Ty {
        Ty::Sequence { element: Box::new(element), mutable: false }
    }

    pub fn list(element: Ty) -> Ty {
        Ty::Sequence { element: Box::new(element), mutable: true }
    }

    pub fn frozenset(element: Ty) -> Ty {
        Ty::Set { element: Box::new(element), mutable: false }
    }

    pub fn set(element: Ty) -> Ty {
        Ty::Set { element: Box::new(element), mutable: true }
    }

    pub fn tuple(elements: impl IntoIterator<Item = Ty>) -> Ty {
        Ty::Tuple { elements: elements.into_iter().collect(), variadic: false }
    }

    /// Tuple whose last element repeats for every remaining position. With
    /// no elements there is nothing to repeat and this is the empty tuple.
    pub fn variadic(elements: impl IntoIterator<Item = Ty>) -> Ty {
        let elements: Vec<Ty> = elements.into_iter().collect();
        let variadic = !elements.is_empty();
        Ty::Tuple { elements, variadic }
    }

    pub fn named(name: impl Into<String>) -> Ty {
        Ty::Named(name.into())
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, Ty::Named(n) if n == name)
    }
}

// ------------------------------ Enumerations ------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    name: Arc<str>,
    members: IndexMap<String, Member>,
}

impl EnumDef {
    pub fn new<N, V>(name: &str, members: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
    {
        let name: Arc<str> = Arc::from(name);
        let members = members
            .into_iter()
            .map(|(n, v)| {
                let n = n.into();
                let member = Member::new(name.clone(), &n, v.into());
                (n, member)
            })
            .collect();
        Self { name, members }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup by declared name, never by constant.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }
}

// -------------------------------- Records --------------------------------- //

/// A record type. Fields live in a fill-once slot so that a record can be
/// declared first and defined once its field types, which may name the
/// record itself, are resolved.
#[derive(Clone)]
pub struct RecordDef {
    name: String,
    fields: OnceLock<Vec<FieldDef>>, // declaration order
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
    pub default: Option<Value>,  // None => required
}

impl FieldDef {
    pub fn required(name: impl Into<String>, ty: Ty) -> Self {
        Self { name: name.into(), ty, default: None }
    }

    pub fn with_default(name: impl Into<String>, ty: Ty, default: impl Into<Value>) -> Self {
        Self { name: name.into(), ty, default: Some(default.into()) }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

impl RecordDef {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self { name: name.into(), fields: OnceLock::from(fields) }
    }

    /// A record without fields yet; see [`RecordDef::define`].
    pub fn declare(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: OnceLock::new() }
    }

    /// Set the fields of a declared record. Returns `false`, leaving the
    /// record as it was, if it is already defined.
    pub fn define(&self, fields: Vec<FieldDef>) -> bool {
        self.fields.set(fields).is_ok()
    }

    pub fn is_defined(&self) -> bool {
        self.fields.get().is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty until the record is defined.
    pub fn fields(&self) -> &[FieldDef] {
        self.fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields().iter().filter(|f| !f.has_default())
    }
}

/// Field types compare records they name by name only, so a record that
/// reaches itself through its fields still compares in finite time.
impl PartialEq for RecordDef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || (self.name == other.name
                && self.fields().len() == other.fields().len()
                && self.fields().iter().zip(other.fields()).all(|(a, b)| {
                    a.name == b.name && a.default == b.default && nominal_eq(&a.ty, &b.ty)
                }))
    }
}

impl Eq for RecordDef {}

fn nominal_eq(a: &Ty, b: &Ty) -> bool {
    let all = |xs: &[Ty], ys: &[Ty]| xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| nominal_eq(x, y));
    match (a, b) {
        (Ty::Record(x), Ty::Record(y)) => x.name() == y.name(),
        (Ty::Union(xs), Ty::Union(ys)) => all(xs, ys),
        (Ty::Tuple { elements: xs, variadic: v }, Ty::Tuple { elements: ys, variadic: w }) => {
            v == w && all(xs, ys)
        }
        (
            Ty::Mapping { key: k1, value: v1, mutable: m1 },
            Ty::Mapping { key: k2, value: v2, mutable: m2 },
        ) => m1 == m2 && nominal_eq(k1, k2) && nominal_eq(v1, v2),
        (Ty::Set { element: x, mutable: m }, Ty::Set { element: y, mutable: n })
        | (Ty::Sequence { element: x, mutable: m }, Ty::Sequence { element: y, mutable: n }) => {
            m == n && nominal_eq(x, y)
        }
        _ => a == b,
    }
}

/// Field types are shown in descriptor syntax, which names records instead
/// of expanding them.
impl fmt::Debug for RecordDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<(&str, String)> =
            self.fields().iter().map(|fd| (fd.name.as_str(), fd.ty.to_string())).collect();
        f.debug_struct("RecordDef")
            .field("name", &self.name)
            .field("defined", &self.is_defined())
            .field("fields", &fields)
            .finish()
    }
}

// -------------------------------- Display --------------------------------- //

fn fmt_list(f: &mut fmt::Formatter<'_>, items: &[Ty]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Prints the descriptor in the type grammar accepted by [`crate::norm`].
/// Descriptors made through the constructors print text that parses back to
/// an equal descriptor. Variants built by hand may not: a one-member
/// `Ty::Union(vec![x])` prints as `Union[x]`, which parses as `x`.
impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => f.write_str("Any"),
            Ty::None => f.write_str("None"),
            Ty::Primitive(p) => f.write_str(p.name()),
            Ty::Union(members) => match members.as_slice() {
                [inner, Ty::None] => write!(f, "Optional[{inner}]"),
                _ => {
                    f.write_str("Union[")?;
                    fmt_list(f, members)?;
                    f.write_str("]")
                }
            },
            Ty::Literal(values) => {
                f.write_str("Literal[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Ty::Mapping { key, value, mutable } => {
                let ctor = if *mutable { "Dict" } else { "Mapping" };
                write!(f, "{ctor}[{key}, {value}]")
            }
            Ty::Set { element, mutable } => {
                let ctor = if *mutable { "Set" } else { "FrozenSet" };
                write!(f, "{ctor}[{element}]")
            }
            Ty::Sequence { element, mutable } => {
                let ctor = if *mutable { "List" } else { "Sequence" };
                write!(f, "{ctor}[{element}]")
            }
            Ty::Tuple { elements, variadic } => {
                f.write_str("Tuple[")?;
                fmt_list(f, elements)?;
                if *variadic && !elements.is_empty() {
                    f.write_str(", ...")?;
                }
                f.write_str("]")
            }
            Ty::Enumeration(def) => f.write_str(def.name()),
            Ty::Record(def) => f.write_str(def.name()),
            Ty::Named(name) => f.write_str(name),
        }
    }
}
