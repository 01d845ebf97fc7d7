//! # Error types
//!
//! One structured [`DecodeError`] covers every decode failure: wrong
//! primitive kind, exhausted union, container element failure, arity
//! mismatch, missing or extra record keys. [`ErrorKind`] tells them apart
//! without splitting the type. Descriptor parsing and schema building have
//! their own errors.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ir::Ty;
use crate::path_de::PathError;
use crate::value::Value;

/// Structured decode failure.
///
/// `path` lists the descriptors traversed from the root to the one at which
/// the mismatch was detected; `location` is the matching trail through the
/// input data.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    kind: ErrorKind,
    // innermost first while unwinding; root first once `finish`ed
    path: Vec<Ty>,
    location: Vec<Locator>,
    actual: Value,
    missing_keys: BTreeSet<String>,
    extra_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Mismatch,
    /// Every member rejected the value; one cause per member, in order.
    Union { causes: Vec<DecodeError> },
    /// Record keys: see `missing_keys` / `extra_keys`.
    Keys,
    Arity { expected: usize, found: usize, variadic: bool },
    /// No rule decodes this descriptor, or it names a record that was
    /// declared but never defined.
    Unrecognized,
    DepthExceeded { limit: usize },
    Extension { rule: String, message: String },
}

/// One step through the input data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Field(String),
    Index(usize),
    /// The key of a map entry.
    Key(String),
    /// The value of a map entry.
    Entry(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Mismatch => f.write_str("type mismatch"),
            ErrorKind::Union { causes } => {
                write!(f, "no union member matched ({} tried)", causes.len())
            }
            ErrorKind::Keys => f.write_str("record keys do not match"),
            ErrorKind::Arity { expected, found, variadic: false } => {
                write!(f, "expected {expected} elements, found {found}")
            }
            ErrorKind::Arity { expected, found, variadic: true } => {
                write!(f, "expected at least {expected} elements, found {found}")
            }
            ErrorKind::Unrecognized => f.write_str("no rule decodes this descriptor"),
            ErrorKind::DepthExceeded { limit } => write!(f, "nesting deeper than {limit}"),
            ErrorKind::Extension { rule, message } => write!(f, "{rule}: {message}"),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Field(name) => write!(f, ".{name}"),
            Locator::Index(i) => write!(f, "[{i}]"),
            Locator::Key(k) => write!(f, "<key {k}>"),
            Locator::Entry(k) => write!(f, "[{k}]"),
        }
    }
}

fn fmt_path(path: &[Ty]) -> String {
    path.iter().map(Ty::to_string).collect::<Vec<_>>().join(" -> ")
}

fn fmt_keys(keys: &BTreeSet<String>) -> String {
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl DecodeError {
    pub fn new(kind: ErrorKind, actual: &Value) -> Self {
        Self {
            kind,
            path: Vec::new(),
            location: Vec::new(),
            actual: actual.clone(),
            missing_keys: BTreeSet::new(),
            extra_keys: BTreeSet::new(),
        }
    }

    pub fn mismatch(actual: &Value) -> Self {
        Self::new(ErrorKind::Mismatch, actual)
    }

    /// Failure reported by an extension rule.
    pub fn extension(rule: &str, message: impl fmt::Display, actual: &Value) -> Self {
        Self::new(
            ErrorKind::Extension { rule: rule.to_string(), message: message.to_string() },
            actual,
        )
    }

    pub(crate) fn keys(
        actual: &Value,
        missing_keys: BTreeSet<String>,
        extra_keys: BTreeSet<String>,
    ) -> Self {
        Self { missing_keys, extra_keys, ..Self::new(ErrorKind::Keys, actual) }
    }

    pub(crate) fn within(mut self, ty: &Ty) -> Self {
        self.path.push(ty.clone());
        self
    }

    pub(crate) fn at(mut self, locator: Locator) -> Self {
        self.location.push(locator);
        self
    }

    /// Put `path` and `location` in root-first order behind the given
    /// prefixes. Union causes get the union's own trail as their prefix.
    pub(crate) fn finish(mut self, path: &[Ty], location: &[Locator]) -> Self {
        self.path.reverse();
        self.path.splice(0..0, path.iter().cloned());
        self.location.reverse();
        self.location.splice(0..0, location.iter().cloned());
        if let ErrorKind::Union { causes } = &mut self.kind {
            let finished = std::mem::take(causes)
                .into_iter()
                .map(|c| c.finish(&self.path, &self.location))
                .collect();
            *causes = finished;
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn path(&self) -> &[Ty] {
        &self.path
    }

    pub fn location(&self) -> &[Locator] {
        &self.location
    }

    /// `$`-rooted rendering of the location, e.g. `$.items[2].name`.
    pub fn location_string(&self) -> String {
        let mut out = String::from("$");
        for step in &self.location {
            out.push_str(&step.to_string());
        }
        out
    }

    pub fn actual(&self) -> &Value {
        &self.actual
    }

    pub fn missing_keys(&self) -> &BTreeSet<String> {
        &self.missing_keys
    }

    pub fn extra_keys(&self) -> &BTreeSet<String> {
        &self.extra_keys
    }

    pub fn causes(&self) -> &[DecodeError] {
        match &self.kind {
            ErrorKind::Union { causes } => causes,
            _ => &[],
        }
    }

    /// Multi-line diagnostic, including nested union causes.
    pub fn report(&self) -> Report<'_> {
        Report { error: self, indent: 0 }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.report().fmt(f)
    }
}

impl std::error::Error for DecodeError {}

pub struct Report<'a> {
    error: &'a DecodeError,
    indent: usize,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pad = " ".repeat(self.indent);
        let e = self.error;
        writeln!(f, "{pad}Reason:       {}", e.kind)?;
        writeln!(f, "{pad}Path:         {}", fmt_path(&e.path))?;
        writeln!(f, "{pad}Location:     {}", e.location_string())?;
        writeln!(f, "{pad}Actual:       {}", e.actual)?;
        writeln!(f, "{pad}Missing Keys: {{{}}}", fmt_keys(&e.missing_keys))?;
        writeln!(f, "{pad}Extra Keys:   {{{}}}", fmt_keys(&e.extra_keys))?;
        for (i, cause) in e.causes().iter().enumerate() {
            writeln!(f, "{pad}  Cause {}:", i + 1)?;
            write!(f, "{}", Report { error: cause, indent: self.indent + 4 })?;
        }
        Ok(())
    }
}

// ------------------------------ Descriptors ------------------------------- //

/// Failure to classify a textual descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: ParseReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseReason {
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("bad literal: {0}")]
    BadLiteral(String),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected `{0}`")]
    UnexpectedToken(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("`{ctor}` takes {expected} argument(s), found {found}")]
    Arity { ctor: String, expected: &'static str, found: usize },
    #[error("`...` is only allowed as the last argument of Tuple")]
    MisplacedEllipsis,
    #[error("nesting deeper than {0}")]
    TooDeep(usize),
}

impl ParseError {
    pub(crate) fn new(offset: usize, reason: ParseReason) -> Self {
        Self { offset, reason }
    }
}

/// Failure to build a schema registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("`{0}` is declared more than once")]
    Duplicate(String),
    #[error("`{0}` is a reserved type name")]
    Reserved(String),
    #[error("record `{record}` declares field `{field}` more than once")]
    DuplicateField { record: String, field: String },
    #[error("record `{record}`, field `{field}`: {source}")]
    FieldType {
        record: String,
        field: String,
        #[source]
        source: ParseError,
    },
    #[error("record `{record}`, field `{field}`: default does not match: {source}")]
    BadDefault {
        record: String,
        field: String,
        #[source]
        source: Box<DecodeError>,
    },
    #[error("schema has no root type")]
    NoRoot,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] PathError),
}
