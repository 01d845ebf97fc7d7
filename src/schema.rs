//! Registry of named records, enumerations and domain types.
//!
//! Type expressions in the registry are resolved through [`norm::parse`], so
//! a record field may name anything declared in the same schema, in any
//! order, including the record it belongs to.
use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer};

use crate::decode::{self, DecodeOptions};
use crate::error::{ParseError, SchemaError};
use crate::ext;
use crate::ir::{EnumDef, FieldDef, RecordDef, Ty};
use crate::norm::{self, Resolver};
use crate::path_de;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Schema {
    records: IndexMap<String, Arc<RecordDef>>,
    enums: IndexMap<String, Arc<EnumDef>>,
    types: IndexSet<String>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parse a type expression against the registry.
    pub fn parse(&self, expr: &str) -> Result<Ty, ParseError> {
        norm::parse(expr, &mut Lookup { records: &self.records, enums: &self.enums, types: &self.types })
    }

    pub fn record(&self, name: &str) -> Option<&Arc<RecordDef>> {
        self.records.get(name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&Arc<EnumDef>> {
        self.enums.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<RecordDef>> {
        self.records.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &Arc<EnumDef>> {
        self.enums.values()
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }
}

struct Lookup<'a> {
    records: &'a IndexMap<String, Arc<RecordDef>>,
    enums: &'a IndexMap<String, Arc<EnumDef>>,
    types: &'a IndexSet<String>,
}

impl Resolver for Lookup<'_> {
    type Error = ParseError;

    fn resolve(&mut self, name: &str) -> Result<Option<Ty>, ParseError> {
        Ok(if let Some(def) = self.records.get(name) {
            Some(Ty::Record(def.clone()))
        } else if let Some(def) = self.enums.get(name) {
            Some(Ty::Enumeration(def.clone()))
        } else if self.types.contains(name) {
            Some(Ty::named(name))
        } else {
            None
        })
    }
}

// -------------------------------- Builder --------------------------------- //

/// One record field as declared: a type expression and an optional default
/// in plain data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// `Some(null)` is a `None` default; `None` means required.
    #[serde(default, deserialize_with = "present")]
    pub default: Option<serde_json::Value>,
}

fn present<'de, D: Deserializer<'de>>(de: D) -> Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(de).map(Some)
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self { name: name.into(), ty: ty.into(), default: None }
    }

    pub fn optional(
        name: impl Into<String>,
        ty: impl Into<String>,
        default: serde_json::Value,
    ) -> Self {
        Self { name: name.into(), ty: ty.into(), default: Some(default) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    records: IndexMap<String, Vec<FieldSpec>>,
    enums: IndexMap<String, Vec<(String, Value)>>,
    types: IndexSet<String>,
    duplicate: Option<String>,
}

impl SchemaBuilder {
    fn claim(&mut self, name: &str) {
        let taken = self.records.contains_key(name)
            || self.enums.contains_key(name)
            || self.types.contains(name);
        if taken && self.duplicate.is_none() {
            self.duplicate = Some(name.to_string());
        }
    }

    pub fn record(mut self, name: &str, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.claim(name);
        self.records.insert(name.to_string(), fields.into_iter().collect());
        self
    }

    /// Members in declaration order, each a name and its constant.
    pub fn enumeration<N, V>(mut self, name: &str, members: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
    {
        self.claim(name);
        let members = members.into_iter().map(|(n, v)| (n.into(), v.into())).collect();
        self.enums.insert(name.to_string(), members);
        self
    }

    /// Declare a domain type, decodable only through an extension rule.
    /// Declaring the same domain type twice is harmless.
    pub fn domain_type(mut self, name: &str) -> Self {
        if !self.types.contains(name) {
            self.claim(name);
            self.types.insert(name.to_string());
        }
        self
    }

    /// Pre-declare the domain types handled by [`ext::builtin_decoders`].
    pub fn with_builtin_types(self) -> Self {
        ext::BUILTIN_TYPES.iter().fold(self, |b, name| b.domain_type(name))
    }

    pub fn build(&self) -> Result<Schema, SchemaError> {
        if let Some(name) = &self.duplicate {
            return Err(SchemaError::Duplicate(name.clone()));
        }
        let names = self.records.keys().chain(self.enums.keys()).chain(self.types.iter());
        if let Some(name) = names.into_iter().find(|n| norm::is_reserved(n)) {
            return Err(SchemaError::Reserved(name.clone()));
        }
        for (record, fields) in &self.records {
            let mut seen = IndexSet::new();
            for field in fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        record: record.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        let enums: IndexMap<String, Arc<EnumDef>> = self
            .enums
            .iter()
            .map(|(name, members)| {
                let def = EnumDef::new(name, members.iter().map(|(n, v)| (n.clone(), v.clone())));
                (name.clone(), Arc::new(def))
            })
            .collect();

        // declared first so any field type can name any record
        let records: IndexMap<String, Arc<RecordDef>> = self
            .records
            .keys()
            .map(|name| (name.clone(), Arc::new(RecordDef::declare(name.as_str()))))
            .collect();

        let mut lookup = Lookup { records: &records, enums: &enums, types: &self.types };
        let mut field_types = IndexMap::new();
        for (record, specs) in &self.records {
            let mut tys = Vec::with_capacity(specs.len());
            for spec in specs {
                let ty = norm::parse(&spec.ty, &mut lookup).map_err(|source| SchemaError::FieldType {
                    record: record.clone(),
                    field: spec.name.clone(),
                    source,
                })?;
                tys.push(ty);
            }
            field_types.insert(record.as_str(), tys);
        }

        let mut define = Define { builder: self, records: &records, field_types: &field_types, visiting: Vec::new() };
        for name in self.records.keys() {
            define.record(name)?;
        }

        Ok(Schema { records, enums, types: self.types.clone() })
    }
}

/// Defines declared records depth-first, so that every record a default may
/// be decoded against is complete before the default is. A record still on
/// the `visiting` stack is left undefined for its dependents: defaults that
/// would need it, like a non-null default for `Optional[Self]`, fail.
struct Define<'b> {
    builder: &'b SchemaBuilder,
    records: &'b IndexMap<String, Arc<RecordDef>>,
    field_types: &'b IndexMap<&'b str, Vec<Ty>>,
    visiting: Vec<String>,
}

impl Define<'_> {
    fn record(&mut self, name: &str) -> Result<(), SchemaError> {
        let (records, builder, field_types) = (self.records, self.builder, self.field_types);
        let (Some(def), Some(specs), Some(tys)) =
            (records.get(name), builder.records.get(name), field_types.get(name))
        else {
            return Ok(());
        };
        if def.is_defined() || self.visiting.iter().any(|n| n == name) {
            return Ok(());
        }

        self.visiting.push(name.to_string());
        let mut needed = Vec::new();
        for ty in tys {
            records_named(ty, &mut needed);
        }
        for dependency in needed {
            self.record(&dependency)?;
        }

        let mut fields = Vec::with_capacity(specs.len());
        for (spec, ty) in specs.iter().zip(tys) {
            let default = match &spec.default {
                None => None,
                Some(json) => Some(decode_default(ty, json).map_err(|source| {
                    SchemaError::BadDefault {
                        record: name.to_string(),
                        field: spec.name.clone(),
                        source: Box::new(source),
                    }
                })?),
            };
            fields.push(FieldDef { name: spec.name.clone(), ty: ty.clone(), default });
        }
        self.visiting.pop();
        def.define(fields);
        Ok(())
    }
}

/// Names of the records `ty` mentions, without looking into their fields.
fn records_named(ty: &Ty, out: &mut Vec<String>) {
    match ty {
        Ty::Record(def) => out.push(def.name().to_string()),
        Ty::Union(members) => members.iter().for_each(|m| records_named(m, out)),
        Ty::Tuple { elements, .. } => elements.iter().for_each(|e| records_named(e, out)),
        Ty::Mapping { key, value, .. } => {
            records_named(key, out);
            records_named(value, out);
        }
        Ty::Set { element, .. } | Ty::Sequence { element, .. } => records_named(element, out),
        Ty::Any | Ty::None | Ty::Primitive(_) | Ty::Literal(_) | Ty::Enumeration(_) | Ty::Named(_) => {}
    }
}

fn decode_default(ty: &Ty, json: &serde_json::Value) -> Result<Value, crate::error::DecodeError> {
    let options = DecodeOptions::default()
        .strict(false)
        .extensions(ext::builtin_decoders().iter().cloned());
    decode::decode(ty, &Value::from(json), &options)
}

// ------------------------------- On disk ---------------------------------- //

/// JSON form of a schema.
///
/// ```json
/// {
///   "records": { "Point": [ {"name": "x", "type": "int"},
///                           {"name": "label", "type": "Optional[str]", "default": null} ] },
///   "enums":   { "Color": { "red": 1, "green": 2 } },
///   "types":   ["uuid"],
///   "root":    "List[Point]"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub records: IndexMap<String, Vec<FieldSpec>>,
    #[serde(default)]
    pub enums: IndexMap<String, IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub root: Option<String>,
}

impl SchemaFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|source| SchemaError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&src)
    }

    pub fn from_json(src: &str) -> Result<Self, SchemaError> {
        Ok(path_de::from_str_with_path(src)?)
    }

    /// Builder holding every declaration of the file plus the built-in
    /// domain types.
    pub fn builder(&self) -> SchemaBuilder {
        let mut builder = Schema::builder().with_builtin_types();
        for name in &self.types {
            builder = builder.domain_type(name);
        }
        for (name, members) in &self.enums {
            builder = builder.enumeration(name, members.iter().map(|(n, v)| (n.clone(), Value::from(v))));
        }
        for (name, fields) in &self.records {
            builder = builder.record(name, fields.iter().cloned());
        }
        builder
    }

    pub fn build(&self) -> Result<Schema, SchemaError> {
        self.builder().build()
    }

    /// The root descriptor, resolved against `schema`.
    pub fn root(&self, schema: &Schema) -> Result<Ty, SchemaError> {
        let expr = self.root.as_deref().ok_or(SchemaError::NoRoot)?;
        Ok(schema.parse(expr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn forward_references_resolve() {
        let schema = Schema::builder()
            .record("Line", [FieldSpec::required("a", "Point"), FieldSpec::required("b", "Point")])
            .record("Point", [FieldSpec::required("x", "int"), FieldSpec::required("c", "Color")])
            .enumeration("Color", [("red", 1), ("green", 2)])
            .build()
            .unwrap();

        let line = schema.record("Line").unwrap();
        let Ty::Record(point) = &line.fields()[0].ty else { panic!("not a record") };
        assert_eq!(point.name(), "Point");
        assert!(Arc::ptr_eq(point, schema.record("Point").unwrap()));
        let names: Vec<_> = schema.records().map(|r| r.name()).collect();
        assert_eq!(names, vec!["Line", "Point"]);
    }

    #[test]
    fn records_may_refer_to_themselves() {
        let schema = Schema::builder()
            .record("Node", [FieldSpec::required("value", "int"), FieldSpec::optional("next", "Optional[Node]", json!(null))])
            .build()
            .unwrap();
        let node = schema.record("Node").unwrap();
        assert!(node.is_defined());
        let Ty::Union(members) = &node.fields()[1].ty else { panic!("not a union") };
        let Ty::Record(next) = &members[0] else { panic!("not a record") };
        assert!(Arc::ptr_eq(next, node));
        assert_eq!(node.fields()[1].default, Some(Value::Null));
    }

    #[test]
    fn mutually_recursive_records_resolve() {
        let schema = Schema::builder()
            .record("A", [FieldSpec::required("b", "Optional[B]")])
            .record("B", [FieldSpec::optional("a", "List[A]", json!([]))])
            .build()
            .unwrap();
        let (a, b) = (schema.record("A").unwrap(), schema.record("B").unwrap());
        assert!(a.is_defined() && b.is_defined());
        assert_eq!(b.fields()[0].default, Some(Value::List(vec![])));
        assert_eq!(a.fields()[0].ty.to_string(), "Optional[B]");
    }

    #[test]
    fn defaults_that_need_their_own_record_fail() {
        let err = Schema::builder()
            .record("Node", [FieldSpec::optional("next", "Optional[Node]", json!({}))])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BadDefault { field, .. } if field == "next"));
    }

    #[test]
    fn defaults_see_records_declared_later() {
        let schema = Schema::builder()
            .record("Line", [FieldSpec::optional("start", "Point", json!({"x": 1}))])
            .record("Point", [FieldSpec::required("x", "int"), FieldSpec::optional("y", "int", json!(0))])
            .build()
            .unwrap();
        let line = schema.record("Line").unwrap();
        let Some(Value::Record(start)) = &line.fields()[0].default else { panic!("not a record") };
        assert_eq!(start.get("y"), Some(&Value::Int(0)));
    }

    #[test]
    fn duplicate_and_reserved_names() {
        let err = Schema::builder().record("X", []).enumeration("X", [("a", 1)]).build().unwrap_err();
        assert!(matches!(err, SchemaError::Duplicate(n) if n == "X"));

        let err = Schema::builder().record("List", []).build().unwrap_err();
        assert!(matches!(err, SchemaError::Reserved(n) if n == "List"));

        let err = Schema::builder()
            .record("R", [FieldSpec::required("a", "int"), FieldSpec::required("a", "str")])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn bad_field_types_name_the_field() {
        let err = Schema::builder()
            .record("R", [FieldSpec::required("a", "List[Nope]")])
            .build()
            .unwrap_err();
        match err {
            SchemaError::FieldType { record, field, source } => {
                assert_eq!((record.as_str(), field.as_str()), ("R", "a"));
                assert_eq!(source.offset, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn defaults_are_decoded_against_the_field_type() {
        let schema = Schema::builder()
            .enumeration("Color", [("red", "#f00")])
            .record(
                "Pen",
                [
                    FieldSpec::optional("color", "Color", json!("red")),
                    FieldSpec::optional("width", "float", json!(1)),
                    FieldSpec::optional("label", "Optional[str]", json!(null)),
                ],
            )
            .build()
            .unwrap();
        let pen = schema.record("Pen").unwrap();
        let Some(Value::Member(m)) = &pen.fields()[0].default else { panic!("not a member") };
        assert_eq!(m.name(), "red");
        assert_eq!(pen.fields()[1].default, Some(Value::from(1.0)));
        assert_eq!(pen.fields()[2].default, Some(Value::Null));

        let err = Schema::builder()
            .record("R", [FieldSpec::optional("n", "int", json!("x"))])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BadDefault { .. }));
    }

    #[test]
    fn schema_file_builds_with_builtin_types() {
        let file = SchemaFile::from_json(
            r#"{
                "records": {"Host": [{"name": "id", "type": "uuid"},
                                     {"name": "addr", "type": "ip_address"},
                                     {"name": "tags", "type": "FrozenSet[str]", "default": []}]},
                "root": "List[Host]"
            }"#,
        )
        .unwrap();
        let schema = file.build().unwrap();
        let root = file.root(&schema).unwrap();
        assert_eq!(root.to_string(), "List[Host]");
        assert_eq!(schema.parse("uuid").unwrap(), Ty::named("uuid"));
    }

    #[test]
    fn schema_file_errors_carry_the_json_path() {
        let err = SchemaFile::from_json(r#"{"records": {"R": [{"name": "a", "typ": "int"}]}}"#)
            .unwrap_err();
        let SchemaError::Json(e) = err else { panic!("not a json error") };
        assert!(e.path.starts_with("records.R[0]"), "{}", e.path);
    }
}
