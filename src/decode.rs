//! Descriptor-directed decoding of plain data.
//!
//! [`Decoder::new`] compiles a descriptor into an immutable node tree once:
//! extension rules are selected per node up front and record field tables
//! are precomputed. Each record definition is compiled into one shared plan,
//! which is how records that refer to themselves stay finite. The tree is
//! then run against any number of values, from any number of threads.
//!
//! The depth limit counts nodes entered while decoding a value, so a
//! recursive record decodes inputs of any reasonable depth and fails with
//! `DepthExceeded` on pathological ones.
//!
//! Errors unwind innermost first. Each node pushes its descriptor, containers
//! push the data locator of the failing child, and the top-level call puts
//! both trails in root-first order.
mod record;
mod tuple;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::error::{DecodeError, ErrorKind, Locator};
use crate::ext::DecodeRule;
use crate::ir::{EnumDef, Primitive, RecordDef, Ty};
use crate::value::Value;

use record::RecordPlan;
use tuple::TuplePlan;

pub const DEFAULT_MAX_DEPTH: usize = 128;

/// How fixed tuples treat a length mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TupleArity {
    /// Fixed tuples need exactly their length, variadic tuples at least
    /// their prefix.
    #[default]
    Exact,
    /// Zip positionally and drop whatever is left over on either side.
    Truncate,
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    strict: bool,
    tuples: TupleArity,
    extensions: Vec<DecodeRule>,
    max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict: true,
            tuples: TupleArity::default(),
            extensions: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DecodeOptions {
    /// Reject record keys that match no field. On by default.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn tuples(mut self, tuples: TupleArity) -> Self {
        self.tuples = tuples;
        self
    }

    /// Append one rule; earlier rules take precedence.
    pub fn extension(mut self, rule: DecodeRule) -> Self {
        self.extensions.push(rule);
        self
    }

    pub fn extensions(mut self, rules: impl IntoIterator<Item = DecodeRule>) -> Self {
        self.extensions.extend(rules);
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn tuple_arity(&self) -> TupleArity {
        self.tuples
    }

    pub fn rules(&self) -> &[DecodeRule] {
        &self.extensions
    }

    pub fn depth_limit(&self) -> usize {
        self.max_depth
    }
}

/// Handed to extension transforms.
pub struct DecodeCtx<'a> {
    options: &'a DecodeOptions,
    depth: usize,
}

impl DecodeCtx<'_> {
    pub fn strict(&self) -> bool {
        self.options.strict
    }

    pub fn options(&self) -> &DecodeOptions {
        self.options
    }

    /// Decode a nested value with the same options, one level deeper.
    pub fn decode(&self, ty: &Ty, value: &Value) -> Result<Value, DecodeError> {
        let (root, records) = Compiler::run(ty, self.options);
        let env = Env { options: self.options, records: &records };
        root.run(value, &env, self.depth + 1)
    }
}

/// Compiled, reusable decoder for one descriptor.
#[derive(Debug)]
pub struct Decoder {
    root: Node,
    records: Vec<RecordPlan>,
    options: DecodeOptions,
}

impl Decoder {
    pub fn new(ty: &Ty, options: DecodeOptions) -> Self {
        let (root, records) = Compiler::run(ty, &options);
        debug!(
            ty = %ty,
            records = records.len(),
            rules = options.extensions.len(),
            strict = options.strict,
            "compiled decoder"
        );
        Self { root, records, options }
    }

    pub fn ty(&self) -> &Ty {
        &self.root.ty
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn decode(&self, value: &Value) -> Result<Value, DecodeError> {
        self.decode_at(value, &[])
    }

    /// Like [`Decoder::decode`], with `path` prefixed to every error path.
    pub fn decode_at(&self, value: &Value, path: &[Ty]) -> Result<Value, DecodeError> {
        let env = Env { options: &self.options, records: &self.records };
        self.root.run(value, &env, 0).map_err(|e| e.finish(path, &[]))
    }
}

/// Decode `value` against `ty`.
pub fn decode(ty: &Ty, value: &Value, options: &DecodeOptions) -> Result<Value, DecodeError> {
    Decoder::new(ty, options.clone()).decode(value)
}

#[derive(Debug)]
struct Node {
    ty: Ty,
    op: Op,
}

#[derive(Debug)]
enum Op {
    Extension(DecodeRule),
    Any,
    Null,
    Literal(IndexSet<Value>),
    Primitive(Primitive),
    Union(Vec<Node>),
    Mapping(Box<Node>, Box<Node>),
    Set { element: Box<Node>, mutable: bool },
    Sequence { element: Box<Node>, mutable: bool },
    Tuple(TuplePlan),
    Enumeration(Arc<EnumDef>),
    /// Index into the decoder's record plans.
    Record(usize),
    /// Domain type no rule claims, or a record declared but never defined.
    Unrecognized,
}

/// What a running node needs besides the value.
struct Env<'a> {
    options: &'a DecodeOptions,
    records: &'a [RecordPlan],
}

/// Compilation state: one plan per record definition, keyed by address.
struct Compiler<'o> {
    options: &'o DecodeOptions,
    records: Vec<RecordPlan>,
    seen: HashMap<*const RecordDef, usize>,
}

impl<'o> Compiler<'o> {
    fn run(ty: &Ty, options: &'o DecodeOptions) -> (Node, Vec<RecordPlan>) {
        let mut compiler = Compiler { options, records: Vec::new(), seen: HashMap::new() };
        let root = compiler.node(ty);
        (root, compiler.records)
    }

    fn node(&mut self, ty: &Ty) -> Node {
        let op = self.op(ty);
        Node { ty: ty.clone(), op }
    }

    fn op(&mut self, ty: &Ty) -> Op {
        if let Some(rule) = self.options.extensions.iter().find(|r| r.claims(ty)) {
            return Op::Extension(rule.clone());
        }
        match ty {
            Ty::Any => Op::Any,
            Ty::None => Op::Null,
            Ty::Primitive(p) => Op::Primitive(*p),
            Ty::Literal(values) => Op::Literal(values.clone()),
            Ty::Union(members) => Op::Union(members.iter().map(|m| self.node(m)).collect()),
            Ty::Mapping { key, value, .. } => {
                Op::Mapping(Box::new(self.node(key)), Box::new(self.node(value)))
            }
            Ty::Set { element, mutable } => {
                Op::Set { element: Box::new(self.node(element)), mutable: *mutable }
            }
            Ty::Sequence { element, mutable } => {
                Op::Sequence { element: Box::new(self.node(element)), mutable: *mutable }
            }
            Ty::Tuple { elements, variadic } => {
                let arity = self.options.tuples;
                Op::Tuple(TuplePlan::new(elements, *variadic, arity, |t| self.node(t)))
            }
            Ty::Enumeration(def) => Op::Enumeration(def.clone()),
            Ty::Record(def) => self.record(def),
            Ty::Named(_) => Op::Unrecognized,
        }
    }

    /// The plan is registered before its fields are compiled, so a field
    /// naming the record, directly or through other records, finds it.
    fn record(&mut self, def: &Arc<RecordDef>) -> Op {
        if !def.is_defined() {
            return Op::Unrecognized;
        }
        let key = Arc::as_ptr(def);
        if let Some(&index) = self.seen.get(&key) {
            return Op::Record(index);
        }
        let index = self.records.len();
        self.seen.insert(key, index);
        self.records.push(RecordPlan::new(def));
        let fields = def.fields().iter().map(|f| self.node(&f.ty)).collect();
        self.records[index].set_fields(fields);
        Op::Record(index)
    }
}

impl Node {
    fn run(&self, value: &Value, env: &Env<'_>, depth: usize) -> Result<Value, DecodeError> {
        self.eval(value, env, depth).map_err(|e| e.within(&self.ty))
    }

    fn eval(&self, value: &Value, env: &Env<'_>, depth: usize) -> Result<Value, DecodeError> {
        let options = env.options;
        if depth > options.max_depth {
            let kind = ErrorKind::DepthExceeded { limit: options.max_depth };
            return Err(DecodeError::new(kind, value));
        }
        let next = depth + 1;
        match &self.op {
            Op::Extension(rule) => {
                let ctx = DecodeCtx { options, depth };
                rule.apply(&self.ty, value, &ctx)
            }
            Op::Any => Ok(value.clone()),
            Op::Null if value.is_null() => Ok(Value::Null),
            Op::Literal(allowed) if allowed.contains(value) => Ok(value.clone()),
            Op::Null | Op::Literal(_) => Err(DecodeError::mismatch(value)),
            Op::Primitive(p) => primitive(*p, value),
            Op::Union(members) => {
                let mut causes = Vec::with_capacity(members.len());
                for member in members {
                    match member.run(value, env, next) {
                        Ok(decoded) => return Ok(decoded),
                        Err(e) => {
                            trace!(member = %member.ty, reason = %e.kind(), "union member rejected value");
                            causes.push(e);
                        }
                    }
                }
                Err(DecodeError::new(ErrorKind::Union { causes }, value))
            }
            Op::Mapping(key_node, value_node) => {
                let Value::Map(map) = value else {
                    return Err(DecodeError::mismatch(value));
                };
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    let label = key_label(k);
                    let k = key_node.run(k, env, next).map_err(|e| e.at(Locator::Key(label.clone())))?;
                    let v = value_node.run(v, env, next).map_err(|e| e.at(Locator::Entry(label)))?;
                    out.insert(k, v);
                }
                Ok(Value::Map(out))
            }
            Op::Set { element, mutable } => {
                let items = value.elements().ok_or_else(|| DecodeError::mismatch(value))?;
                let mut out = IndexSet::new();
                for (i, item) in items.enumerate() {
                    out.insert(element.run(item, env, next).map_err(|e| e.at(Locator::Index(i)))?);
                }
                Ok(if *mutable { Value::Set(out) } else { Value::FrozenSet(out) })
            }
            Op::Sequence { element, mutable } => {
                let items = value.elements().ok_or_else(|| DecodeError::mismatch(value))?;
                let mut out = Vec::new();
                for (i, item) in items.enumerate() {
                    out.push(element.run(item, env, next).map_err(|e| e.at(Locator::Index(i)))?);
                }
                Ok(if *mutable { Value::List(out) } else { Value::Tuple(out) })
            }
            Op::Tuple(plan) => plan.run(value, env, next),
            Op::Enumeration(def) => value
                .as_str()
                .and_then(|name| def.member(name))
                .map(|member| Value::Member(member.clone()))
                .ok_or_else(|| DecodeError::mismatch(value)),
            Op::Record(index) => env.records[*index].run(value, env, next),
            Op::Unrecognized => Err(DecodeError::new(ErrorKind::Unrecognized, value)),
        }
    }
}

/// Kind check; bool is never an int and only float widens (from int, when
/// the int has an exact float).
fn primitive(p: Primitive, value: &Value) -> Result<Value, DecodeError> {
    match (p, value) {
        (Primitive::Bool, Value::Bool(_))
        | (Primitive::Int, Value::Int(_))
        | (Primitive::Float, Value::Float(_))
        | (Primitive::Str, Value::Str(_))
        | (Primitive::Bytes, Value::Bytes(_)) => Ok(value.clone()),
        // i128 so that i64::MAX, which rounds up to 2^63, does not saturate back
        (Primitive::Float, Value::Int(i)) if (*i as f64) as i128 == i128::from(*i) => {
            Ok(Value::from(*i as f64))
        }
        _ => Err(DecodeError::mismatch(value)),
    }
}

/// How a map key shows up in locators and key sets.
fn key_label(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(ty: &Ty, json: serde_json::Value) -> Result<Value, DecodeError> {
        decode(ty, &Value::from(json), &DecodeOptions::default())
    }

    #[test]
    fn union_tries_members_in_order() {
        let ty = Ty::union([Ty::INT, Ty::STR]);
        assert_eq!(run(&ty, json!("a")).unwrap(), Value::from("a"));
        assert_eq!(run(&ty, json!(5)).unwrap(), Value::Int(5));

        // float widens ints, so order decides what an int becomes
        let ty = Ty::union([Ty::FLOAT, Ty::INT]);
        assert_eq!(run(&ty, json!(5)).unwrap(), Value::from(5.0));
        let ty = Ty::union([Ty::INT, Ty::FLOAT]);
        assert_eq!(run(&ty, json!(5)).unwrap(), Value::Int(5));
    }

    #[test]
    fn exhausted_union_keeps_every_cause() {
        let ty = Ty::union([Ty::INT, Ty::list(Ty::STR)]);
        let err = run(&ty, json!([1])).unwrap_err();
        assert_eq!(err.path(), &[ty.clone()]);
        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[0].path(), &[ty.clone(), Ty::INT]);
        assert_eq!(causes[1].path(), &[ty.clone(), Ty::list(Ty::STR), Ty::STR]);
        assert_eq!(causes[1].location_string(), "$[0]");
    }

    #[test]
    fn primitives_do_not_coerce() {
        assert!(run(&Ty::INT, json!(true)).is_err());
        assert!(run(&Ty::BOOL, json!(1)).is_err());
        assert!(run(&Ty::INT, json!(1.5)).is_err());
        assert!(run(&Ty::STR, json!(5)).is_err());
        assert_eq!(run(&Ty::None, json!(null)).unwrap(), Value::Null);
        assert!(run(&Ty::None, json!(0)).is_err());
        assert_eq!(run(&Ty::Any, json!({"a": [1]})).unwrap(), Value::from(json!({"a": [1]})));
    }

    #[test]
    fn literal_is_exact_membership() {
        let ty = Ty::literal([Value::Int(5), Value::from("x")]);
        assert_eq!(run(&ty, json!(5)).unwrap(), Value::Int(5));
        assert!(run(&ty, json!("5")).is_err());
        assert!(run(&ty, json!(5.0)).is_err());
        assert!(run(&Ty::literal([Value::Int(1)]), json!(true)).is_err());
    }

    #[test]
    fn containers_materialize_by_mutability() {
        let input = json!([1, 2, 2]);
        assert_eq!(run(&Ty::list(Ty::INT), input.clone()).unwrap(), Value::list([1, 2, 2]));
        assert_eq!(run(&Ty::sequence(Ty::INT), input.clone()).unwrap(), Value::tuple([1, 2, 2]));
        let Value::FrozenSet(s) = run(&Ty::frozenset(Ty::INT), input.clone()).unwrap() else {
            panic!("not a frozenset")
        };
        assert_eq!(s.len(), 2);
        assert!(matches!(run(&Ty::set(Ty::INT), input).unwrap(), Value::Set(_)));
        assert!(run(&Ty::list(Ty::STR), json!("abc")).is_err());
    }

    #[test]
    fn mapping_failures_locate_key_or_value() {
        let ty = Ty::dict(Ty::STR, Ty::list(Ty::INT));
        let err = run(&ty, json!({"a": [1], "b": [2, "x"]})).unwrap_err();
        assert_eq!(err.location_string(), "$[b][1]");
        assert_eq!(err.path(), &[ty.clone(), Ty::list(Ty::INT), Ty::INT]);
        assert_eq!(err.actual(), &Value::from("x"));

        let ty = Ty::mapping(Ty::literal([Value::from("k")]), Ty::Any);
        let err = run(&ty, json!({"k": 1, "z": 2})).unwrap_err();
        assert_eq!(err.location(), &[Locator::Key("z".into())]);
    }

    #[test]
    fn enumeration_decodes_by_member_name() {
        let color = Arc::new(EnumDef::new("Color", [("red", 1), ("green", 2)]));
        let ty = Ty::Enumeration(color.clone());
        let Value::Member(m) = run(&ty, json!("green")).unwrap() else { panic!("not a member") };
        assert_eq!((m.name(), m.constant()), ("green", &Value::Int(2)));
        assert!(run(&ty, json!(2)).is_err());
        assert!(run(&ty, json!("blue")).is_err());
    }

    #[test]
    fn named_without_rule_is_unrecognized() {
        let err = run(&Ty::named("uuid"), json!("x")).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Unrecognized);
    }

    #[test]
    fn depth_limit_is_an_error() {
        let ty = Ty::list(Ty::list(Ty::list(Ty::INT)));
        let options = DecodeOptions::default().max_depth(2);
        let err = decode(&ty, &Value::from(json!([[[1]]])), &options).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DepthExceeded { limit: 2 });
        assert_eq!(err.location_string(), "$[0][0][0]");
        // the over-deep node only fails when reached
        assert!(decode(&ty, &Value::from(json!([[]])), &options).is_ok());
    }

    #[test]
    fn float_only_widens_exact_ints() {
        let exact = 1_i64 << 53;
        assert_eq!(run(&Ty::FLOAT, json!(exact)).unwrap(), Value::from(exact as f64));
        assert!(run(&Ty::FLOAT, json!(exact + 1)).is_err());
        assert!(run(&Ty::FLOAT, json!(i64::MAX)).is_err());
        assert_eq!(run(&Ty::FLOAT, json!(-3)).unwrap(), Value::from(-3.0));
    }

    fn linked_list() -> Ty {
        let schema = crate::schema::Schema::builder()
            .record(
                "Node",
                [
                    crate::schema::FieldSpec::required("value", "int"),
                    crate::schema::FieldSpec::optional("next", "Optional[Node]", json!(null)),
                ],
            )
            .build()
            .unwrap();
        schema.parse("Node").unwrap()
    }

    #[test]
    fn self_referencing_records_decode() {
        let input = json!({"value": 1, "next": {"value": 2, "next": {"value": 3}}});
        let Value::Record(first) = run(&linked_list(), input).unwrap() else { panic!("not a record") };
        let Some(Value::Record(second)) = first.get("next") else { panic!("no second node") };
        let Some(Value::Record(third)) = second.get("next") else { panic!("no third node") };
        assert_eq!(third.get("value"), Some(&Value::Int(3)));
        assert_eq!(third.get("next"), Some(&Value::Null));

        let err = run(&linked_list(), json!({"value": 1, "next": {"value": "two"}})).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Union { .. }));
        assert_eq!(err.location_string(), "$.next");
    }

    #[test]
    fn deep_input_hits_the_depth_limit() {
        let schema = crate::schema::Schema::builder()
            .record("Tree", [crate::schema::FieldSpec::optional("children", "List[Tree]", json!([]))])
            .build()
            .unwrap();
        let tree = schema.parse("Tree").unwrap();
        let nest = |levels: usize| {
            (0..levels).fold(json!({}), |inner, _| json!({"children": [inner]}))
        };
        let options = DecodeOptions::default().max_depth(20);
        // a tree level is a record node plus a list node
        assert!(decode(&tree, &Value::from(nest(9)), &options).is_ok());
        let err = decode(&tree, &Value::from(nest(30)), &options).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DepthExceeded { limit: 20 });
        assert!(err.location_string().starts_with("$.children[0].children[0]"));

        let err = run(&tree, nest(500)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DepthExceeded { limit: DEFAULT_MAX_DEPTH });
    }

    #[test]
    fn record_plans_are_compiled_once_per_definition() {
        // every level names the next one twice
        let mut ty = Ty::Record(Arc::new(crate::ir::RecordDef::new(
            "R40",
            vec![crate::ir::FieldDef::required("x", Ty::INT)],
        )));
        for i in (0..40).rev() {
            ty = Ty::Record(Arc::new(crate::ir::RecordDef::new(
                format!("R{i}"),
                vec![
                    crate::ir::FieldDef::required("a", ty.clone()),
                    crate::ir::FieldDef::required("b", ty),
                ],
            )));
        }
        let decoder = Decoder::new(&ty, DecodeOptions::default());
        assert_eq!(decoder.records.len(), 41);

        let self_ref = linked_list();
        assert_eq!(Decoder::new(&self_ref, DecodeOptions::default()).records.len(), 1);
    }

    #[test]
    fn decode_at_prefixes_the_path() {
        let decoder = Decoder::new(&Ty::INT, DecodeOptions::default());
        let err = decoder.decode_at(&Value::from("x"), &[Ty::Any]).unwrap_err();
        assert_eq!(err.path(), &[Ty::Any, Ty::INT]);
    }

    #[test]
    fn decoder_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Decoder>();
        assert_send_sync::<DecodeOptions>();
    }
}
