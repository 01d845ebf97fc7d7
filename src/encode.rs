//! Lowering of shaped values back into plain data.
use tracing::warn;

use crate::decode::DEFAULT_MAX_DEPTH;
use crate::ext::EncodeRule;
use crate::value::{Shape, Value};

/// Handed to encode transforms.
pub struct EncodeCtx<'a> {
    encoder: &'a Encoder,
    depth: usize,
}

impl EncodeCtx<'_> {
    /// Encode a nested value with the same rules, one level deeper.
    pub fn encode(&self, value: &Value) -> Value {
        self.encoder.encode_at(value, self.depth + 1)
    }
}

#[derive(Debug, Clone)]
pub struct Encoder {
    rules: Vec<EncodeRule>,
    max_depth: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Encoder {
    pub fn new(rules: impl IntoIterator<Item = EncodeRule>) -> Self {
        Self { rules: rules.into_iter().collect(), max_depth: DEFAULT_MAX_DEPTH }
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn rules(&self) -> &[EncodeRule] {
        &self.rules
    }

    /// Never fails: values no rule claims and that have no structure are
    /// returned as they are.
    pub fn encode(&self, value: &Value) -> Value {
        self.encode_at(value, 0)
    }

    fn encode_at(&self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            warn!(limit = self.max_depth, kind = value.kind(), "encode depth limit hit, leaving subtree as is");
            return value.clone();
        }
        if let Some(rule) = self.rules.iter().find(|r| r.claims(value)) {
            return rule.apply(value, &EncodeCtx { encoder: self, depth });
        }
        let next = depth + 1;
        match value.shape() {
            Shape::Map(map) => Value::Map(
                map.iter().map(|(k, v)| (self.encode_at(k, next), self.encode_at(v, next))).collect(),
            ),
            Shape::Iterable(items) => Value::List(items.map(|item| self.encode_at(item, next)).collect()),
            Shape::Member(member) => Value::from(member.name()),
            Shape::Record(record) => Value::Map(
                record.fields().map(|(name, v)| (Value::from(name), self.encode_at(v, next))).collect(),
            ),
            Shape::Scalar(leaf) => leaf.clone(),
        }
    }
}

pub fn encode(value: &Value, rules: &[EncodeRule]) -> Value {
    Encoder::new(rules.iter().cloned()).encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::ext::{builtin_decoders, builtin_encoders};
    use crate::ir::{EnumDef, FieldDef, RecordDef, Ty};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn iterables_become_lists() {
        let set = Value::FrozenSet([Value::Int(1), Value::Int(2)].into_iter().collect());
        assert_eq!(encode(&set, &[]), Value::list([1, 2]));
        assert_eq!(encode(&Value::tuple([Value::tuple([1])]), &[]), Value::list([Value::list([1])]));
        assert_eq!(encode(&Value::from("abc"), &[]), Value::from("abc"));
    }

    #[test]
    fn records_and_members_lower_to_plain_data() {
        let color = Arc::new(EnumDef::new("Color", [("red", 1)]));
        let pen = Arc::new(RecordDef::new(
            "Pen",
            vec![
                FieldDef::required("color", Ty::Enumeration(color)),
                FieldDef::with_default("tags", Ty::frozenset(Ty::STR), Value::FrozenSet(Default::default())),
            ],
        ));
        let input = json!({"color": "red"});
        let decoded = decode(&Ty::Record(pen), &Value::from(input), &DecodeOptions::default()).unwrap();
        let out = encode(&decoded, &[]).to_json().unwrap();
        assert_eq!(out, json!({"color": "red", "tags": []}));
    }

    #[test]
    fn decode_then_encode_round_trips_plain_input() {
        let ty = Ty::dict(
            Ty::STR,
            Ty::list(Ty::union([Ty::named("uuid"), Ty::variadic([Ty::INT]), Ty::None])),
        );
        let input = json!({"a": ["67e55044-10b1-426f-9247-bb680e5fe0c8", [1, 2], null]});
        let options = DecodeOptions::default().extensions(builtin_decoders().iter().cloned());
        let decoded = decode(&ty, &Value::from(&input), &options).unwrap();
        assert_eq!(encode(&decoded, builtin_encoders()).to_json().unwrap(), input);
    }

    #[test]
    fn rules_take_precedence_and_can_recurse() {
        let wrap = EncodeRule::new(
            "wrap",
            |v| matches!(v, Value::Tuple(_)),
            |v, ctx| Value::map([("tuple", ctx.encode(&Value::List(v.as_seq().unwrap_or(&[]).to_vec())))]),
        );
        let out = encode(&Value::tuple([Value::Set([Value::Int(1)].into_iter().collect())]), &[wrap]);
        assert_eq!(out.to_json().unwrap(), json!({"tuple": [[1]]}));
    }

    #[test]
    fn depth_limit_leaves_the_rest_untouched() {
        let deep = Value::tuple([Value::tuple([Value::tuple([1])])]);
        let out = Encoder::default().max_depth(1).encode(&deep);
        assert_eq!(out, Value::list([Value::list([Value::tuple([1])])]));
    }
}
