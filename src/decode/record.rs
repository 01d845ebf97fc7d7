use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{key_label, Env, Node};
use crate::error::{DecodeError, Locator};
use crate::ir::RecordDef;
use crate::value::{Record, Value};

/// Field nodes in declaration order plus a name index.
#[derive(Debug)]
pub(super) struct RecordPlan {
    def: Arc<RecordDef>,
    fields: Vec<Node>,
    index: HashMap<String, usize>,
}

impl RecordPlan {
    /// Field nodes come later through [`RecordPlan::set_fields`], once the
    /// plan can be referred to.
    pub(super) fn new(def: &Arc<RecordDef>) -> Self {
        let index = def.fields().iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        Self { def: def.clone(), fields: Vec::new(), index }
    }

    pub(super) fn set_fields(&mut self, fields: Vec<Node>) {
        debug_assert_eq!(fields.len(), self.def.fields().len());
        self.fields = fields;
    }

    /// `depth` is the depth of the field nodes.
    pub(super) fn run(&self, value: &Value, env: &Env<'_>, depth: usize) -> Result<Value, DecodeError> {
        let options = env.options;
        let Value::Map(map) = value else {
            return Err(DecodeError::mismatch(value));
        };

        let mut present: Vec<Option<&Value>> = vec![None; self.fields.len()];
        let mut extra = BTreeSet::new();
        for (key, item) in map {
            match key.as_str().and_then(|k| self.index.get(k)) {
                Some(&i) => present[i] = Some(item),
                None => {
                    extra.insert(key_label(key));
                }
            }
        }
        let missing: BTreeSet<String> = self
            .def
            .fields()
            .iter()
            .zip(&present)
            .filter(|(field, slot)| slot.is_none() && !field.has_default())
            .map(|(field, _)| field.name.clone())
            .collect();

        if !missing.is_empty() || (options.is_strict() && !extra.is_empty()) {
            return Err(DecodeError::keys(value, missing, extra));
        }

        let mut values = Vec::with_capacity(self.fields.len());
        for ((field, node), slot) in self.def.fields().iter().zip(&self.fields).zip(present) {
            let decoded = match slot {
                Some(item) => node
                    .run(item, env, depth)
                    .map_err(|e| e.at(Locator::Field(field.name.clone())))?,
                // every absent field has a default by now
                None => field.default.clone().unwrap_or(Value::Null),
            };
            values.push(decoded);
        }
        Ok(Value::Record(Record::from_parts(self.def.clone(), values)))
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::{decode, DecodeOptions};
    use crate::error::{DecodeError, ErrorKind};
    use crate::ir::{FieldDef, RecordDef, Ty};
    use crate::value::Value;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn config() -> Ty {
        Ty::Record(Arc::new(RecordDef::new(
            "C",
            vec![
                FieldDef::required("a", Ty::INT),
                FieldDef::required("b", Ty::STR),
                FieldDef::with_default("c", Ty::BOOL, false),
            ],
        )))
    }

    fn run(json: serde_json::Value, strict: bool) -> Result<Value, DecodeError> {
        decode(&config(), &Value::from(json), &DecodeOptions::default().strict(strict))
    }

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn strict_rejects_unknown_keys() {
        let input = json!({"a": 1, "b": "x", "d": 9});
        let err = run(input.clone(), true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Keys);
        assert_eq!(err.extra_keys(), &keys(&["d"]));
        assert!(err.missing_keys().is_empty());

        let Value::Record(r) = run(input, false).unwrap() else { panic!("not a record") };
        assert_eq!(r.get("c"), Some(&Value::Bool(false)));
        assert_eq!(r.fields().count(), 3);
    }

    #[test]
    fn missing_keys_fail_regardless_of_strictness() {
        for strict in [true, false] {
            let err = run(json!({"a": 1}), strict).unwrap_err();
            assert_eq!(err.missing_keys(), &keys(&["b"]));
        }
        let err = run(json!({"a": 1, "z": 0}), true).unwrap_err();
        assert_eq!((err.missing_keys(), err.extra_keys()), (&keys(&["b"]), &keys(&["z"])));
    }

    #[test]
    fn fields_come_out_in_declaration_order() {
        let Value::Record(r) = run(json!({"c": true, "b": "x", "a": 1}), true).unwrap() else {
            panic!("not a record")
        };
        let names: Vec<_> = r.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(r.get("c"), Some(&Value::Bool(true)));
    }

    #[test]
    fn field_failures_are_located_by_name() {
        let err = run(json!({"a": "one", "b": "x"}), true).unwrap_err();
        assert_eq!(err.location_string(), "$.a");
        assert_eq!(err.path(), &[config(), Ty::INT]);
        assert_eq!(err.actual(), &Value::from("one"));
    }

    #[test]
    fn non_maps_are_mismatches() {
        let err = run(json!([1, "x"]), true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Mismatch);
    }
}
