use super::{Env, Node, TupleArity};
use crate::error::{DecodeError, ErrorKind, Locator};
use crate::ir::Ty;
use crate::value::Value;

/// Positional prefix, plus the repeating element of a variadic tuple.
#[derive(Debug)]
pub(super) struct TuplePlan {
    prefix: Vec<Node>,
    rest: Option<Box<Node>>,
    arity: TupleArity,
}

impl TuplePlan {
    pub(super) fn new(
        elements: &[Ty],
        variadic: bool,
        arity: TupleArity,
        mut compile: impl FnMut(&Ty) -> Node,
    ) -> Self {
        match elements.split_last() {
            Some((last, init)) if variadic => Self {
                prefix: init.iter().map(&mut compile).collect(),
                rest: Some(Box::new(compile(last))),
                arity,
            },
            _ => Self { prefix: elements.iter().map(compile).collect(), rest: None, arity },
        }
    }

    /// `depth` is the depth of the element nodes.
    pub(super) fn run(&self, value: &Value, env: &Env<'_>, depth: usize) -> Result<Value, DecodeError> {
        let items = value.as_seq().ok_or_else(|| DecodeError::mismatch(value))?;
        let (found, expected) = (items.len(), self.prefix.len());

        if self.arity == TupleArity::Exact {
            let fits = match self.rest {
                None => found == expected,
                Some(_) => found >= expected,
            };
            if !fits {
                let kind = ErrorKind::Arity { expected, found, variadic: self.rest.is_some() };
                return Err(DecodeError::new(kind, value).at(Locator::Index(found.min(expected))));
            }
        }

        let mut out = Vec::with_capacity(found);
        for (i, (node, item)) in self.prefix.iter().zip(items).enumerate() {
            out.push(node.run(item, env, depth).map_err(|e| e.at(Locator::Index(i)))?);
        }
        if let Some(rest) = &self.rest {
            for (i, item) in items.iter().enumerate().skip(expected) {
                out.push(rest.run(item, env, depth).map_err(|e| e.at(Locator::Index(i)))?);
            }
        }
        Ok(Value::Tuple(out))
    }
}
