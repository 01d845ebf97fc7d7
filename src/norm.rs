//! Type descriptor normalizer.
//!
//! Classifies a textual descriptor into exactly one [`Ty`] variant with a
//! recursive-descent parser over the type grammar:
//!
//! ```text
//! ty    := term ("|" term)*
//! term  := "Any" | "None" | prim | NAME | ctor "[" args "]"
//! prim  := "bool" | "int" | "float" | "str" | "bytes"
//! ```
//!
//! Constructors: `Union`, `Optional`, `Literal`, `Mapping` / `Dict` /
//! `MutableMapping`, `Sequence` / `List` / `MutableSequence`, `FrozenSet` /
//! `Set` / `MutableSet`, and `Tuple` (a trailing `...` makes it variadic).
//! Names go through a [`Resolver`]; anything the grammar does not recognize
//! is a [`ParseError`].
pub mod lex;

use std::str::FromStr;

use crate::error::{ParseError, ParseReason};
use crate::ir::{Primitive, Ty};
use crate::value::Value;

use lex::{Lexed, Token};

const MAX_DEPTH: usize = 64;

const CONSTRUCTORS: &[&str] = &[
    "Union", "Optional", "Literal", "Mapping", "Dict", "MutableMapping",
    "Sequence", "List", "MutableSequence", "FrozenSet", "Set", "MutableSet", "Tuple",
];

/// Names that can never label a record, enum or domain type.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, "Any" | "None" | "True" | "False")
        || Primitive::from_name(name).is_some()
        || CONSTRUCTORS.contains(&name)
}

/// Supplies descriptors for names the grammar does not define.
pub trait Resolver {
    type Error: From<ParseError>;

    /// `Ok(None)` when the name is unknown.
    fn resolve(&mut self, name: &str) -> Result<Option<Ty>, Self::Error>;
}

/// Resolver that knows no names: only the built-in grammar parses.
pub struct NoNames;

impl Resolver for NoNames {
    type Error = ParseError;

    fn resolve(&mut self, _name: &str) -> Result<Option<Ty>, ParseError> {
        Ok(None)
    }
}

pub fn parse<R: Resolver>(src: &str, resolver: &mut R) -> Result<Ty, R::Error> {
    let tokens = lex::tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0, end: src.len(), depth: 0, resolver };
    let ty = parser.ty()?;
    match parser.peek() {
        None => Ok(ty),
        Some(lexed) => Err(parser.unexpected(lexed).into()),
    }
}

impl FromStr for Ty {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s, &mut NoNames)
    }
}

enum Arg {
    Ty(Ty),
    Ellipsis(usize),
}

struct Parser<'r, R> {
    tokens: Vec<Lexed>,
    pos: usize,
    end: usize,
    depth: usize,
    resolver: &'r mut R,
}

impl<R: Resolver> Parser<'_, R> {
    fn peek(&self) -> Option<&Lexed> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Lexed, ParseError> {
        let lexed = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::new(self.end, ParseReason::UnexpectedEnd))?;
        self.pos += 1;
        Ok(lexed)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|l| &l.token == token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        let lexed = self.next()?;
        if &lexed.token == token { Ok(()) } else { Err(self.unexpected(&lexed)) }
    }

    fn unexpected(&self, lexed: &Lexed) -> ParseError {
        ParseError::new(lexed.offset, ParseReason::UnexpectedToken(lexed.token.to_string()))
    }

    fn ty(&mut self) -> Result<Ty, R::Error> {
        let first = self.term()?;
        if !self.peek().is_some_and(|l| l.token == Token::Pipe) {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.eat(&Token::Pipe) {
            members.push(self.term()?);
        }
        Ok(Ty::union(members))
    }

    fn term(&mut self) -> Result<Ty, R::Error> {
        let lexed = self.next()?;
        let Token::Ident(name) = &lexed.token else {
            return Err(self.unexpected(&lexed).into());
        };
        let offset = lexed.offset;

        match name.as_str() {
            "Any" => return Ok(Ty::Any),
            "None" => return Ok(Ty::None),
            _ => {}
        }
        if let Some(p) = Primitive::from_name(name) {
            return Ok(Ty::Primitive(p));
        }
        if CONSTRUCTORS.contains(&name.as_str()) {
            return self.constructor(name, offset);
        }
        if is_reserved(name) {
            return Err(self.unexpected(&lexed).into());
        }
        match self.resolver.resolve(name)? {
            Some(ty) => Ok(ty),
            None => Err(ParseError::new(offset, ParseReason::UnknownType(name.clone())).into()),
        }
    }

    fn constructor(&mut self, ctor: &str, offset: usize) -> Result<Ty, R::Error> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(offset, ParseReason::TooDeep(MAX_DEPTH)).into());
        }
        self.expect(&Token::LBracket)?;
        let ty = if ctor == "Literal" { self.literal()? } else { self.generic(ctor, offset)? };
        self.depth -= 1;
        Ok(ty)
    }

    fn literal(&mut self) -> Result<Ty, ParseError> {
        let mut values = Vec::new();
        loop {
            let lexed = self.next()?;
            let value = match &lexed.token {
                Token::Int(i) => Value::Int(*i),
                Token::Float(x) => Value::from(*x),
                Token::Str(s) => Value::Str(s.clone()),
                Token::Bytes(b) => Value::Bytes(b.clone()),
                Token::Ident(id) if id == "True" => Value::Bool(true),
                Token::Ident(id) if id == "False" => Value::Bool(false),
                Token::Ident(id) if id == "None" => Value::Null,
                _ => return Err(self.unexpected(&lexed)),
            };
            values.push(value);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(Ty::literal(values))
    }

    fn generic(&mut self, ctor: &str, offset: usize) -> Result<Ty, R::Error> {
        let args = self.args()?;
        let found = args.len();
        let arity = |expected: &'static str| {
            ParseError::new(offset, ParseReason::Arity { ctor: ctor.to_string(), expected, found })
        };

        if ctor == "Tuple" {
            return Ok(tuple(args)?);
        }
        let mut tys = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Ty(ty) => tys.push(ty),
                Arg::Ellipsis(at) => {
                    return Err(ParseError::new(at, ParseReason::MisplacedEllipsis).into());
                }
            }
        }

        let ty = match (ctor, tys.as_slice()) {
            ("Union", [_, ..]) => Ty::union(tys.iter().cloned()),
            ("Union", _) => return Err(arity("at least 1").into()),
            ("Optional", [inner]) => Ty::optional(inner.clone()),
            ("Mapping", [k, v]) => Ty::mapping(k.clone(), v.clone()),
            ("Dict" | "MutableMapping", [k, v]) => Ty::dict(k.clone(), v.clone()),
            ("Sequence", [e]) => Ty::sequence(e.clone()),
            ("List" | "MutableSequence", [e]) => Ty::list(e.clone()),
            ("FrozenSet", [e]) => Ty::frozenset(e.clone()),
            ("Set" | "MutableSet", [e]) => Ty::set(e.clone()),
            ("Mapping" | "Dict" | "MutableMapping", _) => return Err(arity("2").into()),
            _ => return Err(arity("1").into()),
        };
        Ok(ty)
    }

    /// Comma-separated arguments up to the closing bracket. `Tuple[]` is the
    /// only constructor that may end up empty.
    fn args(&mut self) -> Result<Vec<Arg>, R::Error> {
        let mut args = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(args);
        }
        loop {
            let at = self.peek().map_or(self.end, |l| l.offset);
            if self.eat(&Token::Ellipsis) {
                args.push(Arg::Ellipsis(at));
            } else {
                args.push(Arg::Ty(self.ty()?));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(args)
    }
}

fn tuple(args: Vec<Arg>) -> Result<Ty, ParseError> {
    let n = args.len();
    let mut elements = Vec::with_capacity(n);
    let mut variadic = false;
    for (i, arg) in args.into_iter().enumerate() {
        match arg {
            Arg::Ty(ty) => elements.push(ty),
            Arg::Ellipsis(_) if i + 1 == n && i > 0 => variadic = true,
            Arg::Ellipsis(at) => return Err(ParseError::new(at, ParseReason::MisplacedEllipsis)),
        }
    }
    Ok(Ty::Tuple { elements, variadic })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::RecordDef;
    use std::sync::Arc;

    fn parse_ok(src: &str) -> Ty {
        src.parse::<Ty>().unwrap()
    }

    #[test]
    fn primitives_and_keywords() {
        assert_eq!(parse_ok("int"), Ty::INT);
        assert_eq!(parse_ok("Any"), Ty::Any);
        assert_eq!(parse_ok("None"), Ty::None);
    }

    #[test]
    fn containers_by_mutability() {
        assert_eq!(parse_ok("List[str]"), Ty::list(Ty::STR));
        assert_eq!(parse_ok("Sequence[str]"), Ty::sequence(Ty::STR));
        assert_eq!(parse_ok("MutableMapping[str, int]"), Ty::dict(Ty::STR, Ty::INT));
        assert_eq!(parse_ok("FrozenSet[int]"), Ty::frozenset(Ty::INT));
    }

    #[test]
    fn optional_and_pipe_build_the_same_union() {
        assert_eq!(parse_ok("Optional[int]"), parse_ok("int | None"));
        assert_eq!(parse_ok("Union[int, Union[str, int]]"), Ty::union([Ty::INT, Ty::STR]));
    }

    #[test]
    fn trailing_ellipsis_marks_variadic() {
        assert_eq!(parse_ok("Tuple[int, ...]"), Ty::variadic([Ty::INT]));
        assert_eq!(parse_ok("Tuple[]"), Ty::tuple([]));
        let err = "Tuple[..., int]".parse::<Ty>().unwrap_err();
        assert_eq!(err.reason, ParseReason::MisplacedEllipsis);
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn literal_scalars() {
        assert_eq!(
            parse_ok(r#"Literal[5, "a", b"z", True, None, 2.5]"#),
            Ty::literal([
                Value::Int(5),
                Value::from("a"),
                Value::Bytes(b"z".to_vec()),
                Value::Bool(true),
                Value::Null,
                Value::from(2.5),
            ])
        );
    }

    #[test]
    fn display_reparses_to_the_same_descriptor() {
        for src in [
            "Mapping[str, List[Optional[float]]]",
            "Tuple[int, str, ...]",
            "Union[int, str, None]",
            "Literal[1.0, \"q\\\"uote\", b\"\\x00\"]",
            "Dict[FrozenSet[bytes], Sequence[Any]]",
        ] {
            let ty = parse_ok(src);
            assert_eq!(parse_ok(&ty.to_string()), ty, "{src}");
        }
    }

    #[test]
    fn hand_built_variants_reparse_normalized() {
        let single = Ty::Union(vec![Ty::INT]);
        assert_eq!(single.to_string(), "Union[int]");
        assert_eq!(parse_ok(&single.to_string()), Ty::INT);

        let built = Ty::variadic([]);
        assert_eq!(parse_ok(&built.to_string()), built);
    }

    #[test]
    fn unknown_names_and_bad_arity_are_errors() {
        let err = "List[Point]".parse::<Ty>().unwrap_err();
        assert_eq!(err.reason, ParseReason::UnknownType("Point".into()));
        assert_eq!(err.offset, 5);

        let err = "Mapping[str]".parse::<Ty>().unwrap_err();
        assert!(matches!(err.reason, ParseReason::Arity { found: 1, .. }));

        let err = "List[int".parse::<Ty>().unwrap_err();
        assert_eq!(err.reason, ParseReason::UnexpectedEnd);

        assert!("int int".parse::<Ty>().is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let src = format!("{}int{}", "List[".repeat(100), "]".repeat(100));
        let err = src.parse::<Ty>().unwrap_err();
        assert_eq!(err.reason, ParseReason::TooDeep(MAX_DEPTH));
    }

    #[test]
    fn resolver_supplies_names() {
        struct One(Arc<RecordDef>);
        impl Resolver for One {
            type Error = ParseError;
            fn resolve(&mut self, name: &str) -> Result<Option<Ty>, ParseError> {
                Ok((name == self.0.name()).then(|| Ty::Record(self.0.clone())))
            }
        }
        let point = Arc::new(RecordDef::new("Point", vec![]));
        let ty = parse("List[Point]", &mut One(point.clone())).unwrap();
        assert_eq!(ty, Ty::list(Ty::Record(point)));
    }
}
