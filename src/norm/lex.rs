use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseError, ParseReason};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Ellipsis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexed {
    pub token: Token,
    pub offset: usize,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Int(i) => write!(f, "{i}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Bytes(b) => write!(f, "b\"{}\"", b.escape_ascii()),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Comma => f.write_str(","),
            Token::Pipe => f.write_str("|"),
            Token::Ellipsis => f.write_str("..."),
        }
    }
}

// Alternation order matters: bytes before identifiers, floats before ints.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^(?:
            (?P<ws>\s+)
          | (?P<ellipsis>\.\.\.)
          | (?P<punct>[\[\],|])
          | (?P<bytes>b"(?:[^"\\]|\\.)*")
          | (?P<str>"(?:[^"\\]|\\.)*" | '(?:[^'\\]|\\.)*')
          | (?P<float>[-+]?(?:\d+\.\d*(?:[eE][-+]?\d+)? | \d+[eE][-+]?\d+))
          | (?P<int>[-+]?\d+)
          | (?P<ident>[A-Za-z_][A-Za-z0-9_.]*)
        )"#,
    )
    .expect("token regex is valid")
});

pub fn tokenize(src: &str) -> Result<Vec<Lexed>, ParseError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < src.len() {
        let rest = &src[pos..];
        let Some(caps) = TOKEN.captures(rest) else {
            let c = rest.chars().next().unwrap_or('\0');
            return Err(ParseError::new(pos, ParseReason::UnexpectedChar(c)));
        };
        let whole = caps.get(0).map_or(0, |m| m.end());
        let bad = |msg: String| ParseError::new(pos, ParseReason::BadLiteral(msg));

        let token = if caps.name("ws").is_some() {
            None
        } else if caps.name("ellipsis").is_some() {
            Some(Token::Ellipsis)
        } else if let Some(m) = caps.name("punct") {
            Some(match m.as_str() {
                "[" => Token::LBracket,
                "]" => Token::RBracket,
                "," => Token::Comma,
                _ => Token::Pipe,
            })
        } else if let Some(m) = caps.name("bytes") {
            let body = &m.as_str()[2..m.len() - 1];
            Some(Token::Bytes(unescape(body).map_err(bad)?))
        } else if let Some(m) = caps.name("str") {
            let body = &m.as_str()[1..m.len() - 1];
            let raw = unescape(body).map_err(bad)?;
            let s = String::from_utf8(raw).map_err(|e| bad(e.to_string()))?;
            Some(Token::Str(s))
        } else if let Some(m) = caps.name("float") {
            let x = m.as_str().parse::<f64>().map_err(|e| bad(e.to_string()))?;
            Some(Token::Float(x))
        } else if let Some(m) = caps.name("int") {
            let i = m.as_str().parse::<i64>().map_err(|e| bad(e.to_string()))?;
            Some(Token::Int(i))
        } else {
            let m = caps.name("ident").map_or("", |m| m.as_str());
            Some(Token::Ident(m.to_string()))
        };

        if let Some(token) = token {
            out.push(Lexed { token, offset: pos });
        }
        pos += whole;
    }
    Ok(out)
}

/// Resolve backslash escapes as printed by `{:?}` and `escape_ascii`.
fn unescape(body: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some(c @ ('\\' | '"' | '\'')) => out.push(c as u8),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let b = u8::from_str_radix(&hex, 16)
                    .map_err(|_| format!("bad escape `\\x{hex}`"))?;
                out.push(b);
            }
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err("expected `{` after `\\u`".to_string());
                }
                let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let c = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("bad escape `\\u{{{hex}}}`"))?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Some(other) => return Err(format!("unknown escape `\\{other}`")),
            None => return Err("dangling `\\`".to_string()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn splits_constructors_and_punctuation() {
        assert_eq!(
            tokens("Tuple[int, ...]"),
            vec![
                Token::Ident("Tuple".into()),
                Token::LBracket,
                Token::Ident("int".into()),
                Token::Comma,
                Token::Ellipsis,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn scalars_and_escapes() {
        assert_eq!(
            tokens(r#"5 -2 2.5 1e3 "a\"b" 'c' b"\x00z""#),
            vec![
                Token::Int(5),
                Token::Int(-2),
                Token::Float(2.5),
                Token::Float(1000.0),
                Token::Str("a\"b".into()),
                Token::Str("c".into()),
                Token::Bytes(vec![0, b'z']),
            ]
        );
        assert_eq!(tokens(r#""\u{e9}""#), vec![Token::Str("é".into())]);
    }

    #[test]
    fn offsets_point_at_tokens() {
        let lexed = tokenize("List[ str]").unwrap();
        assert_eq!(lexed[2].offset, 6);
    }

    #[test]
    fn rejects_stray_characters() {
        let err = tokenize("List[int]?").unwrap_err();
        assert_eq!(err.offset, 9);
        assert_eq!(err.reason, ParseReason::UnexpectedChar('?'));
    }
}
