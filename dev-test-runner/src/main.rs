//! Runs JSON fixture files through the decoder and encoder.
//!
//! ```text
//! dev-test-runner [--filter REGEX] [FIXTURE.json ...]
//! ```
//!
//! Without fixture paths every `*.json` under `fixtures/` runs.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use json_pickle::{
    builtin_decoders, builtin_encoders, ext, DecodeError, DecodeOptions, Decoder, Encoder,
    ErrorKind, Schema, SchemaFile, TupleArity, Value,
};
use regex::Regex;
use serde::Deserialize;

const FIXTURE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    #[serde(default)]
    schema: SchemaFile,
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Case {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    input: serde_json::Value,
    #[serde(default = "strict_by_default")]
    strict: bool,
    #[serde(default)]
    truncate: bool,
    #[serde(default)]
    numeric_timestamps: bool,
    expect: Expect,
}

fn strict_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
enum Expect {
    Ok {
        /// plain JSON after decode then encode; defaults to the input
        #[serde(default)]
        output: Option<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        missing_keys: Option<BTreeSet<String>>,
        #[serde(default)]
        extra_keys: Option<BTreeSet<String>>,
        #[serde(default)]
        location: Option<String>,
        /// display form of the descriptor at which decoding failed
        #[serde(default)]
        path_tail: Option<String>,
    },
}

struct Args {
    filter: Option<Regex>,
    fixtures: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut filter = None;
    let mut fixtures = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--filter" {
            let Some(pattern) = args.next() else { bail!("--filter needs a regex") };
            filter = Some(Regex::new(&pattern).with_context(|| format!("bad filter `{pattern}`"))?);
        } else {
            fixtures.push(PathBuf::from(arg));
        }
    }
    if fixtures.is_empty() {
        for entry in std::fs::read_dir(FIXTURE_DIR).context("cannot list fixtures")? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                fixtures.push(path);
            }
        }
        fixtures.sort();
    }
    Ok(Args { filter, fixtures })
}

fn load_fixture(path: &Path) -> Result<Fixture> {
    let src = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let de = &mut serde_json::Deserializer::from_str(&src);
    serde_path_to_error::deserialize(de).with_context(|| format!("malformed fixture {}", path.display()))
}

fn options(case: &Case) -> DecodeOptions {
    let tuples = if case.truncate { TupleArity::Truncate } else { TupleArity::Exact };
    let mut options = DecodeOptions::default().strict(case.strict).tuples(tuples);
    if case.numeric_timestamps {
        options = options.extension(ext::numeric_decoder());
    }
    options.extensions(builtin_decoders().iter().cloned())
}

fn encoder(case: &Case) -> Encoder {
    let numeric = case.numeric_timestamps.then(ext::numeric_encoder);
    Encoder::new(numeric.into_iter().chain(builtin_encoders().iter().cloned()))
}

fn kind_name(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Mismatch => "mismatch",
        ErrorKind::Union { .. } => "union",
        ErrorKind::Keys => "keys",
        ErrorKind::Arity { .. } => "arity",
        ErrorKind::Unrecognized => "unrecognized",
        ErrorKind::DepthExceeded { .. } => "depth",
        ErrorKind::Extension { .. } => "extension",
    }
}

/// `Ok(())` when the case behaves as expected, otherwise why not.
fn run_case(schema: &Schema, case: &Case) -> Result<(), String> {
    let ty = schema.parse(&case.ty).map_err(|e| format!("bad type `{}`: {e}", case.ty))?;
    let decoder = Decoder::new(&ty, options(case));
    let outcome = decoder.decode(&Value::from(&case.input));

    match (&case.expect, outcome) {
        (Expect::Ok { output }, Ok(decoded)) => {
            let plain = encoder(case).encode(&decoded).to_json().map_err(|e| e.to_string())?;
            let want = output.as_ref().unwrap_or(&case.input);
            if &plain == want { Ok(()) } else { Err(format!("encoded to {plain}, expected {want}")) }
        }
        (Expect::Ok { .. }, Err(error)) => Err(format!("unexpected error\n{}", error.report())),
        (Expect::Error { .. }, Ok(decoded)) => Err(format!("expected an error, decoded {decoded}")),
        (Expect::Error { .. }, Err(error)) => check_error(&case.expect, &error),
    }
}

fn check_error(expect: &Expect, error: &DecodeError) -> Result<(), String> {
    let Expect::Error { kind, missing_keys, extra_keys, location, path_tail } = expect else {
        return Ok(());
    };
    let mut problems = Vec::new();
    if let Some(kind) = kind {
        let got = kind_name(error.kind());
        if got != kind.as_str() {
            problems.push(format!("kind {got}, expected {kind}"));
        }
    }
    if let Some(keys) = missing_keys {
        if keys != error.missing_keys() {
            problems.push(format!("missing keys {:?}, expected {keys:?}", error.missing_keys()));
        }
    }
    if let Some(keys) = extra_keys {
        if keys != error.extra_keys() {
            problems.push(format!("extra keys {:?}, expected {keys:?}", error.extra_keys()));
        }
    }
    if let Some(location) = location {
        let got = error.location_string();
        if &got != location {
            problems.push(format!("location {got}, expected {location}"));
        }
    }
    if let Some(tail) = path_tail {
        let got = error.path().last().map(ToString::to_string).unwrap_or_default();
        if &got != tail {
            problems.push(format!("path ends at {got}, expected {tail}"));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!("{}\n{}", problems.join("; "), error.report()))
    }
}

fn main() -> Result<ExitCode> {
    let args = parse_args()?;
    let (mut passed, mut failed) = (0usize, 0usize);

    for path in &args.fixtures {
        let fixture = load_fixture(path)?;
        let schema = fixture
            .schema
            .build()
            .with_context(|| format!("bad schema in {}", path.display()))?;
        let file = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        for case in &fixture.cases {
            let id = format!("{file}::{}", case.name);
            if args.filter.as_ref().is_some_and(|f| !f.is_match(&id)) {
                continue;
            }
            match run_case(&schema, case) {
                Ok(()) => {
                    passed += 1;
                    println!("PASS {id}");
                }
                Err(why) => {
                    failed += 1;
                    println!("FAIL {id}: {why}");
                }
            }
        }
    }

    println!("\n{passed} passed, {failed} failed");
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
