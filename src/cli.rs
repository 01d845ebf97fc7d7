//! CLI: check, normalize or describe JSON documents against a schema.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use tracing::{debug, info};

use json_pickle::decode::{DEFAULT_MAX_DEPTH, DecodeOptions, Decoder, TupleArity};
use json_pickle::encode::Encoder;
use json_pickle::ext;
use json_pickle::schema::{Schema, SchemaFile};
use json_pickle::{Ty, Value};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// decode JSON documents against typed schemas and lower them back to plain JSON
#[derive(Parser, Debug)]
#[command(name = "json-pickle", version, about)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// decode every document against the root type and report each failure
    Check(CheckCmd),
    /// decode then encode every document and print the resulting plain JSON
    Normalize(NormalizeCmd),
    /// print the root type and the schema's records and enums
    Describe(DescribeCmd),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema file (JSON: records, enums, types, root)
    #[arg(long, short)]
    schema: PathBuf,

    /// root type expression, e.g. `List[Point]`; overrides the schema's `root`
    #[arg(long)]
    root: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct DecodeSettings {
    /// ignore record keys that match no field
    #[arg(long, default_value_t = false)]
    lenient: bool,

    /// zip fixed tuples positionally instead of requiring an exact length
    #[arg(long, default_value_t = false)]
    truncate_tuples: bool,

    /// datetimes are seconds since the Unix epoch instead of RFC 3339 text
    #[arg(long, default_value_t = false)]
    numeric_timestamps: bool,

    /// nesting limit for decoding and encoding
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct CheckCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    decode_settings: DecodeSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// only print failures
    #[arg(long, short)]
    quiet: bool,
}

#[derive(clap::Parser, Debug)]
struct NormalizeCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    decode_settings: DecodeSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// output file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// pretty-print each document instead of one per line
    #[arg(long)]
    pretty: bool,
}

#[derive(clap::Parser, Debug)]
struct DescribeCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,
}

/// One input document and where it came from.
#[derive(Debug)]
struct Document {
    label: String,
    value: serde_json::Value,
}

struct LoadedSchema {
    schema: Schema,
    root: Option<Ty>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn load(&self) -> Result<LoadedSchema> {
        let path = &self.schema;
        let file = SchemaFile::load(path)
            .with_context(|| format!("failed to load schema {}", path.display()))?;
        let schema = file
            .build()
            .with_context(|| format!("invalid schema {}", path.display()))?;
        let expr = self.root.as_deref().or(file.root.as_deref());
        let root = match expr {
            None => None,
            Some(expr) => Some(
                schema
                    .parse(expr)
                    .with_context(|| format!("failed to parse root type `{expr}`"))?,
            ),
        };
        debug!(records = schema.records().count(), enums = schema.enums().count(), "schema loaded");
        Ok(LoadedSchema { schema, root })
    }
}

impl LoadedSchema {
    fn root(&self) -> Result<&Ty> {
        self.root
            .as_ref()
            .ok_or_else(|| anyhow!("no root type: pass --root or set `root` in the schema file"))
    }
}

impl DecodeSettings {
    fn options(&self) -> DecodeOptions {
        let tuples = if self.truncate_tuples { TupleArity::Truncate } else { TupleArity::Exact };
        let mut options = DecodeOptions::default()
            .strict(!self.lenient)
            .tuples(tuples)
            .max_depth(self.max_depth);
        if self.numeric_timestamps {
            options = options.extension(ext::numeric_decoder());
        }
        options.extensions(ext::builtin_decoders().iter().cloned())
    }

    fn encoder(&self) -> Encoder {
        let mut rules = Vec::new();
        if self.numeric_timestamps {
            rules.push(ext::numeric_encoder());
        }
        rules.extend(ext::builtin_encoders().iter().cloned());
        Encoder::new(rules).max_depth(self.max_depth)
    }
}

impl InputSettings {
    /// Every document of every input, in input order. Files load in parallel.
    fn load(&self) -> Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)?;
        let per_file = source_paths
            .par_iter()
            .map(|path| self.load_file(path))
            .collect::<Result<Vec<_>>>()?;
        Ok(per_file.into_iter().flatten().collect())
    }

    fn load_file(&self, path: &Path) -> Result<Vec<Document>> {
        let label = path.display().to_string();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read source file {label}"))?;

        let mut raw = Vec::new();
        if self.ndjson {
            for (i, line) in source.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let value = serde_json::from_str(line)
                    .with_context(|| format!("failed to parse JSON ({label}:{})", i + 1))?;
                raw.push(Document { label: format!("{label}:{}", i + 1), value });
            }
        } else {
            let value = serde_json::from_str(&source)
                .with_context(|| format!("failed to parse JSON source file ({label})"))?;
            raw.push(Document { label, value });
        }

        let mut docs = Vec::with_capacity(raw.len());
        for doc in raw {
            let doc = self.select(doc)?;
            match self.jq_expr.as_ref() {
                None => docs.push(doc),
                Some(jq_expr) => {
                    let outputs = crate::jq_exec::run_jaq(jq_expr, &doc.value).with_context(|| {
                        format!("failed to apply jq expression to {}", doc.label)
                    })?;
                    docs.extend(outputs.into_iter().enumerate().map(|(i, value)| Document {
                        label: format!("{}#{i}", doc.label),
                        value,
                    }));
                }
            }
        }
        Ok(docs)
    }

    fn select(&self, doc: Document) -> Result<Document> {
        let Some(pointer) = self.json_pointer.as_deref() else {
            return Ok(doc);
        };
        let value = doc
            .value
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| anyhow!("{}: JSON pointer `{pointer}` selects nothing", doc.label))?;
        Ok(Document { label: doc.label, value })
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Check(target) => target.run(),
            Command::Normalize(target) => target.run(),
            Command::Describe(target) => target.run(),
        }
    }
}

impl CheckCmd {
    fn run(&self) -> Result<ExitCode> {
        let loaded = self.schema_settings.load()?;
        let decoder = Decoder::new(loaded.root()?, self.decode_settings.options());
        let docs = self.input_settings.load()?;
        info!(documents = docs.len(), root = %decoder.ty(), "checking");

        let results: Vec<_> = docs
            .par_iter()
            .map(|doc| decoder.decode(&Value::from(&doc.value)).err())
            .collect();

        let mut failures = 0;
        for (doc, error) in docs.iter().zip(&results) {
            match error {
                None if self.quiet => {}
                None => println!("{} {}", "ok".green(), doc.label),
                Some(error) => {
                    failures += 1;
                    println!("{} {}", "FAIL".red().bold(), doc.label);
                    print!("{}", indent(&error.report().to_string(), 4));
                }
            }
        }
        let summary = format!("{} of {} documents failed", failures, docs.len());
        if failures == 0 {
            eprintln!("{}", summary.green());
            Ok(ExitCode::SUCCESS)
        } else {
            eprintln!("{}", summary.red());
            Ok(ExitCode::FAILURE)
        }
    }
}

impl NormalizeCmd {
    fn run(&self) -> Result<ExitCode> {
        let loaded = self.schema_settings.load()?;
        let decoder = Decoder::new(loaded.root()?, self.decode_settings.options());
        let encoder = self.decode_settings.encoder();
        let docs = self.input_settings.load()?;

        let mut rendered = String::new();
        for doc in &docs {
            let decoded = decoder
                .decode(&Value::from(&doc.value))
                .map_err(|e| anyhow!("{}: does not decode\n{}", doc.label, e.report()))?;
            let plain = encoder
                .encode(&decoded)
                .to_json()
                .with_context(|| format!("{}: cannot be written as JSON", doc.label))?;
            let text = if self.pretty {
                serde_json::to_string_pretty(&plain)?
            } else {
                serde_json::to_string(&plain)?
            };
            rendered.push_str(&text);
            rendered.push('\n');
        }

        match self.out.as_ref() {
            Some(out) => {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                std::fs::write(out, &rendered)
                    .with_context(|| format!("failed to write {}", out.display()))?;
            }
            None => std::io::stdout().write_all(rendered.as_bytes())?,
        }
        Ok(ExitCode::SUCCESS)
    }
}

impl DescribeCmd {
    fn run(&self) -> Result<ExitCode> {
        let loaded = self.schema_settings.load()?;
        print!("{}", describe(&loaded));
        Ok(ExitCode::SUCCESS)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn describe(loaded: &LoadedSchema) -> String {
    let mut out = String::new();
    if let Some(root) = &loaded.root {
        out.push_str(&format!("{} {root}\n", "root".bold()));
    }
    for record in loaded.schema.records() {
        out.push_str(&format!("{} {}\n", "record".cyan(), record.name()));
        for field in record.fields() {
            match &field.default {
                None => out.push_str(&format!("    {}: {}\n", field.name, field.ty)),
                Some(default) => {
                    out.push_str(&format!("    {}: {} = {default}\n", field.name, field.ty));
                }
            }
        }
    }
    for def in loaded.schema.enums() {
        out.push_str(&format!("{} {}\n", "enum".magenta(), def.name()));
        for member in def.members() {
            out.push_str(&format!("    {} = {}\n", member.name(), member.constant()));
        }
    }
    let types: Vec<&str> = loaded.schema.types().collect();
    if !types.is_empty() {
        out.push_str(&format!("{} {}\n", "types".yellow(), types.join(", ")));
    }
    out
}

fn indent(text: &str, by: usize) -> String {
    let pad = " ".repeat(by);
    text.lines().map(|line| format!("{pad}{line}\n")).collect()
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern).with_context(|| format!("bad glob pattern {pattern}"))? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("glob pattern matched no files: {pattern}");
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("json-pickle-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn inputs(path: &Path, ndjson: bool) -> InputSettings {
        InputSettings {
            ndjson,
            json_pointer: None,
            jq_expr: None,
            input: vec![path.display().to_string()],
        }
    }

    #[test]
    fn ndjson_documents_are_labelled_by_line() {
        let path = write_temp("docs.ndjson", "{\"a\": 1}\n\n{\"a\": 2}\n");
        let docs = inputs(&path, true).load().unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[1].label.ends_with(":3"));
        assert_eq!(docs[1].value, json!({"a": 2}));
    }

    #[test]
    fn pointer_and_jq_select_documents() {
        let path = write_temp("wrapped.json", r#"{"data": {"items": [1, 2, 3]}}"#);
        let mut settings = inputs(&path, false);
        settings.json_pointer = Some("/data".into());
        settings.jq_expr = Some(".items[]".into());
        let docs = settings.load().unwrap();
        let values: Vec<_> = docs.iter().map(|d| d.value.clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

        settings.json_pointer = Some("/nope".into());
        assert!(settings.load().is_err());
    }

    #[test]
    fn unmatched_globs_are_errors() {
        assert!(resolve_file_path_patterns(["/definitely/not/here/*.json"]).is_err());
        let literal = resolve_file_path_patterns(["plain.json"]).unwrap();
        assert_eq!(literal, vec![PathBuf::from("plain.json")]);
    }

    #[test]
    fn describe_lists_records_and_enums() {
        colored::control::set_override(false);
        let path = write_temp(
            "schema.json",
            r#"{"records": {"Pen": [{"name": "color", "type": "Color", "default": "red"}]},
                "enums": {"Color": {"red": 1}},
                "root": "List[Pen]"}"#,
        );
        let settings = SchemaSettings { schema: path, root: None };
        let text = describe(&settings.load().unwrap());
        assert!(text.starts_with("root List[Pen]\n"));
        assert!(text.contains("record Pen\n    color: Color = Color.red\n"));
        assert!(text.contains("enum Color\n    red = 1\n"));
    }
}
