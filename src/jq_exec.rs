use anyhow::{anyhow, Context, Result};
use jaq_core::{compile::Undefined, load, Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde_json::Value;

/// Run a jq filter over one document; every output becomes a document.
pub fn run_jaq(filter_src: &str, input: &Value) -> Result<Vec<Value>> {
    let loader = load::Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = load::Arena::default();
    let program = load::File { code: filter_src, path: () };

    let modules = loader.load(&arena, program).map_err(parse_errors)?;
    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(undefined_errors)?;

    let inputs = RcIter::new(core::iter::empty());
    let outputs = filter.run((Ctx::new([], &inputs), Val::from(input.clone())));

    let mut docs = Vec::new();
    for (i, output) in outputs.enumerate() {
        let val = output.map_err(|e| anyhow!("jq output {i}: {e:?}"))?;
        // Val prints as JSON text
        let doc = serde_json::from_str(&val.to_string())
            .with_context(|| format!("jq output {i} is not JSON"))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn parse_errors(errs: Vec<(load::File<&str, ()>, load::Error<&str>)>) -> anyhow::Error {
    let lines: Vec<String> = errs
        .into_iter()
        .map(|(file, err)| format!("cannot parse jq filter `{}`: {err:?}", file.code))
        .collect();
    anyhow!(lines.join("\n"))
}

fn undefined_errors(errs: Vec<(load::File<&str, ()>, Vec<(&str, Undefined)>)>) -> anyhow::Error {
    let mut lines = Vec::new();
    for (file, undefined) in errs {
        for (name, kind) in undefined {
            lines.push(format!("undefined `{name}` ({kind:?}) in jq filter `{}`", file.code));
        }
    }
    anyhow!(lines.join("\n"))
}
