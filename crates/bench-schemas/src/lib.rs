use anyhow::{anyhow, Result};
use include_dir::{include_dir, Dir};
use jsonschema::JSONSchema;
use serde_json::Value;

static SCHEMAS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/schemas");

pub fn schema_names() -> Vec<String> {
    let mut names: Vec<String> = SCHEMAS
        .files()
        .filter_map(|f| f.path().file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn load_schema(name: &str) -> Result<Value> {
    let file = SCHEMAS
        .get_file(name)
        .ok_or_else(|| anyhow!("unknown schema: {}", name))?;
    let text = file
        .contents_utf8()
        .ok_or_else(|| anyhow!("schema is not utf-8: {}", name))?;
    Ok(serde_json::from_str(text)?)
}

pub fn compile_schema(name: &str) -> Result<JSONSchema> {
    let schema = load_schema(name)?;
    JSONSchema::compile(&schema).map_err(|e| anyhow!("invalid schema {}: {}", name, e))
}

/// Validates `value` against the named schema, collecting every violation
/// into a single error message.
pub fn validate(name: &str, value: &Value) -> Result<()> {
    let compiled = compile_schema(name)?;
    let result = compiled.validate(value);
    if let Err(errors) = result {
        let msgs: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(anyhow!(
            "{} validation failed: {}",
            name,
            msgs.join("; ")
        ));
    }
    Ok(())
}
