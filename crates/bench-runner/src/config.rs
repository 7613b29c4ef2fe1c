//! Benchmark configuration: YAML on disk, `--set` overrides, schema and
//! required-field validation, then a typed [`BenchmarkConfig`].

use crate::inference::Method;
use crate::metrics::{Metric, MetricOptions};
use crate::runner::InferenceRequest;
use crate::tasks::{build_task, Task};
use anyhow::{anyhow, Result};
use bench_core::{OutputRoot, WritePolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA: &str = "benchmark_config_v1.jsonschema";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_true")]
    pub consolidate: bool,
    pub task: TaskConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub sweep: Option<SweepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub method: String,
    pub num_simulations: usize,
    #[serde(default = "default_posterior_samples")]
    pub num_posterior_samples: usize,
    #[serde(default = "default_observations")]
    pub num_observations: usize,
    #[serde(default)]
    pub preserve_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    #[serde(default = "default_test_size")]
    pub c2st_test_size: f64,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics(),
            c2st_test_size: default_test_size(),
            random_state: default_random_state(),
        }
    }
}

/// Cartesian sweep. Empty lists fall back to the base configuration's
/// single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub num_simulations: Vec<usize>,
    #[serde(default)]
    pub task_params: BTreeMap<String, Vec<Value>>,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            num_simulations: Vec::new(),
            task_params: BTreeMap::new(),
            max_concurrency: default_concurrency(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_true() -> bool {
    true
}

fn default_posterior_samples() -> usize {
    50
}

fn default_observations() -> usize {
    10
}

fn default_metrics() -> Vec<String> {
    vec!["c2st".to_string()]
}

fn default_test_size() -> f64 {
    0.3
}

fn default_random_state() -> u64 {
    86
}

fn default_concurrency() -> usize {
    1
}

impl BenchmarkConfig {
    pub fn output_root(&self) -> OutputRoot {
        OutputRoot::new(&self.output_root)
    }

    pub fn method(&self) -> Result<Method> {
        Ok(self.inference.method.parse()?)
    }

    /// Metrics in configuration order, duplicates removed.
    pub fn metrics(&self) -> Result<Vec<Metric>> {
        let mut out: Vec<Metric> = Vec::new();
        for name in &self.evaluation.metrics {
            let metric: Metric = name.parse()?;
            if !out.contains(&metric) {
                out.push(metric);
            }
        }
        if out.is_empty() {
            return Err(anyhow!("evaluation.metrics must name at least one metric"));
        }
        Ok(out)
    }

    pub fn metric_options(&self) -> MetricOptions {
        MetricOptions {
            c2st_test_size: self.evaluation.c2st_test_size,
            random_state: self.evaluation.random_state,
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        if self.inference.preserve_existing {
            WritePolicy::PreserveExisting
        } else {
            WritePolicy::Overwrite
        }
    }

    pub fn build_task(&self) -> Result<Box<dyn Task>> {
        Ok(build_task(&self.task.name, &self.task.params)?)
    }

    /// The resolved configuration with the effective seed filled in, as
    /// persisted next to every artifact.
    pub fn snapshot(&self, seed: u64) -> Result<Value> {
        let mut resolved = self.clone();
        resolved.random_seed = Some(seed);
        Ok(serde_json::to_value(resolved)?)
    }

    pub fn inference_request(&self, seed: u64) -> Result<InferenceRequest> {
        Ok(InferenceRequest::new(
            &self.inference.method,
            self.inference.num_simulations,
            self.inference.num_posterior_samples,
            self.inference.num_observations,
        )?
        .with_seed(seed)
        .with_config(self.snapshot(seed)?)
        .with_policy(self.write_policy()))
    }
}

/// Parses repeated `key=value` overrides. Values are read as JSON where
/// possible and kept as strings otherwise.
pub fn parse_set_bindings(values: &[String]) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    for raw in values {
        let (key, val_raw) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --set '{}': expected k=v", raw))?;
        if key.trim().is_empty() {
            return Err(anyhow!("invalid --set '{}': key cannot be empty", raw));
        }
        let parsed =
            serde_json::from_str::<Value>(val_raw).unwrap_or(Value::String(val_raw.to_string()));
        out.push((key.trim().to_string(), parsed));
    }
    Ok(out)
}

/// `inference.num_simulations` and `/inference/num_simulations` address the
/// same field.
fn override_pointer(key: &str) -> String {
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!(
            "/{}",
            key.split('.')
                .map(|t| t.replace('~', "~0").replace('/', "~1"))
                .collect::<Vec<_>>()
                .join("/")
        )
    }
}

pub fn apply_overrides(config: &mut Value, bindings: &[(String, Value)]) -> Result<()> {
    for (key, value) in bindings {
        set_json_pointer_value(config, &override_pointer(key), value.clone())?;
    }
    Ok(())
}

fn decode_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Sets the value at `pointer`, creating intermediate objects as needed.
pub fn set_json_pointer_value(root: &mut Value, pointer: &str, new_value: Value) -> Result<()> {
    if pointer.is_empty() || pointer == "/" {
        *root = new_value;
        return Ok(());
    }
    if !pointer.starts_with('/') {
        return Err(anyhow!("json_pointer must start with '/': {}", pointer));
    }
    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(decode_pointer_token)
        .collect();
    let Some((last, parents)) = tokens.split_last() else {
        *root = new_value;
        return Ok(());
    };

    let mut cur = root;
    for token in parents {
        cur = match cur {
            Value::Object(map) => map.entry(token.clone()).or_insert_with(|| json!({})),
            Value::Array(arr) => {
                let idx = array_index(token, arr.len(), pointer)?;
                &mut arr[idx]
            }
            _ => {
                return Err(anyhow!(
                    "json_pointer traversal hit non-container at token '{}' in {}",
                    token,
                    pointer
                ))
            }
        };
    }
    match cur {
        Value::Object(map) => {
            map.insert(last.clone(), new_value);
            Ok(())
        }
        Value::Array(arr) => {
            let idx = array_index(last, arr.len(), pointer)?;
            arr[idx] = new_value;
            Ok(())
        }
        _ => Err(anyhow!(
            "json_pointer target is not an object/array for {}",
            pointer
        )),
    }
}

fn array_index(token: &str, len: usize, pointer: &str) -> Result<usize> {
    let idx: usize = token.parse().map_err(|_| {
        anyhow!(
            "json_pointer token '{}' is not a valid array index in {}",
            token,
            pointer
        )
    })?;
    if idx >= len {
        return Err(anyhow!(
            "json_pointer array index {} out of bounds in {}",
            idx,
            pointer
        ));
    }
    Ok(idx)
}

/// Reports every absent or empty required field at once.
pub fn validate_required_fields(config: &Value) -> Result<()> {
    let required: &[&str] = &["/task/name", "/inference/method", "/inference/num_simulations"];
    let mut missing = Vec::new();
    for pointer in required {
        let is_missing = match config.pointer(pointer) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Number(n)) => n.as_u64() == Some(0),
            _ => false,
        };
        if is_missing {
            missing.push(*pointer);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "benchmark config missing required fields:\n{}",
            missing
                .iter()
                .map(|p| format!("  - {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        ))
    }
}

/// Reads a YAML config and applies overrides, without validating.
pub fn load_config_value(path: &Path, bindings: &[(String, Value)]) -> Result<Value> {
    let raw_yaml = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw_yaml)?;
    let mut json_value: Value = serde_json::to_value(yaml_value)?;
    if json_value.is_null() {
        json_value = json!({});
    }
    apply_overrides(&mut json_value, bindings)?;
    Ok(json_value)
}

pub fn resolve_config(value: Value) -> Result<BenchmarkConfig> {
    bench_schemas::validate(CONFIG_SCHEMA, &value)?;
    validate_required_fields(&value)?;
    let config: BenchmarkConfig = serde_json::from_value(value)?;
    // Fail on unknown names before any work starts.
    config.method()?;
    config.metrics()?;
    Ok(config)
}

pub fn load_config(path: &Path, bindings: &[(String, Value)]) -> Result<BenchmarkConfig> {
    resolve_config(load_config_value(path, bindings)?)
}

/// Starter configuration written by `bench init`.
pub const CONFIG_TEMPLATE: &str = r#"# Benchmark configuration (benchmark_config_v1)
version: 1
output_root: outputs
random_seed: 42
consolidate: true

task:
  name: likelihood_misspecified
  params:
    dim: 2
    tau_m: 1.0
    lambda_val: 0.5

inference:
  method: NPE
  num_simulations: 1000
  num_posterior_samples: 50
  num_observations: 10
  preserve_existing: false

evaluation:
  metrics: [c2st, ppc]
  c2st_test_size: 0.3
  random_state: 86

sweep:
  methods: [NPE, NLE, NRE]
  num_simulations: [100, 1000]
  task_params:
    lambda_val: [0.0, 0.5]
  max_concurrency: 2
"#;
