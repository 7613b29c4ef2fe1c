use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Root directory of the artifact tree (`outputs/` by default). Passed
/// explicitly so that tests and sweeps can use isolated roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoot(PathBuf);

impl OutputRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// `<root>/<task>_<method>/`, the level at which `metrics_all.csv` lives.
    pub fn family_dir(&self, task_identity: &str, method: &str) -> PathBuf {
        self.0.join(format!("{}_{}", task_identity, method))
    }
}

impl Default for OutputRoot {
    fn default() -> Self {
        Self::new("outputs")
    }
}

/// Identity of one benchmark configuration. Maps deterministically to one
/// directory under an [`OutputRoot`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunKey {
    task_identity: String,
    method: String,
    num_simulations: usize,
    params: BTreeMap<String, Value>,
}

impl RunKey {
    pub fn new(task_identity: impl Into<String>, method: impl Into<String>, num_simulations: usize) -> Self {
        Self {
            task_identity: task_identity.into(),
            method: method.into(),
            num_simulations,
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn task_identity(&self) -> &str {
        &self.task_identity
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn num_simulations(&self) -> usize {
        self.num_simulations
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// `k1_v1_k2_v2` in key order; null values are skipped and an empty
    /// mapping yields `None`.
    pub fn param_segment(&self) -> Option<String> {
        let parts: Vec<String> = self
            .params
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{}_{}", k, render_param_value(v)))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("_"))
        }
    }

    /// `<task>_<method>/[<params>/]sims_<N>` relative to the output root.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(format!("{}_{}", self.task_identity, self.method));
        if let Some(segment) = self.param_segment() {
            dir.push(segment);
        }
        dir.push(format!("sims_{}", self.num_simulations));
        dir
    }

    pub fn run_dir(&self, root: &OutputRoot) -> PathBuf {
        root.path().join(self.relative_dir())
    }

    pub fn observation_dir(&self, root: &OutputRoot, observation_idx: usize) -> PathBuf {
        self.run_dir(root).join(format!("obs_{}", observation_idx))
    }

    pub fn family_dir(&self, root: &OutputRoot) -> PathBuf {
        root.family_dir(&self.task_identity, &self.method)
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_dir().display())
    }
}

/// Renders a parameter value the way it appears in paths and ledger cells.
pub fn render_param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
