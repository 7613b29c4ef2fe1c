use bench_core::{render_param_value, Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Fixed leading columns of every ledger, in order. Never null.
pub const BASE_COLUMNS: [&str; 6] = [
    "metric",
    "value",
    "task",
    "method",
    "num_simulations",
    "observation_idx",
];

/// Metadata columns that vary between reruns of the same configuration and
/// therefore do not contribute to a row's identity.
pub const VOLATILE_COLUMNS: [&str; 2] = ["seed", "timestamp"];

/// Written for cells a source file did not provide.
pub const MISSING_MARKER: &str = "NA";

pub fn is_base_column(name: &str) -> bool {
    BASE_COLUMNS.contains(&name)
}

pub fn is_missing(cell: &str) -> bool {
    matches!(cell.trim(), "" | "NA" | "NaN" | "nan")
}

/// The single column-ordering rule shared by ledgers and consolidation:
/// base columns first, then every other name once, sorted.
pub fn canonical_columns<'a>(extra: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let extras: BTreeSet<&str> = extra.into_iter().filter(|c| !is_base_column(c)).collect();
    BASE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(extras.into_iter().map(str::to_string))
        .collect()
}

pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => MISSING_MARKER.to_string(),
        other => render_param_value(other),
    }
}

/// One scored observation plus free-form metadata (seed, task parameters).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub metric: String,
    pub value: f64,
    pub task: String,
    pub method: String,
    pub num_simulations: usize,
    pub observation_idx: usize,
    pub metadata: BTreeMap<String, Value>,
}

impl MetricRecord {
    pub fn new(
        metric: impl Into<String>,
        value: f64,
        task: impl Into<String>,
        method: impl Into<String>,
        num_simulations: usize,
        observation_idx: usize,
    ) -> Self {
        Self {
            metric: metric.into(),
            value,
            task: task.into(),
            method: method.into(),
            num_simulations,
            observation_idx,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self.metadata.keys().find(|k| is_base_column(k)) {
            return Err(Error::ReservedColumn(key.clone()));
        }
        Ok(())
    }

    pub fn columns(&self) -> Vec<String> {
        canonical_columns(self.metadata.keys().map(String::as_str))
    }

    /// Cells in [`MetricRecord::columns`] order.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.metric.clone(),
            format_value(self.value),
            self.task.clone(),
            self.method.clone(),
            self.num_simulations.to_string(),
            self.observation_idx.to_string(),
        ];
        // BTreeMap iteration is already sorted, matching canonical order.
        cells.extend(self.metadata.values().map(render_cell));
        cells
    }
}

fn format_value(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        MISSING_MARKER.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_columns_put_base_first_then_sorted_extras() {
        let cols = canonical_columns(["z_meta", "a_meta", "metric", "a_meta"]);
        assert_eq!(
            cols,
            vec![
                "metric",
                "value",
                "task",
                "method",
                "num_simulations",
                "observation_idx",
                "a_meta",
                "z_meta"
            ]
        );
    }

    #[test]
    fn cells_follow_columns() {
        let record = MetricRecord::new("C2ST", 0.5, "TaskA", "NPE", 100, 2)
            .with_meta("tau_m", json!(1.0))
            .with_meta("seed", json!(7))
            .with_meta("note", Value::Null);
        assert_eq!(record.columns()[6..], ["note", "seed", "tau_m"]);
        assert_eq!(
            record.cells(),
            vec!["C2ST", "0.5", "TaskA", "NPE", "100", "2", "NA", "7", "1.0"]
        );
    }

    #[test]
    fn metadata_cannot_shadow_base_columns() {
        let record = MetricRecord::new("C2ST", 0.5, "T", "M", 1, 0).with_meta("value", json!(3));
        assert!(matches!(record.validate(), Err(Error::ReservedColumn(k)) if k == "value"));
    }

    #[test]
    fn missing_markers() {
        assert!(is_missing(""));
        assert!(is_missing("NA"));
        assert!(is_missing("NaN"));
        assert!(!is_missing("0"));
    }
}
