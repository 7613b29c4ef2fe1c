//! Per-metric series for plotting: mean and spread of a metric against one
//! grouping column of a consolidated table.

use crate::consolidate::ConsolidatedTable;
use crate::csv;
use bench_core::{atomic_write_bytes, ensure_dir, Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub x: String,
    pub mean: f64,
    /// Sample standard deviation; zero for a single value.
    pub std: f64,
    pub count: usize,
}

pub fn summarize(table: &ConsolidatedTable, metric: &str, x_column: &str) -> Result<Vec<SeriesPoint>> {
    let x_idx = table
        .column_index(x_column)
        .ok_or_else(|| Error::MissingRequiredColumn(vec![x_column.to_string()]))?;
    let metric_idx = table
        .column_index("metric")
        .ok_or_else(|| Error::MissingRequiredColumn(vec!["metric".to_string()]))?;
    let value_idx = table
        .column_index("value")
        .ok_or_else(|| Error::MissingRequiredColumn(vec!["value".to_string()]))?;

    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in table.rows() {
        if !row[metric_idx]
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(metric))
        {
            continue;
        }
        let (Some(x), Some(value)) = (row[x_idx].as_deref(), row[value_idx].as_deref()) else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        if value.is_finite() {
            groups.entry(x.to_string()).or_default().push(value);
        }
    }

    let mut points: Vec<SeriesPoint> = groups
        .into_iter()
        .map(|(x, values)| {
            let (mean, std) = mean_std(&values);
            SeriesPoint {
                x,
                mean,
                std,
                count: values.len(),
            }
        })
        .collect();
    let numeric: Option<Vec<f64>> = points.iter().map(|p| p.x.parse::<f64>().ok()).collect();
    if let Some(keys) = numeric {
        let mut keyed: Vec<(f64, SeriesPoint)> = keys.into_iter().zip(points).collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        points = keyed.into_iter().map(|(_, p)| p).collect();
    }
    Ok(points)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Writes `summary__<metric>__vs__<x>.csv` with columns x, mean, std, count.
pub fn write_summary(
    points: &[SeriesPoint],
    metric: &str,
    x_column: &str,
    directory: &Path,
) -> Result<PathBuf> {
    ensure_dir(directory)?;
    let path = directory.join(format!("summary__{}__vs__{}.csv", metric, x_column));
    let mut text = csv::format_row(&[x_column, "mean", "std", "count"]);
    for p in points {
        text.push_str(&csv::format_row(&[
            p.x.clone(),
            p.mean.to_string(),
            p.std.to_string(),
            p.count.to_string(),
        ]));
    }
    atomic_write_bytes(&path, text.as_bytes())?;
    info!(points = points.len(), path = %path.display(), "wrote metric summary");
    Ok(path)
}
