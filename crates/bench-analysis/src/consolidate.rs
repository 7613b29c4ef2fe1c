//! Merges every per-run metrics ledger under a directory into one table.
//!
//! Rows are identified by the identifying base columns plus every
//! non-volatile metadata column. Files are visited oldest first (ties by
//! path). When a file carries an identity already written by an earlier
//! file, its rows for that identity replace the earlier ones in place.
//! Rows sharing an identity within one file are all kept.

use crate::csv;
use crate::ledger::read_ledger;
use crate::schema::{canonical_columns, is_missing, BASE_COLUMNS, MISSING_MARKER, VOLATILE_COLUMNS};
use bench_core::{atomic_write_bytes, Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Output name at the `<Task>_<METHOD>/` level.
pub const CONSOLIDATED_FILE: &str = "metrics_all.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl ConsolidatedTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    /// Distinct present values of a column.
    pub fn distinct(&self, name: &str) -> BTreeSet<String> {
        self.column(name)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }

    pub fn to_csv(&self) -> String {
        let mut text = csv::format_row(&self.columns);
        for row in &self.rows {
            let cells: Vec<&str> = row
                .iter()
                .map(|c| c.as_deref().unwrap_or(MISSING_MARKER))
                .collect();
            text.push_str(&csv::format_row(&cells));
        }
        text
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        atomic_write_bytes(path, self.to_csv().as_bytes())
    }
}

/// Per-run ledgers under `root`: `metrics*.csv`, excluding consolidated
/// outputs (`metrics_all*.csv`) and hidden temp files.
pub fn discover_metric_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("metrics") && name.ends_with(".csv") && !name.starts_with("metrics_all")
        {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Consolidates `root` into `root/metrics_all.csv`.
pub fn consolidate(root: &Path) -> Result<ConsolidatedTable> {
    consolidate_to(root, &root.join(CONSOLIDATED_FILE))
}

pub fn consolidate_to(root: &Path, output: &Path) -> Result<ConsolidatedTable> {
    let files = discover_metric_files(root)?;
    if files.is_empty() {
        return Err(Error::NoFilesFound {
            root: root.to_path_buf(),
        });
    }
    let mut ordered: Vec<(SystemTime, PathBuf)> = files
        .into_iter()
        .map(|p| {
            let mtime = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (mtime, p)
        })
        .collect();
    ordered.sort();

    let attempted = ordered.len();
    let mut tables = Vec::new();
    for (_, path) in &ordered {
        match read_ledger(path) {
            Ok(table) => tables.push(table),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable metrics file"),
        }
    }
    if tables.is_empty() {
        return Err(Error::AllReadsFailed {
            root: root.to_path_buf(),
            attempted,
        });
    }

    let union: BTreeSet<&str> = tables
        .iter()
        .flat_map(|t| t.columns.iter().map(String::as_str))
        .collect();
    let missing_columns: Vec<String> = BASE_COLUMNS
        .iter()
        .filter(|c| !union.contains(*c))
        .map(|c| c.to_string())
        .collect();
    if !missing_columns.is_empty() {
        return Err(Error::MissingRequiredColumn(missing_columns));
    }
    let columns = canonical_columns(union.iter().copied());

    let mut files: Vec<Vec<Vec<Option<String>>>> = Vec::with_capacity(tables.len());
    for table in &tables {
        let mut rows = Vec::with_capacity(table.rows.len());
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| table.columns.iter().position(|tc| tc == c))
            .collect();
        for source in &table.rows {
            let row = positions
                .iter()
                .map(|pos| {
                    pos.map(|i| source[i].trim())
                        .filter(|cell| !is_missing(cell))
                        .map(str::to_string)
                })
                .collect();
            rows.push(row);
        }
        files.push(rows);
    }

    let null_columns: Vec<String> = BASE_COLUMNS
        .iter()
        .enumerate()
        .filter(|(i, _)| files.iter().flatten().any(|r| r[*i].is_none()))
        .map(|(_, c)| c.to_string())
        .collect();
    if !null_columns.is_empty() {
        return Err(Error::MissingRequiredValue(null_columns));
    }

    let table = ConsolidatedTable {
        rows: last_write_wins(&columns, files),
        columns,
    };
    table.write(output)?;
    info!(
        files = tables.len(),
        skipped = attempted - tables.len(),
        rows = table.len(),
        output = %output.display(),
        "consolidated metrics"
    );
    Ok(table)
}

fn last_write_wins(
    columns: &[String],
    files: Vec<Vec<Vec<Option<String>>>>,
) -> Vec<Vec<Option<String>>> {
    let identity: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() != "value" && !VOLATILE_COLUMNS.contains(&c.as_str()))
        .map(|(i, _)| i)
        .collect();
    // identity -> (file that last wrote it, slot in `groups`)
    let mut seen: HashMap<Vec<Option<String>>, (usize, usize)> = HashMap::new();
    let mut groups: Vec<Vec<Vec<Option<String>>>> = Vec::new();
    for (file_idx, rows) in files.into_iter().enumerate() {
        for row in rows {
            let key: Vec<Option<String>> = identity.iter().map(|i| row[*i].clone()).collect();
            match seen.get_mut(&key) {
                Some((owner, slot)) if *owner == file_idx => groups[*slot].push(row),
                Some((owner, slot)) => {
                    *owner = file_idx;
                    groups[*slot] = vec![row];
                }
                None => {
                    seen.insert(key, (file_idx, groups.len()));
                    groups.push(vec![row]);
                }
            }
        }
    }
    groups.into_iter().flatten().collect()
}
