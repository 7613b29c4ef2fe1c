use crate::csv;
use crate::schema::{render_cell, MetricRecord};
use bench_core::{
    atomic_write_bytes, atomic_write_json_pretty, create_unique_path, ensure_dir, Error, Result, DEFAULT_SEPARATOR,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Per-observation ledger name inside `obs_<i>/`.
pub const METRICS_FILE: &str = "metrics.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Write,
    Append,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "write" | "overwrite" | "w" => Ok(WriteMode::Write),
            "append" | "a" => Ok(WriteMode::Append),
            _ => Err(Error::InvalidFileMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTarget {
    File(PathBuf),
    /// A fresh `<method>__<task>.csv` (uniquified) inside the directory.
    Auto { directory: PathBuf },
}

/// A ledger file as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Persists `records`. In append mode an existing file's header must equal
/// the records' canonical columns exactly; auto-named targets are always
/// new files.
pub fn append_or_write(
    records: &[MetricRecord],
    target: &LedgerTarget,
    mode: WriteMode,
) -> Result<PathBuf> {
    let first = records.first().ok_or(Error::EmptyResults)?;
    let (path, mode) = match target {
        LedgerTarget::File(path) => (path.clone(), mode),
        LedgerTarget::Auto { directory } => {
            let stem = format!("{}__{}", first.method, first.task);
            let path = create_unique_path(directory, &stem, ".csv", DEFAULT_SEPARATOR)?;
            (path, WriteMode::Write)
        }
    };

    let columns = first.columns();
    for record in records {
        record.validate()?;
        let record_columns = record.columns();
        if record_columns != columns {
            return Err(Error::SchemaMismatch {
                path,
                existing: columns,
                incoming: record_columns,
            });
        }
    }

    let mut body = String::new();
    for record in records {
        body.push_str(&csv::format_row(&record.cells()));
    }

    let existing = match mode {
        WriteMode::Append => existing_header(&path)?,
        WriteMode::Write => None,
    };
    match existing {
        Some((header, ends_with_newline)) => {
            if header != columns {
                return Err(Error::SchemaMismatch {
                    path,
                    existing: header,
                    incoming: columns,
                });
            }
            let mut file = fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|e| Error::io(&path, e))?;
            if !ends_with_newline {
                body.insert(0, '\n');
            }
            file.write_all(body.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| Error::io(&path, e))?;
        }
        None => {
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
            let mut text = csv::format_row(&columns);
            text.push_str(&body);
            atomic_write_bytes(&path, text.as_bytes())?;
        }
    }
    info!(rows = records.len(), path = %path.display(), "saved metric rows");
    Ok(path)
}

/// Header of an existing, non-empty ledger and whether it ends in a newline.
fn existing_header(path: &Path) -> Result<Option<(Vec<String>, bool)>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let table = parse_table(path, &text)?;
    Ok(Some((table.columns, text.ends_with('\n'))))
}

pub fn read_ledger(path: &Path) -> Result<LedgerTable> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_table(path, &text)
}

fn parse_table(path: &Path, text: &str) -> Result<LedgerTable> {
    let mut records = csv::parse(text).map_err(|message| Error::Csv {
        path: path.to_path_buf(),
        message,
    })?;
    if records.is_empty() {
        return Err(Error::Csv {
            path: path.to_path_buf(),
            message: "file has no header".to_string(),
        });
    }
    let columns: Vec<String> = records.remove(0).into_iter().map(|c| c.trim().to_string()).collect();
    if columns.iter().any(|c| c.is_empty()) {
        return Err(Error::Csv {
            path: path.to_path_buf(),
            message: "header contains an empty column name".to_string(),
        });
    }
    for (i, row) in records.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(Error::Csv {
                path: path.to_path_buf(),
                message: format!(
                    "row {} has {} fields, header has {}",
                    i + 2,
                    row.len(),
                    columns.len()
                ),
            });
        }
    }
    Ok(LedgerTable {
        columns,
        rows: records,
    })
}

/// One record per `(metric, value)` pair, all sharing the same identity and
/// metadata.
pub fn records_from_scores(
    scores: &BTreeMap<String, f64>,
    task: &str,
    method: &str,
    num_simulations: usize,
    observation_idx: usize,
    metadata: &BTreeMap<String, Value>,
) -> Vec<MetricRecord> {
    scores
        .iter()
        .map(|(metric, value)| {
            let mut record =
                MetricRecord::new(metric, *value, task, method, num_simulations, observation_idx);
            record.metadata = metadata.clone();
            record
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Json,
    Csv,
}

impl FromStr for DumpFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DumpFormat::Json),
            "csv" => Ok(DumpFormat::Csv),
            _ => Err(Error::InvalidDumpFormat(s.to_string())),
        }
    }
}

impl DumpFormat {
    fn extension(self) -> &'static str {
        match self {
            DumpFormat::Json => ".json",
            DumpFormat::Csv => ".csv",
        }
    }
}

/// Writes a flat result object (plus a UTC `timestamp`) to a new,
/// uniquified file `<stem>.<ext>` in `directory`.
pub fn write_result_dump(
    fields: &BTreeMap<String, Value>,
    directory: &Path,
    stem: &str,
    format: DumpFormat,
) -> Result<PathBuf> {
    if fields.is_empty() {
        return Err(Error::EmptyResults);
    }
    let path = create_unique_path(directory, stem, format.extension(), DEFAULT_SEPARATOR)?;
    let mut row = fields.clone();
    row.entry("timestamp".to_string()).or_insert_with(|| {
        Value::String(Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
    });
    match format {
        DumpFormat::Json => {
            let object: Map<String, Value> = row.into_iter().collect();
            atomic_write_json_pretty(&path, &Value::Object(object))?;
        }
        DumpFormat::Csv => {
            let header: Vec<&str> = row.keys().map(String::as_str).collect();
            let cells: Vec<String> = row.values().map(render_cell).collect();
            let mut text = csv::format_row(&header);
            text.push_str(&csv::format_row(&cells));
            atomic_write_bytes(&path, text.as_bytes())?;
        }
    }
    info!(path = %path.display(), "saved result dump");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_root(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "bench_ledger_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        root
    }

    fn record(metric: &str, obs: usize) -> MetricRecord {
        MetricRecord::new(metric, 0.75, "TaskA", "NPE", 100, obs).with_meta("seed", json!(1))
    }

    #[test]
    fn write_mode_truncates_and_writes_header() {
        let root = temp_root("write");
        let target = LedgerTarget::File(root.join("report.csv"));
        append_or_write(&[record("a", 0)], &target, WriteMode::Append).expect("first");
        let path = append_or_write(&[record("b", 0)], &target, WriteMode::Write).expect("second");
        let table = read_ledger(&path).expect("read");
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], "b");
        assert_eq!(table.columns.last().map(String::as_str), Some("seed"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn append_with_matching_schema_accumulates_rows() {
        let root = temp_root("append");
        let target = LedgerTarget::File(root.join("sub").join("accumulate.csv"));
        let first = append_or_write(&[record("m1", 0)], &target, WriteMode::Append).expect("first");
        let second = append_or_write(&[record("m2", 1), record("m3", 1)], &target, WriteMode::Append)
            .expect("second");
        assert_eq!(first, second);
        let table = read_ledger(&first).expect("read");
        let metrics: Vec<&str> = table.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(metrics, vec!["m1", "m2", "m3"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn append_with_different_metadata_fails() {
        let root = temp_root("mismatch");
        let target = LedgerTarget::File(root.join("ledger.csv"));
        append_or_write(&[record("m1", 0)], &target, WriteMode::Append).expect("first");
        let other = MetricRecord::new("m2", 0.1, "TaskA", "NPE", 100, 0).with_meta("tau_m", json!(0.5));
        let err = append_or_write(&[other], &target, WriteMode::Append).expect_err("mismatch");
        assert!(matches!(err, Error::SchemaMismatch { .. }), "got {:?}", err);
        assert_eq!(read_ledger(&root.join("ledger.csv")).expect("read").rows.len(), 1);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn records_in_one_call_must_share_columns() {
        let root = temp_root("mixed");
        let target = LedgerTarget::File(root.join("mixed.csv"));
        let plain = MetricRecord::new("m", 0.1, "T", "M", 1, 0);
        let err = append_or_write(&[record("m", 0), plain], &target, WriteMode::Write)
            .expect_err("mixed columns");
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(!root.join("mixed.csv").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn empty_records_are_rejected() {
        let root = temp_root("empty");
        let err = append_or_write(&[], &LedgerTarget::File(root.join("x.csv")), WriteMode::Write)
            .expect_err("empty");
        assert!(matches!(err, Error::EmptyResults));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn auto_names_never_collide() {
        let root = temp_root("auto");
        let target = LedgerTarget::Auto {
            directory: root.clone(),
        };
        let a = append_or_write(&[record("m", 0)], &target, WriteMode::Append).expect("a");
        let b = append_or_write(&[record("m", 0)], &target, WriteMode::Append).expect("b");
        assert_eq!(a.file_name().unwrap(), "NPE__TaskA.csv");
        assert_eq!(b.file_name().unwrap(), "NPE__TaskA__1.csv");
        assert_eq!(read_ledger(&a).expect("a rows").rows.len(), 1);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn write_mode_parsing() {
        assert_eq!("append".parse::<WriteMode>().expect("append"), WriteMode::Append);
        assert_eq!("WRITE".parse::<WriteMode>().expect("write"), WriteMode::Write);
        assert!(matches!(
            "invalid".parse::<WriteMode>(),
            Err(Error::InvalidFileMode(_))
        ));
    }

    #[test]
    fn dump_format_parsing() {
        assert_eq!("JSON".parse::<DumpFormat>().expect("json"), DumpFormat::Json);
        let err = "xml".parse::<DumpFormat>().expect_err("unsupported");
        assert!(matches!(err, Error::InvalidDumpFormat(ref f) if f == "xml"));
        assert!(err.to_string().contains("`json` or `csv`"), "{}", err);
        assert_eq!(err.code(), "invalid_dump_format");
    }

    #[test]
    fn scores_become_one_record_per_metric() {
        let mut scores = BTreeMap::new();
        scores.insert("C2ST".to_string(), 0.6);
        scores.insert("PPC".to_string(), 0.2);
        let mut meta = BTreeMap::new();
        meta.insert("seed".to_string(), json!(3));
        let records = records_from_scores(&scores, "T", "NLE", 50, 4, &meta);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.observation_idx == 4 && r.metadata == meta));
    }

    #[test]
    fn result_dumps_are_uniquified() {
        let root = temp_root("dump");
        let mut fields = BTreeMap::new();
        fields.insert("method".to_string(), json!("NPE"));
        fields.insert("C2ST".to_string(), json!(0.84));
        let a = write_result_dump(&fields, &root, "NPE__task__seed1", DumpFormat::Json).expect("a");
        let b = write_result_dump(&fields, &root, "NPE__task__seed1", DumpFormat::Json).expect("b");
        assert_ne!(a, b);
        let parsed: Value = serde_json::from_slice(&fs::read(&a).expect("read")).expect("json");
        assert_eq!(parsed["C2ST"], json!(0.84));
        assert!(parsed["timestamp"].is_string());

        let c = write_result_dump(&fields, &root, "flat", DumpFormat::Csv).expect("csv");
        let table = read_ledger(&c).expect("csv dump");
        assert_eq!(table.columns, vec!["C2ST", "method", "timestamp"]);
        assert_eq!(table.rows[0][1], "NPE");
        let _ = fs::remove_dir_all(root);
    }
}
