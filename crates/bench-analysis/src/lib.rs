//! Tabular results: the metric record schema, append/overwrite ledgers,
//! consolidation of many ledgers into one table, and per-metric summaries
//! for plotting.

pub mod consolidate;
pub mod csv;
pub mod ledger;
pub mod schema;
pub mod summary;

pub use consolidate::{
    consolidate, consolidate_to, discover_metric_files, ConsolidatedTable, CONSOLIDATED_FILE,
};
pub use ledger::{
    append_or_write, read_ledger, records_from_scores, write_result_dump, DumpFormat,
    LedgerTable, LedgerTarget, WriteMode, METRICS_FILE,
};
pub use schema::{canonical_columns, MetricRecord, BASE_COLUMNS, MISSING_MARKER};
pub use summary::{summarize, write_summary, SeriesPoint};
