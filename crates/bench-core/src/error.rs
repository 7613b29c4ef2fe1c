use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("method `{method}` is not supported; choose from {supported:?}")]
    UnsupportedMethod {
        method: String,
        supported: Vec<&'static str>,
    },
    #[error("unknown task `{task}`; choose from {supported:?}")]
    UnknownTask {
        task: String,
        supported: Vec<&'static str>,
    },
    #[error("unknown metric `{metric}`; choose from {supported:?}")]
    UnknownMetric {
        metric: String,
        supported: Vec<&'static str>,
    },
    #[error("artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },
    #[error("no posterior samples for {run} obs {observation_idx} (expected {})", path.display())]
    MissingArtifact {
        run: String,
        observation_idx: usize,
        path: PathBuf,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("estimator training failed: {0}")]
    Training(String),
    #[error("no results to save")]
    EmptyResults,
    #[error("unsupported file mode `{0}`; use `write` or `append`")]
    InvalidFileMode(String),
    #[error("unsupported dump format `{0}`; use `json` or `csv`")]
    InvalidDumpFormat(String),
    #[error("metadata key `{0}` collides with a base column")]
    ReservedColumn(String),
    #[error("header mismatch in {}:\n  existing: {existing:?}\n  incoming: {incoming:?}", path.display())]
    SchemaMismatch {
        path: PathBuf,
        existing: Vec<String>,
        incoming: Vec<String>,
    },
    #[error("no metrics files under {}", root.display())]
    NoFilesFound { root: PathBuf },
    #[error("failed to read any of {attempted} metrics files under {}", root.display())]
    AllReadsFailed { root: PathBuf, attempted: usize },
    #[error("missing required columns: {0:?}")]
    MissingRequiredColumn(Vec<String>),
    #[error("required columns contain missing values: {0:?}")]
    MissingRequiredValue(Vec<String>),
    #[error("malformed csv in {}: {message}", path.display())]
    Csv { path: PathBuf, message: String },
    #[error("corrupt tensor blob: {0}")]
    Codec(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code, used by the CLI's JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedMethod { .. } => "unsupported_method",
            Error::UnknownTask { .. } => "unknown_task",
            Error::UnknownMetric { .. } => "unknown_metric",
            Error::ArtifactNotFound { .. } => "artifact_not_found",
            Error::MissingArtifact { .. } => "missing_artifact",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Training(_) => "training_failed",
            Error::EmptyResults => "empty_results",
            Error::InvalidFileMode(_) => "invalid_file_mode",
            Error::InvalidDumpFormat(_) => "invalid_dump_format",
            Error::ReservedColumn(_) => "reserved_column",
            Error::SchemaMismatch { .. } => "schema_mismatch",
            Error::NoFilesFound { .. } => "no_files_found",
            Error::AllReadsFailed { .. } => "all_reads_failed",
            Error::MissingRequiredColumn(_) => "missing_required_column",
            Error::MissingRequiredValue(_) => "missing_required_value",
            Error::Csv { .. } => "malformed_csv",
            Error::Codec(_) => "corrupt_tensor",
            Error::Config(_) => "invalid_config",
            Error::Io { .. } => "io_error",
            Error::Json(_) => "json_error",
            Error::Yaml(_) => "yaml_error",
        }
    }
}
