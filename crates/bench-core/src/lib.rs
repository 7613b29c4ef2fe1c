//! Core building blocks for the benchmark pipeline: the error type, atomic
//! filesystem helpers, collision-avoiding path naming, run identities, the
//! tensor codec and the per-run artifact store.

pub mod error;
pub mod fsutil;
pub mod naming;
pub mod run_key;
pub mod store;
pub mod tensor;

pub use error::{Error, Result};
pub use fsutil::{
    atomic_write_bytes, atomic_write_json_pretty, ensure_dir, sha256_bytes,
};
pub use naming::{create_unique_path, unique_sibling, DEFAULT_SEPARATOR};
pub use run_key::{render_param_value, OutputRoot, RunKey};
pub use store::{
    ArtifactStore, ObservationArtifact, WritePolicy, CONFIG_FILE, OBSERVATION_FILE, SAMPLES_FILE,
};
pub use tensor::Tensor;
