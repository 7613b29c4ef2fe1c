//! Per-observation artifact persistence.
//!
//! Layout: `<root>/<Task>_<METHOD>/[<params>/]sims_<N>/obs_<i>/` holding
//! `posterior_samples.tensor`, `x_obs.tensor` and optionally
//! `config_used.yaml`. The store owns these subtrees; nothing else writes
//! there besides the per-observation metrics ledger.

use crate::error::{Error, Result};
use crate::fsutil::{atomic_write_bytes, ensure_dir};
use crate::naming::{unique_sibling, DEFAULT_SEPARATOR};
use crate::run_key::{OutputRoot, RunKey};
use crate::tensor::Tensor;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SAMPLES_FILE: &str = "posterior_samples.tensor";
pub const OBSERVATION_FILE: &str = "x_obs.tensor";
pub const CONFIG_FILE: &str = "config_used.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Replace whatever sits at the deterministic path.
    #[default]
    Overwrite,
    /// Move an existing `obs_<i>` aside to `obs_<i>__N` before writing.
    PreserveExisting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationArtifact {
    pub samples: Tensor,
    pub observation: Tensor,
    pub config: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: OutputRoot,
}

impl ArtifactStore {
    pub fn new(root: OutputRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &OutputRoot {
        &self.root
    }

    pub fn observation_dir(&self, key: &RunKey, observation_idx: usize) -> PathBuf {
        key.observation_dir(&self.root, observation_idx)
    }

    pub fn samples_path(&self, key: &RunKey, observation_idx: usize) -> PathBuf {
        self.observation_dir(key, observation_idx).join(SAMPLES_FILE)
    }

    pub fn write(
        &self,
        key: &RunKey,
        observation_idx: usize,
        samples: &Tensor,
        observation: &Tensor,
        config: Option<&Value>,
    ) -> Result<PathBuf> {
        self.write_with_policy(
            key,
            observation_idx,
            samples,
            observation,
            config,
            WritePolicy::Overwrite,
        )
    }

    pub fn write_with_policy(
        &self,
        key: &RunKey,
        observation_idx: usize,
        samples: &Tensor,
        observation: &Tensor,
        config: Option<&Value>,
        policy: WritePolicy,
    ) -> Result<PathBuf> {
        let dir = self.observation_dir(key, observation_idx);
        if policy == WritePolicy::PreserveExisting && dir.exists() {
            let archived = unique_sibling(&dir, DEFAULT_SEPARATOR);
            fs::rename(&dir, &archived).map_err(|e| Error::io(&dir, e))?;
            info!(
                from = %dir.display(),
                to = %archived.display(),
                "preserved previous observation artifact"
            );
        }
        ensure_dir(&dir)?;
        atomic_write_bytes(&dir.join(SAMPLES_FILE), &samples.encode())?;
        atomic_write_bytes(&dir.join(OBSERVATION_FILE), &observation.encode())?;
        let config_path = dir.join(CONFIG_FILE);
        match config {
            Some(config) => {
                let yaml = serde_yaml::to_string(config)?;
                atomic_write_bytes(&config_path, yaml.as_bytes())?;
            }
            None if config_path.exists() => {
                // A stale snapshot would misdescribe the fresh samples.
                fs::remove_file(&config_path).map_err(|e| Error::io(&config_path, e))?;
            }
            None => {}
        }
        debug!(
            run = %key,
            observation_idx,
            shape = ?samples.shape(),
            digest = %samples.digest(),
            dir = %dir.display(),
            "wrote observation artifact"
        );
        Ok(dir)
    }

    /// Loads samples and the stored observation; both must exist.
    pub fn read(&self, key: &RunKey, observation_idx: usize) -> Result<(Tensor, Tensor)> {
        let dir = self.observation_dir(key, observation_idx);
        let samples = read_tensor(&dir.join(SAMPLES_FILE))?;
        let observation = read_tensor(&dir.join(OBSERVATION_FILE))?;
        Ok((samples, observation))
    }

    pub fn read_artifact(&self, key: &RunKey, observation_idx: usize) -> Result<ObservationArtifact> {
        let (samples, observation) = self.read(key, observation_idx)?;
        let config = self.read_config(key, observation_idx)?;
        Ok(ObservationArtifact {
            samples,
            observation,
            config,
        })
    }

    pub fn read_samples(&self, key: &RunKey, observation_idx: usize) -> Result<Tensor> {
        read_tensor(&self.samples_path(key, observation_idx))
    }

    pub fn read_observation(&self, key: &RunKey, observation_idx: usize) -> Result<Option<Tensor>> {
        let path = self.observation_dir(key, observation_idx).join(OBSERVATION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_tensor(&path).map(Some)
    }

    pub fn read_config(&self, key: &RunKey, observation_idx: usize) -> Result<Option<Value>> {
        let path = self.observation_dir(key, observation_idx).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&raw)?;
        Ok(Some(serde_json::to_value(yaml)?))
    }
}

fn read_tensor(path: &Path) -> Result<Tensor> {
    match fs::read(path) {
        Ok(bytes) => Tensor::decode(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::ArtifactNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(Error::io(path, e)),
    }
}
