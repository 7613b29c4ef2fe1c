//! Inference Runner: one training phase, then one posterior draw and one
//! persisted artifact per observation.

use crate::inference::{Estimator, Method};
use crate::tasks::Task;
use bench_core::{ArtifactStore, Error, Result, RunKey, Tensor, WritePolicy};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// RunKey for `task` under `method` at a simulation budget: the task's class
/// identity plus its named parameters.
pub fn run_key_for(task: &dyn Task, method: Method, num_simulations: usize) -> RunKey {
    RunKey::new(task.identity(), method.as_str(), num_simulations).with_params(task.parameters())
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub method: Method,
    pub num_simulations: usize,
    pub num_posterior_samples: usize,
    pub num_observations: usize,
    pub seed: Option<u64>,
    /// Persisted as `config_used.yaml` next to every observation.
    pub config_snapshot: Option<Value>,
    pub write_policy: WritePolicy,
}

impl InferenceRequest {
    /// Fails with `UnsupportedMethod` for names outside the closed set.
    pub fn new(
        method: &str,
        num_simulations: usize,
        num_posterior_samples: usize,
        num_observations: usize,
    ) -> Result<Self> {
        Ok(Self {
            method: method.parse()?,
            num_simulations,
            num_posterior_samples,
            num_observations,
            seed: None,
            config_snapshot: None,
            write_policy: WritePolicy::Overwrite,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_config(mut self, snapshot: Value) -> Self {
        self.config_snapshot = Some(snapshot);
        self
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_simulations", self.num_simulations),
            ("num_posterior_samples", self.num_posterior_samples),
            ("num_observations", self.num_observations),
        ] {
            if value == 0 {
                return Err(Error::InvalidRequest(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    pub run_key: RunKey,
    /// The seed actually used, generated when the request had none.
    pub seed: u64,
    pub observation_dirs: Vec<PathBuf>,
    /// Samples for the last observation processed.
    pub last_samples: Tensor,
}

/// Draws `num_simulations` parameters from the prior, simulates them and
/// trains one estimator.
pub fn train_estimator<'a>(
    task: &'a dyn Task,
    method: Method,
    num_simulations: usize,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Estimator + 'a>> {
    let theta = task.prior().sample(num_simulations, rng);
    let x = task.simulate(&theta, rng);
    method.procedure().train(task.prior(), &theta, &x, rng)
}

pub fn sample_from_posterior(
    estimator: &dyn Estimator,
    observation: &Tensor,
    num_samples: usize,
    rng: &mut dyn RngCore,
) -> Result<Tensor> {
    estimator.sample_posterior(observation, num_samples, rng)
}

/// Random seed in `[0, 2^32)` for runs that did not pin one.
pub fn generate_seed() -> u64 {
    u64::from(rand::random::<u32>())
}

/// Trains once, then samples and persists every observation in order.
///
/// Externally supplied `observations` replace the task's own and must hold
/// exactly `num_observations` entries. A training failure leaves no
/// artifacts; a failed write leaves earlier observations in place.
pub fn run_inference(
    store: &ArtifactStore,
    task: &dyn Task,
    request: &InferenceRequest,
    observations: Option<&[Tensor]>,
) -> Result<InferenceOutcome> {
    request.validate()?;
    if let Some(obs) = observations {
        if obs.len() != request.num_observations {
            return Err(Error::InvalidRequest(format!(
                "{} observations supplied for num_observations={}",
                obs.len(),
                request.num_observations
            )));
        }
    }
    let seed = match request.seed {
        Some(seed) => seed,
        None => {
            let seed = generate_seed();
            info!(seed, "generated random seed");
            seed
        }
    };
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let run_key = run_key_for(task, request.method, request.num_simulations);

    info!(
        run = %run_key,
        method = %request.method,
        num_simulations = request.num_simulations,
        seed,
        "training estimator"
    );
    let started = Instant::now();
    let estimator = train_estimator(task, request.method, request.num_simulations, &mut rng)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "training finished");

    let mut observation_dirs = Vec::with_capacity(request.num_observations);
    let mut last_samples = None;
    for idx in 0..request.num_observations {
        let observation = match observations {
            Some(obs) => obs[idx].clone(),
            None => task.observation(idx),
        };
        let samples = sample_from_posterior(
            estimator.as_ref(),
            &observation,
            request.num_posterior_samples,
            &mut rng,
        )?;
        let dir = store.write_with_policy(
            &run_key,
            idx,
            &samples,
            &observation,
            request.config_snapshot.as_ref(),
            request.write_policy,
        )?;
        debug!(observation_idx = idx, samples = samples.nrows(), "sampled posterior");
        observation_dirs.push(dir);
        last_samples = Some(samples);
    }
    let last_samples = last_samples
        .ok_or_else(|| Error::InvalidRequest("num_observations must be at least 1".to_string()))?;
    info!(
        run = %run_key,
        observations = observation_dirs.len(),
        "inference run complete"
    );
    Ok(InferenceOutcome {
        run_key,
        seed,
        observation_dirs,
        last_samples,
    })
}
