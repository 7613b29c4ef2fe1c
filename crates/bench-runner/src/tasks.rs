//! Benchmark problems: a prior, a simulator, reproducible observations and
//! a tractable reference posterior.

use crate::distribution::{DiagGaussian, Distribution};
use bench_core::{Error, Result, Tensor};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Beta, Distribution as _, StandardNormal};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub trait Task: Send + Sync {
    /// Class identity used as the leading component of artifact paths.
    fn identity(&self) -> &'static str;

    /// Named parameters rendered into the artifact path; empty when the task
    /// contributes no path segment.
    fn parameters(&self) -> BTreeMap<String, Value>;

    fn dim(&self) -> usize;

    fn prior(&self) -> &dyn Distribution;

    /// Simulates one observation per row of `theta` (`[n, dim]`).
    fn simulate(&self, theta: &Tensor, rng: &mut dyn RngCore) -> Tensor;

    /// Observation `idx`, identical on every call.
    fn observation(&self, idx: usize) -> Tensor;

    fn reference_posterior(&self, observation: &Tensor) -> Result<Box<dyn Distribution>>;

    /// Parameter that generated observation `idx`.
    fn true_parameter(&self, idx: usize) -> Tensor;
}

fn observation_vector(task: &dyn Task, observation: &Tensor) -> Result<Vec<f64>> {
    let x = observation.squeeze_leading();
    if x.shape().len() != 1 || x.ncols() != task.dim() {
        return Err(Error::InvalidRequest(format!(
            "{} expects a single observation of length {}, got shape {:?}",
            task.identity(),
            task.dim(),
            observation.shape()
        )));
    }
    Ok(x.into_data())
}

const LINEAR_GAUSSIAN_NOISE: f64 = 0.1;

/// `x = θ + ε` with `θ ~ N(0, I)` and `ε ~ N(0, 0.1 I)`.
#[derive(Debug, Clone)]
pub struct LinearGaussianTask {
    dim: usize,
    seed: u64,
    prior: DiagGaussian,
}

impl LinearGaussianTask {
    pub fn new(dim: usize, seed: u64) -> Self {
        Self {
            dim,
            seed,
            prior: DiagGaussian::isotropic(vec![0.0; dim], 1.0),
        }
    }

    fn ground_truth(&self, idx: usize) -> (Tensor, Tensor) {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(idx as u64);
        let theta = self.prior.sample(1, &mut rng);
        let x = self.simulate(&theta, &mut rng);
        (theta.squeeze_leading(), x.squeeze_leading())
    }
}

impl Default for LinearGaussianTask {
    fn default() -> Self {
        Self::new(2, 42)
    }
}

impl Task for LinearGaussianTask {
    fn identity(&self) -> &'static str {
        "LinearGaussianTask"
    }

    fn parameters(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("dim".to_string(), json!(self.dim)),
            ("observation_seed".to_string(), json!(self.seed)),
        ])
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn prior(&self) -> &dyn Distribution {
        &self.prior
    }

    fn simulate(&self, theta: &Tensor, rng: &mut dyn RngCore) -> Tensor {
        let noise_std = LINEAR_GAUSSIAN_NOISE.sqrt();
        let data = theta
            .data()
            .iter()
            .map(|t| {
                let z: f64 = StandardNormal.sample(&mut *rng);
                t + noise_std * z
            })
            .collect();
        Tensor::from_row_major(self.dim, data)
    }

    fn observation(&self, idx: usize) -> Tensor {
        self.ground_truth(idx).1
    }

    fn reference_posterior(&self, observation: &Tensor) -> Result<Box<dyn Distribution>> {
        let x = observation_vector(self, observation)?;
        let variance = 1.0 / (1.0 + 1.0 / LINEAR_GAUSSIAN_NOISE);
        let mean = x.iter().map(|v| variance * v / LINEAR_GAUSSIAN_NOISE).collect();
        Ok(Box::new(DiagGaussian::isotropic(mean, variance)))
    }

    fn true_parameter(&self, idx: usize) -> Tensor {
        self.ground_truth(idx).0
    }
}

/// Gaussian location model whose simulator is contaminated: with
/// probability `lambda_val` a draw comes from Beta(2, 5) in every
/// coordinate instead of `N(θ, tau_m I)`. Observations come from the
/// uncontaminated model `N(θ, I)`, so the reference posterior is
/// `N((x + 1) / 2, I / 2)` under the `N(1, I)` prior.
#[derive(Debug, Clone)]
pub struct LikelihoodMisspecifiedTask {
    dim: usize,
    tau_m: f64,
    lambda_val: f64,
    prior: DiagGaussian,
    contamination: Beta<f64>,
}

impl LikelihoodMisspecifiedTask {
    pub fn new(dim: usize, tau_m: f64, lambda_val: f64) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidRequest("dim must be at least 1".to_string()));
        }
        if !(tau_m.is_finite() && tau_m > 0.0) {
            return Err(Error::InvalidRequest(format!("tau_m must be positive, got {}", tau_m)));
        }
        if !(0.0..=1.0).contains(&lambda_val) {
            return Err(Error::InvalidRequest(format!(
                "lambda_val must lie in [0, 1], got {}",
                lambda_val
            )));
        }
        let contamination =
            Beta::new(2.0, 5.0).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        Ok(Self {
            dim,
            tau_m,
            lambda_val,
            prior: DiagGaussian::isotropic(vec![1.0; dim], 1.0),
            contamination,
        })
    }

    fn ground_truth(&self, idx: usize) -> (Tensor, Tensor) {
        let mut rng = ChaCha20Rng::seed_from_u64(idx as u64);
        let theta = self.prior.draw(&mut rng);
        let x = DiagGaussian::isotropic(theta.clone(), 1.0).draw(&mut rng);
        (Tensor::vector(theta), Tensor::vector(x))
    }
}

impl Task for LikelihoodMisspecifiedTask {
    fn identity(&self) -> &'static str {
        "LikelihoodMisspecifiedTask"
    }

    fn parameters(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("dim".to_string(), json!(self.dim)),
            ("lambda_val".to_string(), json!(self.lambda_val)),
            ("tau_m".to_string(), json!(self.tau_m)),
        ])
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn prior(&self) -> &dyn Distribution {
        &self.prior
    }

    fn simulate(&self, theta: &Tensor, rng: &mut dyn RngCore) -> Tensor {
        let noise_std = self.tau_m.sqrt();
        let mut data = Vec::with_capacity(theta.data().len());
        for row in theta.rows() {
            if rng.gen_bool(self.lambda_val) {
                data.extend(row.iter().map(|_| self.contamination.sample(&mut *rng)));
            } else {
                data.extend(row.iter().map(|t| {
                    let z: f64 = StandardNormal.sample(&mut *rng);
                    t + noise_std * z
                }));
            }
        }
        Tensor::from_row_major(self.dim, data)
    }

    fn observation(&self, idx: usize) -> Tensor {
        self.ground_truth(idx).1
    }

    fn reference_posterior(&self, observation: &Tensor) -> Result<Box<dyn Distribution>> {
        let x = observation_vector(self, observation)?;
        let mean = x.iter().map(|v| 0.5 * (v + 1.0)).collect();
        Ok(Box::new(DiagGaussian::isotropic(mean, 0.5)))
    }

    fn true_parameter(&self, idx: usize) -> Tensor {
        self.ground_truth(idx).0
    }
}

/// Closed set of tasks addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    LinearGaussian,
    LikelihoodMisspecified,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::LinearGaussian, TaskKind::LikelihoodMisspecified];

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.name()).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::LinearGaussian => "linear_gaussian",
            TaskKind::LikelihoodMisspecified => "likelihood_misspecified",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| Error::UnknownTask {
                task: name.to_string(),
                supported: Self::names(),
            })
    }

    /// Parameter names accepted by [`TaskKind::build`].
    pub fn accepted_params(self) -> &'static [&'static str] {
        match self {
            TaskKind::LinearGaussian => &["dim", "observation_seed"],
            TaskKind::LikelihoodMisspecified => &["dim", "lambda_val", "tau_m"],
        }
    }

    pub fn build(self, params: &BTreeMap<String, Value>) -> Result<Box<dyn Task>> {
        if let Some(unknown) = params
            .keys()
            .find(|k| !self.accepted_params().contains(&k.as_str()))
        {
            return Err(Error::InvalidRequest(format!(
                "task `{}` does not accept parameter `{}` (accepted: {:?})",
                self.name(),
                unknown,
                self.accepted_params()
            )));
        }
        let dim = usize_param(params, "dim")?.unwrap_or(2);
        match self {
            TaskKind::LinearGaussian => {
                let seed = usize_param(params, "observation_seed")?.unwrap_or(42) as u64;
                if dim == 0 {
                    return Err(Error::InvalidRequest("dim must be at least 1".to_string()));
                }
                Ok(Box::new(LinearGaussianTask::new(dim, seed)))
            }
            TaskKind::LikelihoodMisspecified => {
                let tau_m = f64_param(params, "tau_m")?
                    .ok_or_else(|| Error::InvalidRequest("missing task parameter `tau_m`".to_string()))?;
                let lambda_val = f64_param(params, "lambda_val")?.ok_or_else(|| {
                    Error::InvalidRequest("missing task parameter `lambda_val`".to_string())
                })?;
                Ok(Box::new(LikelihoodMisspecifiedTask::new(dim, tau_m, lambda_val)?))
            }
        }
    }
}

/// Looks up a task by name and builds it from its parameters.
pub fn build_task(name: &str, params: &BTreeMap<String, Value>) -> Result<Box<dyn Task>> {
    TaskKind::from_name(name)?.build(params)
}

fn usize_param(params: &BTreeMap<String, Value>, key: &str) -> Result<Option<usize>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::InvalidRequest(format!("task parameter `{}` must be a non-negative integer, got {}", key, v))),
    }
}

fn f64_param(params: &BTreeMap<String, Value>, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::InvalidRequest(format!("task parameter `{}` must be a number, got {}", key, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_of(samples: &Tensor, col: usize) -> f64 {
        samples.rows().map(|r| r[col]).sum::<f64>() / samples.nrows() as f64
    }

    #[test]
    fn observations_are_reproducible() {
        let task = LinearGaussianTask::default();
        assert_eq!(task.observation(3), task.observation(3));
        assert_ne!(task.observation(0), task.observation(1));
        assert_eq!(task.observation(0).shape(), &[2]);

        let other = LinearGaussianTask::new(2, 7);
        assert_ne!(task.observation(0), other.observation(0));
    }

    #[test]
    fn linear_gaussian_posterior_shrinks_towards_prior_mean() {
        let task = LinearGaussianTask::default();
        let x = Tensor::vector(vec![1.1, -2.2]);
        let post = task.reference_posterior(&x).expect("posterior");
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let samples = post.sample(4000, &mut rng);
        assert!((mean_of(&samples, 0) - 1.0).abs() < 0.03);
        assert!((mean_of(&samples, 1) + 2.0).abs() < 0.03);
    }

    #[test]
    fn reference_posterior_accepts_batched_single_observation() {
        let task = LinearGaussianTask::default();
        let batched = Tensor::from_rows(&[vec![0.0, 0.0]]).expect("tensor");
        assert!(task.reference_posterior(&batched).is_ok());
        let wrong = Tensor::vector(vec![0.0; 3]);
        assert!(matches!(
            task.reference_posterior(&wrong),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn misspecified_true_parameter_is_seeded_by_index() {
        let task = LikelihoodMisspecifiedTask::new(3, 1.0, 0.5).expect("task");
        assert_eq!(task.true_parameter(4), task.true_parameter(4));
        assert_eq!(task.true_parameter(4).shape(), &[3]);
        assert_eq!(task.observation(2), task.observation(2));
        let post = task
            .reference_posterior(&Tensor::vector(vec![3.0, 1.0, -1.0]))
            .expect("posterior");
        assert_eq!(post.dim(), 3);
    }

    #[test]
    fn full_contamination_draws_from_beta() {
        let task = LikelihoodMisspecifiedTask::new(2, 1.0, 1.0).expect("task");
        let theta = Tensor::from_rows(&vec![vec![50.0, -50.0]; 200]).expect("theta");
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let x = task.simulate(&theta, &mut rng);
        assert_eq!(x.shape(), &[200, 2]);
        assert!(x.data().iter().all(|v| (0.0..=1.0).contains(v)));

        let clean = LikelihoodMisspecifiedTask::new(2, 1.0, 0.0).expect("task");
        let x = clean.simulate(&theta, &mut rng);
        assert!((mean_of(&x, 0) - 50.0).abs() < 0.5);
    }

    #[test]
    fn registry_builds_by_name() {
        let params = BTreeMap::from([
            ("dim".to_string(), json!(2)),
            ("lambda_val".to_string(), json!(0.5)),
            ("tau_m".to_string(), json!(1)),
        ]);
        let task = build_task("likelihood_misspecified", &params).expect("task");
        assert_eq!(task.identity(), "LikelihoodMisspecifiedTask");
        assert_eq!(task.parameters()["tau_m"], json!(1.0));

        let task = build_task("linear_gaussian", &BTreeMap::new()).expect("task");
        assert_eq!(task.parameters()["dim"], json!(2));
        assert_eq!(task.parameters()["observation_seed"], json!(42));

        assert!(matches!(
            build_task("two_moons", &BTreeMap::new()),
            Err(Error::UnknownTask { .. })
        ));
        assert!(matches!(
            build_task("likelihood_misspecified", &BTreeMap::new()),
            Err(Error::InvalidRequest(_))
        ));
        let typo = BTreeMap::from([("tau".to_string(), json!(1.0))]);
        assert!(matches!(build_task("linear_gaussian", &typo), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn linear_gaussian_configurations_get_distinct_directories() {
        let root = bench_core::OutputRoot::new("/tmp/out");
        let dir_for = |params: BTreeMap<String, Value>| {
            let task = build_task("linear_gaussian", &params).expect("task");
            bench_core::RunKey::new(task.identity(), "NPE", 100)
                .with_params(task.parameters())
                .observation_dir(&root, 0)
        };
        let two = dir_for(BTreeMap::from([("dim".to_string(), json!(2))]));
        let three = dir_for(BTreeMap::from([("dim".to_string(), json!(3))]));
        let reseeded = dir_for(BTreeMap::from([("observation_seed".to_string(), json!(7))]));
        assert_ne!(two, three);
        assert_ne!(two, reseeded);
        assert_eq!(
            two,
            std::path::PathBuf::from("/tmp/out/LinearGaussianTask_NPE/dim_2_observation_seed_42/sims_100/obs_0")
        );
    }
}
