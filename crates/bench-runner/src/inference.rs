//! Built-in inference procedures. Training and posterior sampling are two
//! separate operations: [`InferenceProcedure::train`] consumes simulations
//! once and yields an [`Estimator`] that can then be sampled for any number
//! of observations.

use crate::distribution::{DiagGaussian, Distribution};
use crate::numerics::{permutation, resample_indices, LinearModel, LogisticOptions, LogisticRegression};
use bench_core::{Error, Result, Tensor};
use rand::RngCore;
use rand_distr::{Distribution as _, StandardNormal};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const RIDGE: f64 = 1e-3;
const MIN_PROPOSALS: usize = 2000;
const PROPOSALS_PER_SAMPLE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Npe,
    Nle,
    Nre,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Npe, Method::Nle, Method::Nre];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Npe => "NPE",
            Method::Nle => "NLE",
            Method::Nre => "NRE",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }

    pub fn procedure(self) -> Box<dyn InferenceProcedure> {
        match self {
            Method::Npe => Box::new(PosteriorEstimation),
            Method::Nle => Box::new(LikelihoodEstimation),
            Method::Nre => Box::new(RatioEstimation::default()),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnsupportedMethod {
                method: s.to_string(),
                supported: Self::names(),
            })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait InferenceProcedure {
    /// Fits an estimator from paired simulations (`theta[i]` produced
    /// `x[i]`). The returned estimator may borrow the prior.
    fn train<'a>(
        &self,
        prior: &'a dyn Distribution,
        theta: &Tensor,
        x: &Tensor,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn Estimator + 'a>>;
}

pub trait Estimator {
    /// Draws `n` posterior samples (`[n, dim]`) conditioned on `observation`.
    fn sample_posterior(&self, observation: &Tensor, n: usize, rng: &mut dyn RngCore) -> Result<Tensor>;
}

/// Checks paired simulations and returns them as row vectors.
fn training_rows(theta: &Tensor, x: &Tensor, min_rows: usize) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    if theta.nrows() != x.nrows() {
        return Err(Error::Training(format!(
            "{} parameter rows but {} simulated rows",
            theta.nrows(),
            x.nrows()
        )));
    }
    if theta.nrows() < min_rows {
        return Err(Error::Training(format!(
            "need at least {} simulations, got {}",
            min_rows,
            theta.nrows()
        )));
    }
    if !theta.is_finite() || !x.is_finite() {
        return Err(Error::Training("simulations contain non-finite values".to_string()));
    }
    Ok((
        theta.rows().map(<[f64]>::to_vec).collect(),
        x.rows().map(<[f64]>::to_vec).collect(),
    ))
}

fn observation_row(observation: &Tensor, width: usize) -> Result<Vec<f64>> {
    let x = observation.squeeze_leading();
    if x.ncols() != width || x.nrows() != 1 {
        return Err(Error::InvalidRequest(format!(
            "observation shape {:?} does not match simulated data width {}",
            observation.shape(),
            width
        )));
    }
    if !x.is_finite() {
        return Err(Error::InvalidRequest("observation contains non-finite values".to_string()));
    }
    Ok(x.into_data())
}

fn residual_variance(model: &LinearModel, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> Vec<f64> {
    let outputs = targets[0].len();
    let dof = (inputs.len().saturating_sub(inputs[0].len() + 1)).max(1) as f64;
    let mut sse = vec![0.0; outputs];
    for (x, y) in inputs.iter().zip(targets) {
        for (s, (p, t)) in sse.iter_mut().zip(model.predict(x).iter().zip(y)) {
            *s += (t - p).powi(2);
        }
    }
    sse.into_iter().map(|s| (s / dof).max(1e-12)).collect()
}

/// Proposals from the prior reweighted by `log_weight` and resampled.
fn importance_resample(
    prior: &dyn Distribution,
    n: usize,
    rng: &mut dyn RngCore,
    log_weight: impl Fn(&[f64]) -> f64,
) -> Result<Tensor> {
    let proposals = prior.sample((n * PROPOSALS_PER_SAMPLE).max(MIN_PROPOSALS), rng);
    let weights: Vec<f64> = proposals.rows().map(log_weight).collect();
    let picks = resample_indices(&weights, n, rng)
        .ok_or_else(|| Error::Training("every importance weight is degenerate".to_string()))?;
    let mut data = Vec::with_capacity(n * proposals.ncols());
    for i in picks {
        data.extend_from_slice(proposals.row(i));
    }
    Ok(Tensor::from_row_major(proposals.ncols(), data))
}

/// Neural posterior estimation stand-in: a linear-Gaussian conditional
/// density `p(θ | x)` fitted by ridge regression.
pub struct PosteriorEstimation;

struct PosteriorRegression {
    model: LinearModel,
    std: Vec<f64>,
    x_width: usize,
}

impl InferenceProcedure for PosteriorEstimation {
    fn train<'a>(
        &self,
        _prior: &'a dyn Distribution,
        theta: &Tensor,
        x: &Tensor,
        _rng: &mut dyn RngCore,
    ) -> Result<Box<dyn Estimator + 'a>> {
        let (theta_rows, x_rows) = training_rows(theta, x, x.ncols() + 2)?;
        let model = LinearModel::fit(&x_rows, &theta_rows, RIDGE)
            .ok_or_else(|| Error::Training("singular system fitting p(theta | x)".to_string()))?;
        let std = residual_variance(&model, &x_rows, &theta_rows)
            .into_iter()
            .map(f64::sqrt)
            .collect();
        debug!(rows = theta_rows.len(), "fitted posterior regression");
        Ok(Box::new(PosteriorRegression {
            model,
            std,
            x_width: x.ncols(),
        }))
    }
}

impl Estimator for PosteriorRegression {
    fn sample_posterior(&self, observation: &Tensor, n: usize, rng: &mut dyn RngCore) -> Result<Tensor> {
        let x = observation_row(observation, self.x_width)?;
        let mean = self.model.predict(&x);
        let mut data = Vec::with_capacity(n * mean.len());
        for _ in 0..n {
            for (m, s) in mean.iter().zip(&self.std) {
                let z: f64 = StandardNormal.sample(&mut *rng);
                data.push(m + s * z);
            }
        }
        Ok(Tensor::from_row_major(mean.len(), data))
    }
}

/// Neural likelihood estimation stand-in: a linear-Gaussian surrogate
/// likelihood `p(x | θ)`, sampled by importance resampling from the prior.
pub struct LikelihoodEstimation;

struct SurrogateLikelihood<'a> {
    prior: &'a dyn Distribution,
    model: LinearModel,
    variance: Vec<f64>,
    x_width: usize,
}

impl InferenceProcedure for LikelihoodEstimation {
    fn train<'a>(
        &self,
        prior: &'a dyn Distribution,
        theta: &Tensor,
        x: &Tensor,
        _rng: &mut dyn RngCore,
    ) -> Result<Box<dyn Estimator + 'a>> {
        let (theta_rows, x_rows) = training_rows(theta, x, theta.ncols() + 2)?;
        let model = LinearModel::fit(&theta_rows, &x_rows, RIDGE)
            .ok_or_else(|| Error::Training("singular system fitting p(x | theta)".to_string()))?;
        let variance = residual_variance(&model, &theta_rows, &x_rows);
        debug!(rows = theta_rows.len(), "fitted surrogate likelihood");
        Ok(Box::new(SurrogateLikelihood {
            prior,
            model,
            variance,
            x_width: x.ncols(),
        }))
    }
}

impl Estimator for SurrogateLikelihood<'_> {
    fn sample_posterior(&self, observation: &Tensor, n: usize, rng: &mut dyn RngCore) -> Result<Tensor> {
        let x = observation_row(observation, self.x_width)?;
        importance_resample(self.prior, n, rng, |theta| {
            DiagGaussian::new(self.model.predict(theta), self.variance.clone()).log_density(&x)
        })
    }
}

/// Neural ratio estimation stand-in: a logistic classifier telling joint
/// `(θ, x)` pairs from shuffled ones. Its logit estimates
/// `log p(x | θ) / p(x)`, which reweights prior proposals.
#[derive(Default)]
pub struct RatioEstimation {
    options: LogisticOptions,
}

struct RatioClassifier<'a> {
    prior: &'a dyn Distribution,
    classifier: LogisticRegression,
    x_width: usize,
}

/// Quadratic pair features: θ, x, every θ_i x_j, θ², x².
fn pair_features(theta: &[f64], x: &[f64]) -> Vec<f64> {
    let mut f = Vec::with_capacity(theta.len() * (x.len() + 2) + 2 * x.len());
    f.extend_from_slice(theta);
    f.extend_from_slice(x);
    for t in theta {
        for v in x {
            f.push(t * v);
        }
    }
    f.extend(theta.iter().map(|t| t * t));
    f.extend(x.iter().map(|v| v * v));
    f
}

impl InferenceProcedure for RatioEstimation {
    fn train<'a>(
        &self,
        prior: &'a dyn Distribution,
        theta: &Tensor,
        x: &Tensor,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn Estimator + 'a>> {
        let (theta_rows, x_rows) = training_rows(theta, x, 4)?;
        let shuffled = permutation(theta_rows.len(), rng);
        let mut features = Vec::with_capacity(2 * theta_rows.len());
        let mut labels = Vec::with_capacity(2 * theta_rows.len());
        for (i, x_row) in x_rows.iter().enumerate() {
            features.push(pair_features(&theta_rows[i], x_row));
            labels.push(true);
            features.push(pair_features(&theta_rows[shuffled[i]], x_row));
            labels.push(false);
        }
        let classifier = LogisticRegression::fit(&features, &labels, self.options)
            .ok_or_else(|| Error::Training("ratio classifier diverged".to_string()))?;
        debug!(pairs = features.len(), "fitted ratio classifier");
        Ok(Box::new(RatioClassifier {
            prior,
            classifier,
            x_width: x.ncols(),
        }))
    }
}

impl Estimator for RatioClassifier<'_> {
    fn sample_posterior(&self, observation: &Tensor, n: usize, rng: &mut dyn RngCore) -> Result<Tensor> {
        let x = observation_row(observation, self.x_width)?;
        importance_resample(self.prior, n, rng, |theta| {
            self.classifier.logit(&pair_features(theta, &x))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{LinearGaussianTask, Task};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn column_mean(t: &Tensor, c: usize) -> f64 {
        t.rows().map(|r| r[c]).sum::<f64>() / t.nrows() as f64
    }

    #[test]
    fn method_names_are_a_closed_set() {
        assert_eq!("NPE".parse::<Method>().expect("npe"), Method::Npe);
        assert_eq!("nre".parse::<Method>().expect("nre"), Method::Nre);
        let err = "SNPE".parse::<Method>().expect_err("unsupported");
        match err {
            Error::UnsupportedMethod { method, supported } => {
                assert_eq!(method, "SNPE");
                assert_eq!(supported, vec!["NPE", "NLE", "NRE"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn every_method_recovers_linear_gaussian_posterior() {
        let task = LinearGaussianTask::default();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let theta = task.prior().sample(2000, &mut rng);
        let x = task.simulate(&theta, &mut rng);
        let observation = Tensor::vector(vec![1.1, -1.1]);
        for method in Method::ALL {
            let estimator = method
                .procedure()
                .train(task.prior(), &theta, &x, &mut rng)
                .expect("train");
            let samples = estimator
                .sample_posterior(&observation, 400, &mut rng)
                .expect("sample");
            assert_eq!(samples.shape(), &[400, 2], "{}", method);
            assert!((column_mean(&samples, 0) - 1.0).abs() < 0.25, "{} mean", method);
            assert!((column_mean(&samples, 1) + 1.0).abs() < 0.25, "{} mean", method);
        }
    }

    #[test]
    fn training_rejects_bad_simulations() {
        let prior = DiagGaussian::isotropic(vec![0.0; 2], 1.0);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let theta = prior.sample(3, &mut rng);
        let x = prior.sample(3, &mut rng);
        let err = PosteriorEstimation
            .train(&prior, &theta, &x, &mut rng)
            .err()
            .expect("too few simulations");
        assert!(matches!(err, Error::Training(_)));

        let theta = Tensor::from_rows(&vec![vec![f64::NAN, 0.0]; 10]).expect("theta");
        let x = prior.sample(10, &mut rng);
        let err = LikelihoodEstimation
            .train(&prior, &theta, &x, &mut rng)
            .err()
            .expect("non-finite");
        assert!(matches!(err, Error::Training(_)));
    }

    #[test]
    fn observation_width_must_match() {
        let prior = DiagGaussian::isotropic(vec![0.0; 2], 1.0);
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let theta = prior.sample(50, &mut rng);
        let x = prior.sample(50, &mut rng);
        let estimator = PosteriorEstimation
            .train(&prior, &theta, &x, &mut rng)
            .expect("train");
        let err = estimator
            .sample_posterior(&Tensor::vector(vec![0.0; 3]), 5, &mut rng)
            .expect_err("wrong width");
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
