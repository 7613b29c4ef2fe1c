use bench_core::Tensor;
use rand::RngCore;
use rand_distr::{Distribution as _, StandardNormal};

/// A sampleable distribution over fixed-length vectors.
pub trait Distribution: Send + Sync {
    fn dim(&self) -> usize;

    /// `n` draws as an `[n, dim]` tensor.
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Tensor;
}

/// Gaussian with diagonal covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagGaussian {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl DiagGaussian {
    pub fn new(mean: Vec<f64>, variance: Vec<f64>) -> Self {
        let std = variance.iter().map(|v| v.max(0.0).sqrt()).collect();
        Self { mean, std }
    }

    /// `N(mean, variance * I)`.
    pub fn isotropic(mean: Vec<f64>, variance: f64) -> Self {
        let dim = mean.len();
        Self::new(mean, vec![variance; dim])
    }

    pub fn draw(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.mean
            .iter()
            .zip(&self.std)
            .map(|(m, s)| {
                let z: f64 = StandardNormal.sample(&mut *rng);
                m + s * z
            })
            .collect()
    }

    pub fn log_density(&self, x: &[f64]) -> f64 {
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        self.mean
            .iter()
            .zip(&self.std)
            .zip(x)
            .map(|((m, s), v)| {
                let z = (v - m) / s;
                -0.5 * (z * z + ln_2pi) - s.ln()
            })
            .sum()
    }
}

impl Distribution for DiagGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Tensor {
        let mut data = Vec::with_capacity(n * self.dim());
        for _ in 0..n {
            data.extend(self.draw(rng));
        }
        Tensor::from_row_major(self.dim(), data)
    }
}
