//! Scoring kernels. Both return a value in `[0, 1]`: near 0.5 (c2st) or
//! near 0 (ppc) for a good posterior, approaching 1 as it diverges.

use crate::numerics::{permutation, LogisticOptions, LogisticRegression};
use bench_core::{Error, Result, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    C2st,
    Ppc,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::C2st, Metric::Ppc];

    /// Name recorded in ledgers.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::C2st => "C2ST",
            Metric::Ppc => "PPC",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownMetric {
                metric: s.to_string(),
                supported: Self::names(),
            })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricOptions {
    /// Held-out fraction for the classifier two-sample test.
    pub c2st_test_size: f64,
    /// Seeds the c2st split and the reference draws.
    pub random_state: u64,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            c2st_test_size: 0.3,
            random_state: 86,
        }
    }
}

/// Classifier two-sample test: held-out accuracy of a logistic regression
/// trained to tell `candidate` rows (label 0) from `reference` rows
/// (label 1).
pub fn c2st(candidate: &Tensor, reference: &Tensor, test_size: f64, random_state: u64) -> Result<f64> {
    if candidate.ncols() != reference.ncols() {
        return Err(Error::InvalidRequest(format!(
            "sample widths differ: {} vs {}",
            candidate.ncols(),
            reference.ncols()
        )));
    }
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(Error::InvalidRequest(format!(
            "test_size must lie in (0, 1), got {}",
            test_size
        )));
    }
    let mut rows: Vec<Vec<f64>> = candidate.rows().map(<[f64]>::to_vec).collect();
    rows.extend(reference.rows().map(<[f64]>::to_vec));
    let mut labels = vec![false; candidate.nrows()];
    labels.extend(std::iter::repeat(true).take(reference.nrows()));

    let n = rows.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(Error::InvalidRequest(format!(
            "cannot split {} samples with test_size {}",
            n, test_size
        )));
    }
    let mut rng = ChaCha20Rng::seed_from_u64(random_state);
    let order = permutation(n, &mut rng);
    let (test_idx, train_idx) = order.split_at(n_test);

    let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
    let train_y: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();
    let classifier = LogisticRegression::fit(&train_x, &train_y, LogisticOptions::default())
        .ok_or_else(|| Error::Training("c2st classifier did not converge".to_string()))?;
    let correct = test_idx
        .iter()
        .filter(|&&i| classifier.predict(&rows[i]) == labels[i])
        .count();
    Ok(correct as f64 / n_test as f64)
}

/// Posterior-predictive check: pushes `samples` through `simulate` and
/// maps the mean per-draw RMS distance `d` to the observation onto
/// `1 - exp(-d)`.
pub fn ppc(
    samples: &Tensor,
    observation: &Tensor,
    simulate: &mut dyn FnMut(&Tensor) -> Tensor,
) -> Result<f64> {
    let x = observation.squeeze_leading();
    let predicted = simulate(samples);
    if predicted.ncols() != x.ncols() || x.nrows() != 1 {
        return Err(Error::InvalidRequest(format!(
            "simulated width {} does not match observation shape {:?}",
            predicted.ncols(),
            observation.shape()
        )));
    }
    if predicted.nrows() == 0 {
        return Err(Error::InvalidRequest("no posterior samples to check".to_string()));
    }
    let width = x.ncols().max(1) as f64;
    let total: f64 = predicted
        .rows()
        .map(|row| {
            let sq: f64 = row.iter().zip(x.data()).map(|(p, o)| (p - o).powi(2)).sum();
            (sq / width).sqrt()
        })
        .sum();
    let mean_distance = total / predicted.nrows() as f64;
    if !mean_distance.is_finite() {
        return Err(Error::InvalidRequest("predictive distance is not finite".to_string()));
    }
    Ok(1.0 - (-mean_distance).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{DiagGaussian, Distribution};

    fn draws(mean: f64, n: usize, seed: u64) -> Tensor {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        DiagGaussian::isotropic(vec![mean; 2], 1.0).sample(n, &mut rng)
    }

    fn shifted(by: f64) -> impl FnMut(&Tensor) -> Tensor {
        move |theta: &Tensor| {
            Tensor::from_row_major(theta.ncols(), theta.data().iter().map(|v| v + by).collect())
        }
    }

    #[test]
    fn metric_names_parse_case_insensitively() {
        assert_eq!("c2st".parse::<Metric>().expect("c2st"), Metric::C2st);
        assert_eq!("PPC".parse::<Metric>().expect("ppc"), Metric::Ppc);
        assert_eq!(Metric::C2st.to_string(), "C2ST");
        assert!(matches!(
            "mmd".parse::<Metric>(),
            Err(Error::UnknownMetric { ref metric, .. }) if metric == "mmd"
        ));
    }

    #[test]
    fn c2st_separates_distant_clouds() {
        let score = c2st(&draws(0.0, 200, 1), &draws(6.0, 200, 2), 0.3, 86).expect("score");
        assert!(score > 0.95, "score {}", score);
    }

    #[test]
    fn c2st_near_chance_for_identical_distributions() {
        let score = c2st(&draws(0.0, 500, 3), &draws(0.0, 500, 4), 0.3, 86).expect("score");
        assert!((0.35..=0.65).contains(&score), "score {}", score);
    }

    #[test]
    fn c2st_is_deterministic_for_fixed_state() {
        let a = draws(0.0, 50, 5);
        let b = draws(0.5, 50, 6);
        assert_eq!(c2st(&a, &b, 0.3, 86).expect("a"), c2st(&a, &b, 0.3, 86).expect("b"));
    }

    #[test]
    fn c2st_rejects_mismatched_widths() {
        let wide = Tensor::from_row_major(3, vec![0.0; 30]);
        assert!(matches!(c2st(&draws(0.0, 10, 1), &wide, 0.3, 86), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn ppc_flags_biased_simulator() {
        let observation = Tensor::vector(vec![0.5, 0.5]);
        let score = ppc(&draws(0.0, 200, 7), &observation, &mut shifted(2.0)).expect("score");
        assert!((0.7..=1.0).contains(&score), "score {}", score);
    }

    #[test]
    fn ppc_low_when_predictions_match() {
        let observation = Tensor::vector(vec![0.5, 0.5]);
        let samples = Tensor::from_rows(&vec![vec![0.5, 0.5]; 20]).expect("samples");
        let score = ppc(&samples, &observation, &mut shifted(0.1)).expect("score");
        assert!(score < 0.3, "score {}", score);
    }
}
