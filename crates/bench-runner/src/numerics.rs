//! Small dense linear-algebra and fitting routines used by the built-in
//! inference procedures and the classifier two-sample test.

use nalgebra::{DMatrix, DVector};
use rand::{Rng, RngCore};

/// Solves `A X = B` for symmetric positive definite `A` by Cholesky
/// factorisation. `None` when `A` is not positive definite.
pub fn solve_spd(a: DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let solution = a.cholesky()?.solve(b);
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

/// Design matrix with a leading column of ones.
fn design_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let p = rows.first().map(Vec::len).unwrap_or(0) + 1;
    DMatrix::from_fn(rows.len(), p, |i, j| if j == 0 { 1.0 } else { rows[i][j - 1] })
}

/// Multi-output ridge regression with an unpenalised intercept.
#[derive(Debug, Clone)]
pub struct LinearModel {
    /// `(p + 1) x outputs`; row 0 holds the intercepts.
    coefficients: DMatrix<f64>,
}

impl LinearModel {
    pub fn fit(inputs: &[Vec<f64>], targets: &[Vec<f64>], ridge: f64) -> Option<Self> {
        let n = inputs.len();
        if n == 0 || targets.len() != n {
            return None;
        }
        let x = design_matrix(inputs);
        let outputs = targets[0].len();
        let y = DMatrix::from_fn(n, outputs, |i, j| targets[i][j]);
        let mut gram = x.tr_mul(&x);
        for i in 1..gram.nrows() {
            gram[(i, i)] += ridge;
        }
        let coefficients = solve_spd(gram, &x.tr_mul(&y))?;
        Some(Self { coefficients })
    }

    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        let row = with_intercept(x);
        self.coefficients.tr_mul(&row).iter().copied().collect()
    }
}

fn with_intercept(x: &[f64]) -> DVector<f64> {
    DVector::from_iterator(x.len() + 1, std::iter::once(1.0).chain(x.iter().copied()))
}

/// Per-feature centring and scaling learned from a training set.
#[derive(Debug, Clone)]
pub struct Standardizer {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let p = rows.first().map(Vec::len).unwrap_or(0);
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; p];
        for r in rows {
            for (m, v) in mean.iter_mut().zip(r) {
                *m += v / n;
            }
        }
        let mut scale = vec![0.0; p];
        for r in rows {
            for ((s, v), m) in scale.iter_mut().zip(r).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }
        Self { mean, scale }
    }

    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticOptions {
    pub max_iterations: usize,
    /// L2 penalty on the weights (not the intercept), `½ l2 ‖w‖²`.
    pub l2: f64,
    pub tolerance: f64,
}

impl Default for LogisticOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            l2: 1.0,
            tolerance: 1e-8,
        }
    }
}

/// Binary logistic regression on standardised features, fitted by damped
/// Newton iterations.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    standardizer: Standardizer,
    /// `[intercept, w_1 .. w_p]`.
    coefficients: DVector<f64>,
}

impl LogisticRegression {
    pub fn fit(features: &[Vec<f64>], labels: &[bool], options: LogisticOptions) -> Option<Self> {
        if features.is_empty() || features.len() != labels.len() {
            return None;
        }
        let standardizer = Standardizer::fit(features);
        let scaled: Vec<Vec<f64>> = features.iter().map(|r| standardizer.apply(r)).collect();
        let x = design_matrix(&scaled);
        let targets = DVector::from_iterator(
            labels.len(),
            labels.iter().map(|&y| if y { 1.0 } else { 0.0 }),
        );
        let p = x.ncols();
        let mut penalty = DVector::from_element(p, options.l2);
        penalty[0] = 0.0;
        let mut coef = DVector::zeros(p);
        let mut loss = penalised_loss(&x, &targets, &coef, options.l2);

        for _ in 0..options.max_iterations {
            let mu = (&x * &coef).map(sigmoid);
            let weights = mu.map(|m| m * (1.0 - m));
            let grad = x.tr_mul(&(&mu - &targets)) + penalty.component_mul(&coef);
            let weighted = DMatrix::from_fn(x.nrows(), p, |i, j| weights[i] * x[(i, j)]);
            let mut hess = x.tr_mul(&weighted);
            hess[(0, 0)] += 1e-9;
            for i in 1..p {
                hess[(i, i)] += options.l2;
            }
            let step = solve_spd(hess, &DMatrix::from_column_slice(p, 1, grad.as_slice()))?
                .column(0)
                .into_owned();

            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..20 {
                let candidate = &coef - &step * scale;
                let candidate_loss = penalised_loss(&x, &targets, &candidate, options.l2);
                if candidate_loss <= loss {
                    accepted = Some((candidate, candidate_loss));
                    break;
                }
                scale *= 0.5;
            }
            let Some((next, next_loss)) = accepted else {
                break;
            };
            let improvement = loss - next_loss;
            coef = next;
            loss = next_loss;
            if improvement <= options.tolerance * loss.max(1.0) {
                break;
            }
        }
        if coef.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self {
            standardizer,
            coefficients: coef,
        })
    }

    pub fn logit(&self, features: &[f64]) -> f64 {
        self.coefficients.dot(&with_intercept(&self.standardizer.apply(features)))
    }

    pub fn predict(&self, features: &[f64]) -> bool {
        self.logit(features) > 0.0
    }
}

fn penalised_loss(x: &DMatrix<f64>, targets: &DVector<f64>, coef: &DVector<f64>, l2: f64) -> f64 {
    let data: f64 = (x * coef)
        .iter()
        .zip(targets.iter())
        .map(|(z, y)| {
            // log(1 + e^z) - y z, computed stably
            let softplus = if *z > 0.0 { z + (-z).exp().ln_1p() } else { z.exp().ln_1p() };
            softplus - y * z
        })
        .sum();
    data + 0.5 * l2 * coef.rows(1, coef.len() - 1).norm_squared()
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Draws `n` indices with probability proportional to `exp(log_weights)`.
/// `None` when no weight is finite.
pub fn resample_indices(log_weights: &[f64], n: usize, rng: &mut dyn RngCore) -> Option<Vec<usize>> {
    let max = log_weights
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let mut cumulative = Vec::with_capacity(log_weights.len());
    let mut total = 0.0;
    for w in log_weights {
        if w.is_finite() {
            total += (w - max).exp();
        }
        cumulative.push(total);
    }
    let picks = (0..n)
        .map(|_| {
            let u = rng.gen::<f64>() * total;
            cumulative
                .partition_point(|c| *c <= u)
                .min(log_weights.len() - 1)
        })
        .collect();
    Some(picks)
}

/// Fisher-Yates permutation of `0..n`.
pub fn permutation(n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        idx.swap(i, j);
    }
    idx
}
