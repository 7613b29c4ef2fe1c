//! Evaluator: scores persisted posterior samples against the task's
//! reference posterior. Never re-runs inference and never mutates the
//! artifact tree.

use crate::inference::Method;
use crate::metrics::{c2st, ppc, Metric, MetricOptions};
use crate::runner::run_key_for;
use crate::tasks::Task;
use bench_core::{ArtifactStore, Error, Result, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::info;

/// Scores observation `observation_idx` of the run addressed by
/// `(task, method, num_simulations)`.
pub fn evaluate(
    store: &ArtifactStore,
    task: &dyn Task,
    method: &str,
    metric: &str,
    num_simulations: usize,
    observation_idx: usize,
    options: &MetricOptions,
) -> Result<f64> {
    let method: Method = method.parse()?;
    let metric: Metric = metric.parse()?;
    evaluate_with(store, task, method, metric, num_simulations, observation_idx, options)
}

pub fn evaluate_with(
    store: &ArtifactStore,
    task: &dyn Task,
    method: Method,
    metric: Metric,
    num_simulations: usize,
    observation_idx: usize,
    options: &MetricOptions,
) -> Result<f64> {
    let key = run_key_for(task, method, num_simulations);
    let samples = store
        .read_samples(&key, observation_idx)
        .map_err(|e| match e {
            Error::ArtifactNotFound { path } => Error::MissingArtifact {
                run: key.to_string(),
                observation_idx,
                path,
            },
            other => other,
        })?;
    // The stored observation is authoritative once it exists.
    let observation = match store.read_observation(&key, observation_idx)? {
        Some(stored) => stored,
        None => task.observation(observation_idx),
    };

    let mut rng = ChaCha20Rng::seed_from_u64(options.random_state);
    rng.set_stream(observation_idx as u64);
    let reference = task
        .reference_posterior(&observation)?
        .sample(samples.nrows(), &mut rng);

    let score = match metric {
        Metric::C2st => c2st(&samples, &reference, options.c2st_test_size, options.random_state)?,
        Metric::Ppc => ppc(&samples, &observation, &mut |theta: &Tensor| {
            task.simulate(theta, &mut rng)
        })?,
    };
    info!(
        run = %key,
        observation_idx,
        metric = %metric,
        score,
        "scored observation"
    );
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{run_inference, InferenceRequest};
    use crate::tasks::LinearGaussianTask;
    use bench_core::{ensure_dir, OutputRoot, OBSERVATION_FILE};
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;

    fn temp_store(label: &str) -> (PathBuf, ArtifactStore) {
        let root = std::env::temp_dir().join(format!(
            "bench_evaluate_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        (root.clone(), ArtifactStore::new(OutputRoot::new(root)))
    }

    #[test]
    fn missing_samples_are_reported_not_defaulted() {
        let (root, store) = temp_store("missing");
        let task = LinearGaussianTask::default();
        let err = evaluate(&store, &task, "NPE", "c2st", 100, 0, &MetricOptions::default())
            .expect_err("no run yet");
        match err {
            Error::MissingArtifact {
                run,
                observation_idx,
                ..
            } => {
                assert_eq!(run, "LinearGaussianTask_NPE/dim_2_observation_seed_42/sims_100");
                assert_eq!(observation_idx, 0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let (root, store) = temp_store("scores");
        let task = LinearGaussianTask::default();
        let request = InferenceRequest::new("NPE", 200, 60, 1).expect("request").with_seed(2);
        run_inference(&store, &task, &request, None).expect("run");
        for metric in ["c2st", "PPC"] {
            let score = evaluate(&store, &task, "NPE", metric, 200, 0, &MetricOptions::default())
                .expect("score");
            assert!((0.0..=1.0).contains(&score), "{} = {}", metric, score);
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_metric_and_method_fail() {
        let (root, store) = temp_store("unknown");
        let task = LinearGaussianTask::default();
        let options = MetricOptions::default();
        assert!(matches!(
            evaluate(&store, &task, "NPE", "mmd", 100, 0, &options),
            Err(Error::UnknownMetric { .. })
        ));
        assert!(matches!(
            evaluate(&store, &task, "ABC", "c2st", 100, 0, &options),
            Err(Error::UnsupportedMethod { .. })
        ));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn stored_observation_is_authoritative() {
        let (root, store) = temp_store("stored");
        let task = LinearGaussianTask::default();
        let far = Tensor::vector(vec![8.0, -8.0]);
        let request = InferenceRequest::new("NPE", 200, 200, 1).expect("request").with_seed(5);
        let outcome = run_inference(&store, &task, &request, Some(std::slice::from_ref(&far)))
            .expect("run");
        let options = MetricOptions::default();

        // Scored against the supplied observation the posterior looks right.
        let with_stored = evaluate(&store, &task, "NPE", "c2st", 200, 0, &options).expect("score");
        assert!(with_stored < 0.8, "stored observation score {}", with_stored);

        // Without it the task's own observation is used, which the samples miss.
        fs::remove_file(outcome.observation_dirs[0].join(OBSERVATION_FILE)).expect("drop observation");
        let fallback = evaluate(&store, &task, "NPE", "c2st", 200, 0, &options).expect("score");
        assert!(fallback > 0.95, "fallback score {}", fallback);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn other_task_dimension_is_a_different_run() {
        let (root, store) = temp_store("dims");
        let two = LinearGaussianTask::new(2, 42);
        let request = InferenceRequest::new("NPE", 100, 20, 1).expect("request").with_seed(5);
        run_inference(&store, &two, &request, None).expect("run");
        let three = LinearGaussianTask::new(3, 42);
        let err = evaluate(&store, &three, "NPE", "c2st", 100, 0, &MetricOptions::default())
            .expect_err("dim 3 was never run");
        assert!(matches!(err, Error::MissingArtifact { .. }), "got {:?}", err);
        let _ = fs::remove_dir_all(root);
    }
}
