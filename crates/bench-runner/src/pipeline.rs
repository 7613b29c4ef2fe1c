//! One benchmark configuration end to end: inference, per-observation
//! evaluation, per-observation ledgers, then consolidation of the
//! `<Task>_<METHOD>/` family.

use crate::config::BenchmarkConfig;
use crate::evaluate::evaluate_with;
use crate::runner::{generate_seed, run_inference, run_key_for};
use crate::sweep::plan_jobs;
use anyhow::Result;
use bench_analysis::{append_or_write, consolidate, records_from_scores, LedgerTarget, WriteMode, METRICS_FILE};
use bench_core::{ArtifactStore, RunKey};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationScores {
    pub observation_idx: usize,
    pub ledger: PathBuf,
    /// Metric name (upper case) to score.
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkOutcome {
    pub run: String,
    pub seed: u64,
    pub family_dir: PathBuf,
    pub observations: Vec<ObservationScores>,
    pub consolidated: Option<PathBuf>,
    pub consolidated_rows: usize,
}

/// Trains once, samples and scores every observation, writes
/// `obs_<i>/metrics.csv` for each, and consolidates the family directory
/// unless disabled.
pub fn run_benchmark(config: &BenchmarkConfig) -> Result<BenchmarkOutcome> {
    let task = config.build_task()?;
    let method = config.method()?;
    let metrics = config.metrics()?;
    let options = config.metric_options();
    let seed = config.random_seed.unwrap_or_else(|| {
        let seed = generate_seed();
        info!(seed, "generated random seed");
        seed
    });
    let store = ArtifactStore::new(config.output_root());
    let request = config.inference_request(seed)?;
    let inference = run_inference(&store, task.as_ref(), &request, None)?;

    let mut metadata: BTreeMap<String, Value> = task.parameters();
    metadata.insert("seed".to_string(), json!(seed));

    let mut observations = Vec::with_capacity(inference.observation_dirs.len());
    for (idx, dir) in inference.observation_dirs.iter().enumerate() {
        let mut scores = BTreeMap::new();
        for metric in &metrics {
            let score = evaluate_with(
                &store,
                task.as_ref(),
                method,
                *metric,
                request.num_simulations,
                idx,
                &options,
            )?;
            scores.insert(metric.as_str().to_string(), score);
        }
        let records = records_from_scores(
            &scores,
            task.identity(),
            method.as_str(),
            request.num_simulations,
            idx,
            &metadata,
        );
        let ledger = append_or_write(
            &records,
            &LedgerTarget::File(dir.join(METRICS_FILE)),
            WriteMode::Write,
        )?;
        observations.push(ObservationScores {
            observation_idx: idx,
            ledger,
            scores,
        });
    }

    let family_dir = inference.run_key.family_dir(store.root());
    let (consolidated, consolidated_rows) = if config.consolidate {
        let table = consolidate(&family_dir)?;
        (Some(family_dir.join(bench_analysis::CONSOLIDATED_FILE)), table.len())
    } else {
        (None, 0)
    };
    info!(
        run = %inference.run_key,
        observations = observations.len(),
        consolidated_rows,
        "benchmark complete"
    );
    Ok(BenchmarkOutcome {
        run: inference.run_key.to_string(),
        seed,
        family_dir,
        observations,
        consolidated,
        consolidated_rows,
    })
}

/// What [`run_benchmark`] would do, without running anything.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkPlan {
    pub task: String,
    pub task_identity: String,
    pub task_params: BTreeMap<String, Value>,
    pub method: String,
    pub num_simulations: usize,
    pub num_posterior_samples: usize,
    pub num_observations: usize,
    pub metrics: Vec<String>,
    pub random_seed: Option<u64>,
    pub output_root: PathBuf,
    pub run_dir: PathBuf,
    pub consolidate: bool,
    pub sweep_jobs: usize,
}

pub fn describe(config: &BenchmarkConfig) -> Result<BenchmarkPlan> {
    let task = config.build_task()?;
    let method = config.method()?;
    let metrics = config.metrics()?;
    let key: RunKey = run_key_for(task.as_ref(), method, config.inference.num_simulations);
    let sweep_jobs = if config.sweep.is_some() {
        plan_jobs(config).len()
    } else {
        0
    };
    Ok(BenchmarkPlan {
        task: config.task.name.clone(),
        task_identity: task.identity().to_string(),
        task_params: task.parameters(),
        method: method.as_str().to_string(),
        num_simulations: config.inference.num_simulations,
        num_posterior_samples: config.inference.num_posterior_samples,
        num_observations: config.inference.num_observations,
        metrics: metrics.iter().map(|m| m.as_str().to_string()).collect(),
        random_seed: config.random_seed,
        output_root: config.output_root.clone(),
        run_dir: key.run_dir(&config.output_root()),
        consolidate: config.consolidate,
        sweep_jobs,
    })
}
