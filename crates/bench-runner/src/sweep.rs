//! Sweep launcher: one child `bench run` process per configuration in the
//! cartesian product of methods, simulation budgets and task-parameter
//! values. Children share nothing but the filesystem; each family directory
//! is consolidated once after every child has exited.

use crate::config::BenchmarkConfig;
use crate::inference::Method;
use crate::runner::generate_seed;
use crate::tasks::build_task;
use anyhow::{anyhow, Result};
use bench_analysis::consolidate;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepJob {
    pub method: String,
    pub num_simulations: usize,
    /// Task parameters after applying this job's sweep values.
    pub task_params: BTreeMap<String, Value>,
    /// Only the swept keys, for `--set` arguments.
    pub swept_params: BTreeMap<String, Value>,
}

impl SweepJob {
    /// `--set` bindings that turn the base configuration into this job.
    pub fn overrides(&self) -> Vec<String> {
        let mut out = vec![
            format!("inference.method={}", self.method),
            format!("inference.num_simulations={}", self.num_simulations),
        ];
        for (key, value) in &self.swept_params {
            out.push(format!("task.params.{}={}", key, value));
        }
        out.push("consolidate=false".to_string());
        out
    }

    pub fn label(&self) -> String {
        let params: Vec<String> = self
            .swept_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!(
            "{} sims={} {}",
            self.method,
            self.num_simulations,
            params.join(" ")
        )
        .trim_end()
        .to_string()
    }
}

/// Expands the `sweep` section; without one the plan is the base
/// configuration alone.
pub fn plan_jobs(config: &BenchmarkConfig) -> Vec<SweepJob> {
    let sweep = config.sweep.clone().unwrap_or_default();
    let methods = if sweep.methods.is_empty() {
        vec![config.inference.method.clone()]
    } else {
        sweep.methods.clone()
    };
    let budgets = if sweep.num_simulations.is_empty() {
        vec![config.inference.num_simulations]
    } else {
        sweep.num_simulations.clone()
    };

    let mut combos: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
    for (key, values) in &sweep.task_params {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    let mut jobs = Vec::new();
    for method in &methods {
        for &num_simulations in &budgets {
            for combo in &combos {
                let mut task_params = config.task.params.clone();
                task_params.extend(combo.clone());
                jobs.push(SweepJob {
                    method: method.clone(),
                    num_simulations,
                    task_params,
                    swept_params: combo.clone(),
                });
            }
        }
    }
    jobs
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// The `bench` binary to launch for each job.
    pub executable: PathBuf,
    pub config_path: PathBuf,
    /// User `--set` bindings forwarded to every child ahead of the job's own.
    pub base_overrides: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: SweepJob,
    pub exit: String,
    pub ok: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub family_dir: PathBuf,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub seed: u64,
    pub jobs: Vec<JobReport>,
    pub consolidated: Vec<ConsolidationReport>,
}

impl SweepOutcome {
    pub fn failed(&self) -> Vec<&JobReport> {
        self.jobs.iter().filter(|j| !j.ok).collect()
    }
}

/// `<root>/<Task>_<METHOD>/` for a job, validating its method and task.
fn family_dir(config: &BenchmarkConfig, job: &SweepJob) -> Result<PathBuf> {
    let method: Method = job.method.parse()?;
    let task = build_task(&config.task.name, &job.task_params)?;
    Ok(config.output_root().family_dir(task.identity(), method.as_str()))
}

pub fn run_sweep(config: &BenchmarkConfig, options: &SweepOptions) -> Result<SweepOutcome> {
    let jobs = plan_jobs(config);
    if jobs.is_empty() {
        return Err(anyhow!("sweep expands to no jobs"));
    }
    // Every job must be runnable before any is launched.
    let mut families = BTreeSet::new();
    for job in &jobs {
        families.insert(family_dir(config, job)?);
    }
    let seed = config.random_seed.unwrap_or_else(generate_seed);
    let max_concurrency = config
        .sweep
        .as_ref()
        .map(|s| s.max_concurrency)
        .unwrap_or(1)
        .clamp(1, jobs.len());
    info!(jobs = jobs.len(), max_concurrency, seed, "launching sweep");

    let next = AtomicUsize::new(0);
    let reports: Mutex<Vec<Option<JobReport>>> = Mutex::new(vec![None; jobs.len()]);
    thread::scope(|scope| {
        for _ in 0..max_concurrency {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some(job) = jobs.get(idx) else {
                    break;
                };
                let report = run_job(job, options, seed);
                if let Ok(mut slots) = reports.lock() {
                    slots[idx] = Some(report);
                }
            });
        }
    });
    let jobs: Vec<JobReport> = reports
        .into_inner()
        .map_err(|_| anyhow!("sweep worker panicked"))?
        .into_iter()
        .flatten()
        .collect();

    let consolidated = families
        .into_iter()
        .map(|dir| consolidate_family(&dir))
        .collect();
    let outcome = SweepOutcome {
        seed,
        jobs,
        consolidated,
    };
    let failed = outcome.failed().len();
    if failed > 0 {
        warn!(failed, total = outcome.jobs.len(), "some sweep jobs failed");
    }
    Ok(outcome)
}

fn run_job(job: &SweepJob, options: &SweepOptions, seed: u64) -> JobReport {
    let mut cmd = Command::new(&options.executable);
    cmd.arg("run").arg(&options.config_path);
    for binding in options
        .base_overrides
        .iter()
        .cloned()
        .chain(std::iter::once(format!("random_seed={}", seed)))
        .chain(job.overrides())
    {
        cmd.arg("--set").arg(binding);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::inherit());

    info!(job = %job.label(), "starting sweep job");
    let started = Instant::now();
    let (exit, ok) = match cmd.status() {
        Ok(status) => (
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            status.success(),
        ),
        Err(e) => (format!("spawn_failed: {}", e), false),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if ok {
        info!(job = %job.label(), elapsed_ms, "sweep job finished");
    } else {
        warn!(job = %job.label(), exit = %exit, "sweep job failed");
    }
    JobReport {
        job: job.clone(),
        exit,
        ok,
        elapsed_ms,
    }
}

fn consolidate_family(dir: &Path) -> ConsolidationReport {
    match consolidate(dir) {
        Ok(table) => ConsolidationReport {
            family_dir: dir.to_path_buf(),
            rows: Some(table.len()),
            error: None,
        },
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not consolidate sweep family");
            ConsolidationReport {
                family_dir: dir.to_path_buf(),
                rows: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve_config;
    use serde_json::json;

    fn sweep_config() -> BenchmarkConfig {
        resolve_config(json!({
            "output_root": std::env::temp_dir().join(format!("bench_sweep_{}", std::process::id())),
            "task": {"name": "likelihood_misspecified", "params": {"dim": 2, "tau_m": 1.0, "lambda_val": 0.0}},
            "inference": {"method": "NPE", "num_simulations": 100},
            "sweep": {
                "methods": ["NPE", "NRE"],
                "num_simulations": [50, 100, 200],
                "task_params": {"lambda_val": [0.0, 0.5], "tau_m": [1.0, 2.0]},
                "max_concurrency": 3
            }
        }))
        .expect("valid sweep config")
    }

    #[test]
    fn plan_is_the_cartesian_product() {
        let config = sweep_config();
        let jobs = plan_jobs(&config);
        assert_eq!(jobs.len(), 2 * 3 * 4);
        assert_eq!(jobs[0].method, "NPE");
        assert_eq!(jobs[0].num_simulations, 50);
        assert_eq!(jobs[0].task_params["dim"], json!(2));
        assert_eq!(jobs[0].swept_params.len(), 2);
        let distinct: BTreeSet<String> = jobs.iter().map(|j| j.label()).collect();
        assert_eq!(distinct.len(), jobs.len());
    }

    #[test]
    fn job_overrides_disable_per_job_consolidation() {
        let config = sweep_config();
        let job = &plan_jobs(&config)[1];
        let overrides = job.overrides();
        assert_eq!(overrides[0], "inference.method=NPE");
        assert!(overrides.contains(&"task.params.lambda_val=0.0".to_string()));
        assert_eq!(overrides.last().map(String::as_str), Some("consolidate=false"));
    }

    #[test]
    fn no_sweep_section_plans_the_base_run() {
        let mut config = sweep_config();
        config.sweep = None;
        let jobs = plan_jobs(&config);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].method, "NPE");
        assert!(jobs[0].swept_params.is_empty());
        assert_eq!(jobs[0].overrides().len(), 3);
    }

    #[test]
    fn invalid_job_aborts_before_launch() {
        let mut config = sweep_config();
        if let Some(sweep) = config.sweep.as_mut() {
            sweep.methods.push("ABC".to_string());
        }
        let options = SweepOptions {
            executable: PathBuf::from("/nonexistent/bench"),
            config_path: PathBuf::from("benchmark.yaml"),
            base_overrides: Vec::new(),
        };
        let err = run_sweep(&config, &options).expect_err("unsupported method");
        assert!(err.to_string().contains("ABC"), "{}", err);
    }

    #[test]
    fn failed_children_are_reported_not_fatal() {
        let mut config = sweep_config();
        if let Some(sweep) = config.sweep.as_mut() {
            sweep.methods = vec!["NPE".to_string()];
            sweep.num_simulations = vec![10];
            sweep.task_params.clear();
        }
        let options = SweepOptions {
            executable: PathBuf::from("/nonexistent/bench"),
            config_path: PathBuf::from("benchmark.yaml"),
            base_overrides: Vec::new(),
        };
        let outcome = run_sweep(&config, &options).expect("sweep completes");
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.failed().len(), 1);
        assert!(outcome.jobs[0].exit.starts_with("spawn_failed"));
        assert_eq!(outcome.consolidated.len(), 1);
        assert!(outcome.consolidated[0].error.is_some());
    }
}
