//! Benchmark orchestration: tasks, the built-in inference procedures,
//! the Inference Runner, metric kernels, the Evaluator, configuration
//! loading, the single-configuration pipeline and the sweep launcher.

pub mod config;
pub mod distribution;
pub mod evaluate;
pub mod inference;
pub mod metrics;
pub mod numerics;
pub mod pipeline;
pub mod runner;
pub mod sweep;
pub mod tasks;

pub use config::{
    apply_overrides, load_config, load_config_value, parse_set_bindings, resolve_config,
    validate_required_fields, BenchmarkConfig, CONFIG_SCHEMA, CONFIG_TEMPLATE,
};
pub use distribution::{DiagGaussian, Distribution};
pub use evaluate::{evaluate, evaluate_with};
pub use inference::{Estimator, InferenceProcedure, Method};
pub use metrics::{c2st, ppc, Metric, MetricOptions};
pub use pipeline::{describe, run_benchmark, BenchmarkOutcome, BenchmarkPlan, ObservationScores};
pub use runner::{
    run_inference, run_key_for, sample_from_posterior, train_estimator, InferenceOutcome,
    InferenceRequest,
};
pub use sweep::{plan_jobs, run_sweep, SweepJob, SweepOptions, SweepOutcome};
pub use tasks::{build_task, LikelihoodMisspecifiedTask, LinearGaussianTask, Task, TaskKind};
