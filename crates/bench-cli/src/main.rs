use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bench", version, about = "Simulation-based inference benchmark CLI")]
struct Cli {
    /// Log filter (e.g. `debug`, `bench_runner=trace`); `RUST_LOG` wins when set.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, sample, score and consolidate one configuration.
    Run {
        config: PathBuf,
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        config: PathBuf,
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Launch every job of the `sweep` section as a child `bench run`.
    Sweep {
        config: PathBuf,
        #[arg(long = "set")]
        set_values: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    Consolidate {
        dir: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Mean/std of one metric per x value, over a consolidated directory.
    Summarize {
        dir: PathBuf,
        #[arg(long)]
        metric: String,
        #[arg(long, default_value = "num_simulations")]
        x: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    ListMethods {
        #[arg(long)]
        json: bool,
    },
    ListTasks {
        #[arg(long)]
        json: bool,
    },
    Init {
        #[arg(long, default_value = "benchmark.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<bench_core::Error>()
                    .map(|e| e.code())
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            set_values,
            json,
        } => {
            let bindings = bench_runner::parse_set_bindings(&set_values)?;
            let cfg = bench_runner::load_config(&config, &bindings)?;
            let outcome = bench_runner::run_benchmark(&cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "result": serde_json::to_value(&outcome)?
                })));
            }
            print_outcome(&outcome);
        }
        Commands::Describe {
            config,
            set_values,
            json,
        } => {
            let bindings = bench_runner::parse_set_bindings(&set_values)?;
            let cfg = bench_runner::load_config(&config, &bindings)?;
            let plan = bench_runner::describe(&cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "plan": serde_json::to_value(&plan)?
                })));
            }
            print_plan(&plan);
        }
        Commands::Sweep {
            config,
            set_values,
            json,
        } => {
            let bindings = bench_runner::parse_set_bindings(&set_values)?;
            let cfg = bench_runner::load_config(&config, &bindings)?;
            let options = bench_runner::SweepOptions {
                executable: std::env::current_exe()?,
                config_path: config.clone(),
                base_overrides: set_values,
            };
            let outcome = bench_runner::run_sweep(&cfg, &options)?;
            let failed = outcome.failed().len();
            if json {
                let mut result = serde_json::to_value(&outcome)?;
                result["failed"] = json!(failed);
                return Ok(Some(json!({
                    "ok": failed == 0,
                    "command": "sweep",
                    "result": result
                })));
            }
            print_sweep(&outcome);
            if failed > 0 {
                return Err(anyhow::anyhow!(format!(
                    "{} of {} sweep jobs failed",
                    failed,
                    outcome.jobs.len()
                )));
            }
        }
        Commands::Consolidate { dir, out, json } => {
            let output = out.unwrap_or_else(|| dir.join(bench_analysis::CONSOLIDATED_FILE));
            let table = bench_analysis::consolidate_to(&dir, &output)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "consolidate",
                    "path": output.display().to_string(),
                    "rows": table.len(),
                    "columns": table.columns()
                })));
            }
            println!("consolidated: {}", output.display());
            println!("rows: {}", table.len());
            println!("columns: {}", table.columns().join(","));
        }
        Commands::Summarize {
            dir,
            metric,
            x,
            out_dir,
            json,
        } => {
            let table = bench_analysis::consolidate(&dir)?;
            let points = bench_analysis::summarize(&table, &metric, &x)?;
            let written = match out_dir {
                Some(out_dir) => Some(bench_analysis::write_summary(&points, &metric, &x, &out_dir)?),
                None => None,
            };
            if json {
                let series: Vec<Value> = points
                    .iter()
                    .map(|p| json!({"x": p.x, "mean": p.mean, "std": p.std, "count": p.count}))
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summarize",
                    "metric": metric,
                    "x": x,
                    "series": series,
                    "path": written.as_ref().map(|p| p.display().to_string())
                })));
            }
            println!("{:<16} {:>10} {:>10} {:>6}", x, "mean", "std", "count");
            for p in &points {
                println!("{:<16} {:>10.4} {:>10.4} {:>6}", p.x, p.mean, p.std, p.count);
            }
            if let Some(path) = written {
                println!("summary: {}", path.display());
            }
        }
        Commands::ListMethods { json } => {
            let methods = bench_runner::Method::names();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list-methods",
                    "methods": methods,
                    "metrics": bench_runner::Metric::names()
                })));
            }
            for m in methods {
                println!("{}", m);
            }
        }
        Commands::ListTasks { json } => {
            let tasks: Vec<Value> = bench_runner::TaskKind::ALL
                .iter()
                .map(|k| json!({"name": k.name(), "params": k.accepted_params()}))
                .collect();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list-tasks",
                    "tasks": tasks
                })));
            }
            for kind in bench_runner::TaskKind::ALL {
                println!("{} ({})", kind.name(), kind.accepted_params().join(", "));
            }
        }
        Commands::Init { path, force } => {
            write_template(&path, force)?;
            println!("wrote: {}", path.display());
        }
    }
    Ok(None)
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Err(anyhow::anyhow!(format!(
            "init file already exists (use --force): {}",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    bench_core::atomic_write_bytes(path, bench_runner::CONFIG_TEMPLATE.as_bytes())?;
    Ok(())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Sweep { json, .. }
        | Commands::Consolidate { json, .. }
        | Commands::Summarize { json, .. }
        | Commands::ListMethods { json }
        | Commands::ListTasks { json } => *json,
        Commands::Init { .. } => false,
    }
}

fn print_outcome(outcome: &bench_runner::BenchmarkOutcome) {
    println!("run: {}", outcome.run);
    println!("seed: {}", outcome.seed);
    for obs in &outcome.observations {
        let scores: Vec<String> = obs
            .scores
            .iter()
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect();
        println!("obs_{}: {}", obs.observation_idx, scores.join(" "));
    }
    match &outcome.consolidated {
        Some(path) => println!(
            "consolidated: {} ({} rows)",
            path.display(),
            outcome.consolidated_rows
        ),
        None => println!("consolidated: skipped"),
    }
}

fn print_plan(plan: &bench_runner::BenchmarkPlan) {
    println!("task: {} ({})", plan.task, plan.task_identity);
    if !plan.task_params.is_empty() {
        let params: Vec<String> = plan
            .task_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("task_params: {}", params.join(" "));
    }
    println!("method: {}", plan.method);
    println!("num_simulations: {}", plan.num_simulations);
    println!("num_posterior_samples: {}", plan.num_posterior_samples);
    println!("num_observations: {}", plan.num_observations);
    println!("metrics: {}", plan.metrics.join(","));
    match plan.random_seed {
        Some(seed) => println!("random_seed: {}", seed),
        None => println!("random_seed: generated at run time"),
    }
    println!("run_dir: {}", plan.run_dir.display());
    println!("consolidate: {}", plan.consolidate);
    if plan.sweep_jobs > 0 {
        println!("sweep_jobs: {}", plan.sweep_jobs);
    }
}

fn print_sweep(outcome: &bench_runner::SweepOutcome) {
    println!("seed: {}", outcome.seed);
    for report in &outcome.jobs {
        let status = if report.ok { "ok" } else { "FAILED" };
        println!(
            "{:<6} {} [{}] {}ms",
            status,
            report.job.label(),
            report.exit,
            report.elapsed_ms
        );
    }
    for c in &outcome.consolidated {
        match (&c.rows, &c.error) {
            (Some(rows), _) => println!("consolidated: {} ({} rows)", c.family_dir.display(), rows),
            (None, Some(err)) => println!("consolidation failed: {}: {}", c.family_dir.display(), err),
            (None, None) => println!("consolidated: {}", c.family_dir.display()),
        }
    }
}
