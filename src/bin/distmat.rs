use std::path::PathBuf;
use std::process;

use clap::Parser;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use distmat::{multiply, Matrix, Operation, Problem, RunConfig, Strategy};

/// Distributed dense matrix products over a group of worker threads
#[derive(Parser, Debug)]
#[command(name = "distmat", version, about)]
struct Cli {
    /// Matrix order
    #[arg(short, long)]
    n: Option<usize>,

    /// Number of ranks, coordinator included
    #[arg(short, long, env = "DISTMAT_WORKERS")]
    workers: Option<usize>,

    /// row | column | block, or 1 | 2 | 3
    #[arg(short, long)]
    strategy: Option<Strategy>,

    /// matvec | matmul
    #[arg(short, long)]
    operation: Option<Operation>,

    /// Seed for the random operands
    #[arg(long)]
    seed: Option<u64>,

    /// TOML run file; flags given on the command line take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Check the result against the serial product
    #[arg(long)]
    verify: bool,

    /// Print a JSON report instead of plain text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonReport {
    n: usize,
    workers: usize,
    strategy: Strategy,
    operation: Operation,
    seed: u64,
    compute_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_abs_diff: Option<f64>,
}

fn init_subscriber() {
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false).with_thread_names(true))
        .init();
}

fn resolve(cli: &Cli) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let base = match &cli.config {
        Some(path) => Some(RunConfig::load(path)?),
        None => None,
    };
    let pick = |flag: Option<usize>, from_file: Option<usize>, name: &str| {
        flag.or(from_file)
            .ok_or_else(|| format!("--{name} is required without a run file"))
    };
    let config = RunConfig {
        n: pick(cli.n, base.as_ref().map(|c| c.n), "n")?,
        workers: pick(cli.workers, base.as_ref().map(|c| c.workers), "workers")?,
        strategy: cli
            .strategy
            .or(base.as_ref().map(|c| c.strategy))
            .ok_or("--strategy is required without a run file")?,
        operation: cli
            .operation
            .or(base.as_ref().map(|c| c.operation))
            .unwrap_or(Operation::MatMul),
        seed: cli.seed.or(base.as_ref().and_then(|c| c.seed)),
        verify: cli.verify || base.as_ref().is_some_and(|c| c.verify),
    };
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = resolve(&cli)?;
    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let mut rng = StdRng::seed_from_u64(seed);
    info!(?config, seed, "run resolved");

    let n = config.n;
    let a = Matrix::random(n, n, &mut rng)?;
    let problem = match config.operation {
        Operation::MatVec => Problem::mat_vec(a, Matrix::random(n, 1, &mut rng)?.into_vec())?,
        Operation::MatMul => Problem::mat_mul(a, Matrix::random(n, n, &mut rng)?)?,
    };

    let report = multiply(&problem, config.strategy, config.workers)?;

    let check = if config.verify {
        let reference = problem.reference()?;
        Some((
            report.result.approx_eq(&reference, 1e-9),
            report.result.max_abs_diff(&reference),
        ))
    } else {
        None
    };

    if cli.json {
        let json = JsonReport {
            n,
            workers: report.workers,
            strategy: report.strategy,
            operation: config.operation,
            seed,
            compute_seconds: report.compute_time.as_secs_f64(),
            verified: check.map(|(ok, _)| ok),
            max_abs_diff: check.map(|(_, diff)| diff),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("Time: {:.6} seconds", report.compute_time.as_secs_f64());
        if let Some((ok, diff)) = check {
            if ok {
                println!("{} (max abs diff {diff:e})", "PASSED".green().bold());
            } else {
                println!("{} (max abs diff {diff:e})", "FAILED".red().bold());
            }
        }
    }

    Ok(check.map_or(true, |(ok, _)| ok))
}

fn main() {
    init_subscriber();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(1);
        }
    }
}
