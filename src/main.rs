use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use env_logger::Builder;

use dual_simplex::optimisation_algorithms::{
    dual_simplex::SolveStatus,
    dual_simplex_config::{PricingKind, PricingMode, SolverConfig},
    linear_programming::ProblemFile,
};

/// Solve a linear program with the bounded-variable dual simplex
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Problem in JSON: direction, variables and constraints
    #[arg(value_name = "PROBLEM")]
    problem: PathBuf,

    /// Solver configuration in JSON; missing fields take their defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pricing rule (dantzig, devex, steepest-edge)
    #[arg(long, value_parser = |s: &str| s.parse::<PricingKind>())]
    pricing: Option<PricingKind>,

    /// Pricing mode (uninitialized, partial, full, switchable)
    #[arg(long, value_parser = |s: &str| s.parse::<PricingMode>())]
    pricing_mode: Option<PricingMode>,

    /// Maximum number of iterations
    #[arg(short = 'i', long)]
    iterations: Option<usize>,

    /// Maximum solve time in seconds
    #[arg(short = 't', long)]
    time_limit: Option<f64>,

    /// Number of worker threads for the parallel kernels
    #[arg(long)]
    threads: Option<usize>,

    /// Print the solution as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

impl Cli {
    fn config(&self) -> Result<SolverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading configuration {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing configuration {}", path.display()))?
            }
            None => SolverConfig::default(),
        };
        if let Some(kind) = self.pricing {
            config.pricing_kind = kind;
        }
        if let Some(mode) = self.pricing_mode {
            config.pricing_mode = mode;
        }
        if let Some(iterations) = self.iterations {
            config.maximum_iterations = iterations;
        }
        if self.time_limit.is_some() {
            config.maximum_seconds = self.time_limit;
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        config.validate().context("invalid solver configuration")?;
        Ok(config)
    }
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let config = cli.config()?;
    let text = fs::read_to_string(&cli.problem)
        .with_context(|| format!("reading problem {}", cli.problem.display()))?;
    let file = ProblemFile::from_json(&text)
        .with_context(|| format!("parsing problem {}", cli.problem.display()))?;
    let problem = file.to_problem()?;

    log::info!("solving {:?}", problem);
    let solution = problem.solve_with_config(config).context("solving")?;

    if cli.json {
        let values: serde_json::Map<String, serde_json::Value> = solution
            .iter()
            .map(|(var, value)| (file.variable_name(var.idx()), value.into()))
            .collect();
        let output = serde_json::json!({
            "status": solution.status(),
            "objective": solution.objective(),
            "iterations": solution.iterations(),
            "values": values,
            "row_duals": solution.row_duals(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("status: {}", solution.status());
    if solution.status() == SolveStatus::Optimal || solution.status() == SolveStatus::IterationLimit
    {
        println!("objective: {}", solution.objective());
    }
    println!("iterations: {}", solution.iterations());
    for (var, value) in &solution {
        println!("{} = {}", file.variable_name(var.idx()), value);
    }
    if let Some(ray) = solution.ray() {
        println!("ray: {:?}", ray);
    }
    Ok(())
}
