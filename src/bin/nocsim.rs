//! Command line front-end: load a scenario, simulate it and report.
//!
//! ```text
//! nocsim scenario.yaml --analysis --csv-out flows.csv
//! nocsim scenario.yaml --analysis-csv analysis.csv
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use nocsim::config::flows_from_csv_file;
use nocsim::{Cycle, ScenarioConfig, Simulator};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "nocsim")]
#[command(about = "Cycle-accurate simulator of a priority-aware wormhole NoC")]
#[command(version)]
struct Cli {
    /// Scenario file (YAML or JSON).
    config: PathBuf,

    /// Replace the scenario's flows with the ones in this CSV file.
    #[arg(long)]
    flows_csv: Option<PathBuf>,

    /// Override the number of cycles to simulate.
    #[arg(long)]
    cycles: Option<Cycle>,

    /// Override the seed used for jitter draws.
    #[arg(long)]
    seed: Option<u64>,

    /// Also run the latency analysis.
    #[arg(long)]
    analysis: bool,

    /// Write the per-flow analysis results as CSV to this file. Implies
    /// `--analysis`.
    #[arg(long)]
    analysis_csv: Option<PathBuf>,

    /// Write per-flow results as CSV to this file.
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Write the results as JSON to this file.
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Level of log messages to display. Defaults to the scenario's level.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut scenario = ScenarioConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(path) = &cli.flows_csv {
        scenario.flows = flows_from_csv_file(path)
            .with_context(|| format!("loading flows from {}", path.display()))?;
    }
    if let Some(cycles) = cli.cycles {
        scenario.simulation.cycle_limit = cycles;
    }
    if let Some(seed) = cli.seed {
        scenario.simulation.seed = seed;
    }

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&scenario.simulation.log_level);
    nocsim::init_logging(level);

    let mut sim = Simulator::new(&scenario)?;
    let results = sim.run()?;
    print!("{}", results.summary());

    if cli.analysis || cli.analysis_csv.is_some() {
        let analysis = sim.analyse();
        println!();
        print!("{}", analysis.summary());
        if let Some(path) = &cli.analysis_csv {
            analysis
                .to_csv_file(path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    if let Some(path) = &cli.csv_out {
        results
            .flows_to_csv_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &cli.json_out {
        results
            .to_json_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if !results.schedulable() {
        tracing::warn!(
            missed = results.overall.packets_exceeded_deadline,
            "deadlines missed"
        );
    }
    Ok(())
}
