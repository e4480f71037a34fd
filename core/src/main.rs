//! MCL SIM: run synthetic localisation scenarios through the resampling stage.
//!
//! Scenarios can be loaded from a configuration file (TOML/JSON/YAML) and adjusted with command-line flags, which
//! take precedence over the file. Per-cycle results are printed as a summary and optionally written to CSV.
use clap::Parser;
use log::{error, info};
use mcl::ResamplingStrategy;
use mcl::sim::{CycleSummary, ScenarioConfig, run_scenario};
use mcl::sink::{CsvStateLogger, LogSink, ResamplingSink};

use std::error::Error;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Run synthetic Monte Carlo localisation scenarios.")]
struct Cli {
    /// Scenario configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Resampling strategy (multinomial, stratified, residual)
    #[arg(long)]
    strategy: Option<ResamplingStrategy>,
    /// Initial number of samples
    #[arg(short, long)]
    particles: Option<usize>,
    /// Number of filter cycles
    #[arg(long)]
    cycles: Option<usize>,
    /// Seed for the simulation and resampling random streams
    #[arg(long)]
    seed: Option<u64>,
    /// Bound the sample count with KLD-sampling
    #[arg(long)]
    adaptive: bool,
    /// Cycle at which the robot is kidnapped
    #[arg(long)]
    kidnap_at: Option<usize>,
    /// Output CSV file for the per-cycle summaries
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// CSV file receiving one row per resampling pass
    #[arg(long)]
    state_log: Option<PathBuf>,
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Initialize the logger with a timestamped format, writing to stderr or appending to `log_file`.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Resolve the scenario from the optional file and the flags.
fn build_scenario(cli: &Cli) -> Result<ScenarioConfig, Box<dyn Error>> {
    let mut scenario = match &cli.config {
        Some(path) => {
            info!("Loading scenario from {}", path.display());
            ScenarioConfig::from_file(path)?
        }
        None => ScenarioConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        scenario.resampling.strategy = strategy;
    }
    if let Some(particles) = cli.particles {
        scenario.particles = particles;
    }
    if let Some(cycles) = cli.cycles {
        scenario.cycles = cycles;
    }
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
        scenario.resampling.seed = Some(seed);
    }
    if cli.adaptive {
        scenario.resampling.adaptive = true;
    }
    if cli.kidnap_at.is_some() {
        scenario.kidnap_at = cli.kidnap_at;
    }
    Ok(scenario)
}

fn print_summary(rows: &[CycleSummary]) {
    let Some(last) = rows.last() else {
        println!("No cycles were run.");
        return;
    };
    let mean_error = rows.iter().map(|r| r.position_error).sum::<f64>() / rows.len() as f64;
    let resampled = rows.iter().filter(|r| r.resampled).count();
    let recovered: usize = rows.iter().map(|r| r.recovered).sum();
    println!("Cycles:              {}", rows.len());
    println!("Resampling passes:   {}", resampled);
    println!("Recovered samples:   {}", recovered);
    println!("Mean position error: {:.3} m", mean_error);
    println!("Final position error: {:.3} m", last.position_error);
    println!("Final sample count:  {}", last.samples);
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let scenario = build_scenario(&cli)?;
    let mut csv_sink = match &cli.state_log {
        Some(path) => Some(CsvStateLogger::create(path)?),
        None => None,
    };
    let mut log_sink = LogSink;
    let sink: &mut dyn ResamplingSink = match csv_sink.as_mut() {
        Some(logger) => logger,
        None => &mut log_sink,
    };

    let rows = match run_scenario(&scenario, sink) {
        Ok(rows) => rows,
        Err(e) => {
            error!("Scenario failed: {}", e);
            return Err(e.into());
        }
    };
    if let Some(logger) = csv_sink.as_mut() {
        logger.flush()?;
    }
    if let Some(output) = &cli.output {
        CycleSummary::to_csv(&rows, output)?;
        info!("Wrote {} cycle summaries to {}", rows.len(), output.display());
    }
    print_summary(&rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "mcl",
            "--strategy",
            "residual",
            "--particles",
            "250",
            "--seed",
            "9",
            "--adaptive",
            "--kidnap-at",
            "40",
        ]);
        let scenario = build_scenario(&cli).unwrap();
        assert_eq!(scenario.resampling.strategy, ResamplingStrategy::Residual);
        assert_eq!(scenario.particles, 250);
        assert_eq!(scenario.seed, 9);
        assert_eq!(scenario.resampling.seed, Some(9));
        assert!(scenario.resampling.adaptive);
        assert_eq!(scenario.kidnap_at, Some(40));
        assert_eq!(scenario.cycles, ScenarioConfig::default().cycles);
    }
    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["mcl", "--strategy", "systematic"]).is_err());
    }
}
