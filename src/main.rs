mod manager;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resistor::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// TOML configuration file (defaults are used if absent).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the simulation headless until extinction or the generation limit.
    Run {
        #[arg(long)]
        max_generations: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        speed: Option<f64>,

        /// Delay between generations at speed 1, in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Write the run record (MessagePack) to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the configuration in use as TOML.
    Defaults,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut cfg = match &args.config {
        Some(file) => Config::from_file(file).context("failed to construct cfg")?,
        None => Config::default(),
    };

    match args.command {
        Command::Run {
            max_generations,
            seed,
            speed,
            interval_ms,
            output,
        } => {
            if let Some(max_generations) = max_generations {
                cfg.params.max_generations = max_generations;
            }
            if let Some(speed) = speed {
                cfg.params.speed = speed;
            }
            if let Some(interval_ms) = interval_ms {
                cfg.run.base_interval_ms = interval_ms;
            }
            if seed.is_some() {
                cfg.run.seed = seed;
            }

            let mgr = Manager::new(cfg).context("failed to construct mgr")?;
            mgr.run_simulation(output.as_deref())?;
        }
        Command::Defaults => {
            print!("{}", cfg.to_toml()?);
        }
    }

    Ok(())
}
