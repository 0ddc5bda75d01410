use anyhow::{Context, Result};
use resistor::stats::{self, Histogram};
use resistor::{Config, Controller, Lifecycle, model::Record};
use rmp_serde::encode;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::Duration,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub struct Manager {
    cfg: Config,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;
        log::info!("{cfg:#?}");
        Ok(Self { cfg })
    }

    /// Run the simulation until extinction or the generation limit.
    pub fn run_simulation(&self, output: Option<&Path>) -> Result<()> {
        if self.cfg.params.max_generations == 0 {
            log::warn!("no generation limit, the run only ends on extinction");
        }

        let ctrl = Controller::new(self.cfg.clone()).context("failed to construct controller")?;
        ctrl.start().context("failed to start simulation")?;

        let mut lifecycle = ctrl.lifecycle();
        while lifecycle.is_active() {
            lifecycle = ctrl.wait_while_active(PROGRESS_INTERVAL);
            let snapshot = ctrl.snapshot();
            log::info!(
                "generation {:>6}: {:>7} bacteria, mean resistance {:.4}",
                snapshot.generation,
                snapshot.population.len(),
                stats::mean(&snapshot.population)
            );
        }

        let snapshot = ctrl.snapshot();
        log::info!("{}", snapshot.status);
        if lifecycle != Lifecycle::Completed && lifecycle != Lifecycle::Extinct {
            log::warn!("simulation ended in the {lifecycle} phase");
        }

        let summary = stats::summarize(&snapshot.population);
        log::info!("{summary:#?}");

        let conc = ctrl.params().antibiotic_concentration;
        let hist = Histogram::new(&snapshot.population, Histogram::DEFAULT_N_BINS);
        let (n_sus, n_res) = hist.split_at(conc);
        log::info!("{n_sus} bacteria below and {n_res} at or above concentration {conc:.2}");

        if let Some(file) = output {
            let record = Record {
                generation: snapshot.generation,
                history: snapshot.history,
                population: snapshot.population.to_vec(),
                status: snapshot.status,
            };
            save_record(&record, file).with_context(|| format!("failed to save {file:?}"))?;
            log::info!("saved {file:?}");
        }

        Ok(())
    }
}

fn save_record(record: &Record, file: &Path) -> Result<()> {
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, record).context("failed to serialize record")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
