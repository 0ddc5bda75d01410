use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path, time::Duration};

/// Rule used to draw the number of offspring of each survivor.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffspringModel {
    /// One Bernoulli trial per started unit of the reproduction rate.
    ///
    /// The mean equals the reproduction rate but the variance is much lower
    /// than Poisson, and an integer rate gives a deterministic count.
    #[default]
    Legacy,
    /// Poisson draw with mean equal to the reproduction rate.
    Poisson,
}

/// Live-editable model parameters.
///
/// The engine reads a fresh copy of these at the start of every generation,
/// so changes take effect on the next step.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    /// Antibiotic concentration in the environment.
    pub antibiotic_concentration: f64,
    /// Standard deviation of mutation noise.
    pub mutation_std: f64,
    /// Mean number of offspring per survivor.
    pub reproduction_rate: f64,
    /// Maximum number of bacteria after reproduction.
    pub carrying_capacity: usize,
    /// Number of generations after which the run completes (0 means unlimited).
    pub max_generations: usize,
    /// Generations per base interval.
    pub speed: f64,
    /// Offspring count rule.
    pub offspring_model: OffspringModel,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            antibiotic_concentration: 0.3,
            mutation_std: 0.01,
            reproduction_rate: 1.2,
            carrying_capacity: 2000,
            max_generations: 0,
            speed: 1.0,
            offspring_model: OffspringModel::Legacy,
        }
    }
}

impl Params {
    /// Check every parameter against its admissible range.
    pub fn validate(&self) -> Result<()> {
        check_num(self.antibiotic_concentration, 0.0..=1.0)
            .context("invalid antibiotic concentration")?;
        check_num(self.mutation_std, 0.0..=1.0).context("invalid mutation standard deviation")?;
        check_num(self.reproduction_rate, 0.0..=100.0).context("invalid reproduction rate")?;
        check_num(self.carrying_capacity, 0..=10_000_000).context("invalid carrying capacity")?;
        check_num(self.speed, 0.01..=1000.0).context("invalid speed")?;
        Ok(())
    }
}

/// Parameters of the initial population.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitParams {
    /// Initial number of bacteria.
    pub n_bacteria: usize,
    /// Lower bound of the initial resistance range.
    pub min_resistance: f64,
    /// Upper bound of the initial resistance range.
    pub max_resistance: f64,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            n_bacteria: 1000,
            min_resistance: 0.0,
            max_resistance: 0.1,
        }
    }
}

impl InitParams {
    pub fn validate(&self) -> Result<()> {
        check_num(self.n_bacteria, 0..=10_000_000).context("invalid initial number of bacteria")?;
        check_num(self.min_resistance, 0.0..=1.0).context("invalid minimum resistance")?;
        check_num(self.max_resistance, 0.0..=1.0).context("invalid maximum resistance")?;
        if self.min_resistance > self.max_resistance {
            bail!(
                "minimum resistance {} exceeds maximum resistance {}",
                self.min_resistance,
                self.max_resistance
            );
        }
        Ok(())
    }
}

/// Execution settings of the background loop.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunParams {
    /// Delay between generations at speed 1, in milliseconds.
    pub base_interval_ms: u64,
    /// Maximum wait for the loop to stop on reset, in milliseconds.
    pub join_timeout_ms: u64,
    /// Seed of the random number generator (taken from the OS if absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            base_interval_ms: 500,
            join_timeout_ms: 1000,
            seed: None,
        }
    }
}

impl RunParams {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Delay between two generations at the given speed.
    pub fn step_interval(&self, speed: f64) -> Duration {
        self.base_interval().div_f64(speed)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.base_interval_ms, 0..=60_000).context("invalid base interval")?;
        check_num(self.join_timeout_ms, 0..=60_000).context("invalid join timeout")?;
        Ok(())
    }
}

/// Simulation configuration.
///
/// Loaded from a TOML file with `[params]`, `[init]` and `[run]` tables.
/// Missing entries take their default values.
/// See [`Config::from_file`] for loading.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub params: Params,
    pub init: InitParams,
    pub run: RunParams,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents).with_context(|| format!("failed to load {file:?}"))
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;
        config.validate().context("failed to validate config")?;
        Ok(config)
    }

    /// Serialize the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize config")
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate().context("invalid params")?;
        self.init.validate().context("invalid init")?;
        self.run.validate().context("invalid run")?;
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
