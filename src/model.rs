//! Simulation data types.

use crate::config::InitParams;
use crate::stats;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resistance values of the current generation, each in [0, 1].
pub type Population = Vec<f64>;

/// Per-generation series, entry 0 being the initial population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub population_size: Vec<usize>,
    /// NaN marks a generation with no bacteria left.
    pub mean_resistance: Vec<f64>,
}

impl History {
    /// Start a history from the initial population.
    pub fn new(population: &[f64]) -> Self {
        let mut history = Self::default();
        history.push(population.len(), stats::mean(population));
        history
    }

    pub fn push(&mut self, population_size: usize, mean_resistance: f64) {
        self.population_size.push(population_size);
        self.mean_resistance.push(mean_resistance);
    }

    pub fn len(&self) -> usize {
        self.population_size.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population_size.is_empty()
    }
}

/// State of the simulation at a given generation.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Number of completed generations.
    pub generation: usize,

    /// Shared with readers, replaced as a whole after each step.
    pub population: Arc<Population>,

    pub history: History,
}

impl State {
    /// Generate a generation 0 state with resistances drawn uniformly
    /// from the initial range.
    pub fn generate_initial_condition<R: Rng + ?Sized>(
        init: &InitParams,
        rng: &mut R,
    ) -> Result<Self> {
        let res_dist = Uniform::new_inclusive(init.min_resistance, init.max_resistance)
            .context("failed to construct initial resistance distribution")?;
        let population: Population = (0..init.n_bacteria)
            .map(|_| res_dist.sample(rng).clamp(0.0, 1.0))
            .collect();

        let history = History::new(&population);

        Ok(Self {
            generation: 0,
            population: Arc::new(population),
            history,
        })
    }

    /// Replace the population and record it as the next generation.
    pub fn advance(&mut self, population: Population, mean_resistance: f64) {
        self.history.push(population.len(), mean_resistance);
        self.population = Arc::new(population);
        self.generation += 1;
    }
}

/// Record of a finished run.
///
/// Contains the final generation, the series of every generation and the final population.
#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub generation: usize,

    pub history: History,

    pub population: Population,

    /// Human-readable outcome of the run.
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn initial_condition_matches_init_params() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let init = InitParams {
            n_bacteria: 1000,
            min_resistance: 0.0,
            max_resistance: 0.1,
        };
        let state = State::generate_initial_condition(&init, &mut rng)
            .expect("failed to generate initial condition");

        assert_eq!(state.generation, 0);
        assert_eq!(state.population.len(), 1000);
        assert!(state.population.iter().all(|&res| (0.0..=0.1).contains(&res)));
        assert_eq!(state.history.population_size, vec![1000]);
        assert_eq!(state.history.mean_resistance, vec![stats::mean(&state.population)]);
    }

    #[test]
    fn empty_initial_population_has_nan_mean() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let init = InitParams {
            n_bacteria: 0,
            ..InitParams::default()
        };
        let state = State::generate_initial_condition(&init, &mut rng)
            .expect("failed to generate initial condition");

        assert!(state.population.is_empty());
        assert_eq!(state.history.len(), 1);
        assert!(state.history.mean_resistance[0].is_nan());
    }

    #[test]
    fn advance_keeps_history_aligned() {
        let mut state = State {
            population: Arc::new(vec![0.5]),
            history: History::new(&[0.5]),
            ..State::default()
        };
        state.advance(vec![0.25, 0.75], 0.5);
        state.advance(Vec::new(), f64::NAN);

        assert_eq!(state.generation, 2);
        assert_eq!(state.history.len(), state.generation + 1);
        assert_eq!(state.history.mean_resistance.len(), state.generation + 1);
        assert_eq!(state.history.population_size, vec![1, 2, 0]);
        assert!(state.population.is_empty());
    }
}
