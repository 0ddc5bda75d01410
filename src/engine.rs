use crate::config::{OffspringModel, Params};
use crate::model::Population;
use crate::stats;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::{Bernoulli, Normal, Poisson};

/// Outcome of a single generation.
#[derive(Debug, Clone)]
pub struct Step {
    /// Number of bacteria that survived selection.
    pub survivors: usize,
    /// Number of offspring before capacity limiting.
    pub offspring: usize,
    /// Next generation.
    pub population: Population,
    /// Mean resistance of the next generation (NaN if it is empty).
    pub mean_resistance: f64,
}

/// Probability that a bacterium with resistance `res` survives concentration `conc`.
pub fn survival_probability(conc: f64, res: f64) -> f64 {
    (1.0 - (conc - res)).clamp(0.0, 1.0)
}

/// Advance `population` by one generation.
///
/// Performs selection, reproduction, mutation and capacity limiting.
/// The input population is left untouched.
pub fn step<R: Rng + ?Sized>(population: &[f64], params: &Params, rng: &mut R) -> Result<Step> {
    // Select survivors under antibiotic pressure.
    let survivors = select_survivors(population, params.antibiotic_concentration, rng)
        .context("failed to select survivors")?;

    // Reproduce survivors with mutation.
    let offspring = reproduce(&survivors, params, rng).context("failed to reproduce survivors")?;
    let n_offspring = offspring.len();

    // Limit population size.
    let population = limit_capacity(offspring, params.carrying_capacity, rng);

    let mean_resistance = stats::mean(&population);

    Ok(Step {
        survivors: survivors.len(),
        offspring: n_offspring,
        population,
        mean_resistance,
    })
}

fn select_survivors<R: Rng + ?Sized>(
    population: &[f64],
    conc: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let mut survivors = Vec::with_capacity(population.len());
    for &res in population {
        let surv_dist = Bernoulli::new(survival_probability(conc, res))?;
        if surv_dist.sample(rng) {
            survivors.push(res);
        }
    }
    Ok(survivors)
}

fn reproduce<R: Rng + ?Sized>(survivors: &[f64], params: &Params, rng: &mut R) -> Result<Vec<f64>> {
    let mut_dist = Normal::new(0.0, params.mutation_std)?;
    let poisson_dist = match params.offspring_model {
        OffspringModel::Poisson if params.reproduction_rate > 0.0 => {
            Some(Poisson::new(params.reproduction_rate)?)
        }
        _ => None,
    };

    let mut offspring = Vec::with_capacity(survivors.len());
    for &res in survivors {
        let n_offspring = match (params.offspring_model, &poisson_dist) {
            (OffspringModel::Legacy, _) => legacy_offspring_count(params.reproduction_rate, rng),
            (OffspringModel::Poisson, Some(dist)) => dist.sample(rng) as usize,
            (OffspringModel::Poisson, None) => 0,
        };

        // Each offspring inherits the parent's resistance plus gaussian noise.
        for _ in 0..n_offspring {
            let res_new = (res + mut_dist.sample(rng)).clamp(0.0, 1.0);
            offspring.push(res_new);
        }
    }
    Ok(offspring)
}

/// One Bernoulli trial with probability `min(remaining, 1)` per started unit of `rate`.
fn legacy_offspring_count<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> usize {
    let mut n_offspring = 0;
    let mut remaining = rate;
    while remaining > 0.0 {
        if rng.random::<f64>() < remaining {
            n_offspring += 1;
        }
        remaining -= 1.0;
    }
    n_offspring
}

fn limit_capacity<R: Rng + ?Sized>(
    offspring: Vec<f64>,
    capacity: usize,
    rng: &mut R,
) -> Population {
    if offspring.len() <= capacity {
        return offspring;
    }
    // Keep a uniform random subset without replacement.
    offspring.choose_multiple(rng, capacity).copied().collect()
}
