//! Summary statistics of resistance values.

use serde::{Deserialize, Serialize};

/// Running mean and variance (Welford) with extrema.
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

/// Summary of a population.
///
/// Every statistic is NaN for an empty population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub size: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> Summary {
        if self.n_vals == 0 {
            return Summary {
                size: 0,
                mean: f64::NAN,
                std_dev: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        Summary {
            size: self.n_vals,
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
            min: self.min,
            max: self.max,
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Summarize a population of resistance values.
pub fn summarize(vals: &[f64]) -> Summary {
    let mut acc = Accumulator::new();
    vals.iter().for_each(|&val| acc.add(val));
    acc.report()
}

/// Arithmetic mean, NaN for an empty slice.
pub fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

/// Fixed-width histogram of resistance values over [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<usize>,
}

impl Histogram {
    pub const DEFAULT_N_BINS: usize = 30;

    /// Bin `vals` into `n_bins` equal bins; 1.0 falls into the last bin.
    pub fn new(vals: &[f64], n_bins: usize) -> Self {
        let mut counts = vec![0; n_bins];
        if n_bins == 0 {
            return Self { counts };
        }
        for &val in vals {
            let i_bin = ((val.clamp(0.0, 1.0) * n_bins as f64) as usize).min(n_bins - 1);
            counts[i_bin] += 1;
        }
        Self { counts }
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn bin_center(&self, i_bin: usize) -> f64 {
        (i_bin as f64 + 0.5) / self.n_bins() as f64
    }

    /// Split the counts into bins centered below the concentration
    /// (susceptible) and at or above it (resistant).
    pub fn split_at(&self, concentration: f64) -> (usize, usize) {
        self.counts
            .iter()
            .enumerate()
            .fold((0, 0), |(sus, res), (i_bin, &count)| {
                if self.bin_center(i_bin) < concentration {
                    (sus + count, res)
                } else {
                    (sus, res + count)
                }
            })
    }
}
