//! Evolution of antibiotic resistance in a bacterial population.
//!
//! [`engine::step`] advances a population by one generation and
//! [`controller::Controller`] runs it on a background thread with
//! start/pause/resume/reset commands and consistent snapshots.

pub mod config;
pub mod controller;
pub mod engine;
pub mod model;
pub mod stats;

pub use config::{Config, InitParams, OffspringModel, Params, RunParams};
pub use controller::{Controller, Lifecycle, Snapshot};
