//! Lifecycle and background execution of the simulation.

use crate::config::{Config, InitParams, Params, RunParams};
use crate::engine;
use crate::model::{History, Population, State};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use std::{
    fmt,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Lifecycle phase of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Paused,
    Extinct,
    Completed,
}

impl Lifecycle {
    /// Whether a background loop is attached to this phase.
    pub fn is_active(self) -> bool {
        matches!(self, Lifecycle::Running | Lifecycle::Paused)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Paused => "paused",
            Lifecycle::Extinct => "extinct",
            Lifecycle::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Consistent point-in-time view of the simulation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: usize,
    pub lifecycle: Lifecycle,
    pub population: Arc<Population>,
    pub history: History,
    pub status: String,
}

impl Snapshot {
    pub fn population_size_history(&self) -> &[usize] {
        &self.history.population_size
    }

    pub fn mean_resistance_history(&self) -> &[f64] {
        &self.history.mean_resistance
    }
}

struct Shared {
    params: RwLock<Params>,
    init: RwLock<InitParams>,
    state: RwLock<State>,
    lifecycle: Mutex<Lifecycle>,
    wakeup: Condvar,
    status: Mutex<String>,
    rng: Mutex<ChaCha12Rng>,
    run: RunParams,
}

/// Background loop handle with its own stop flag.
struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Current loop plus stopped loops that outlived their join timeout.
#[derive(Default)]
struct Workers {
    current: Option<Worker>,
    retired: Vec<Worker>,
}

/// Simulation controller.
///
/// Owns the population, history and lifecycle, and advances the simulation
/// on a dedicated thread. Commands and reads may come from any thread.
pub struct Controller {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
    join_timeout: Duration,
}

impl Controller {
    /// Create a controller in the `Idle` phase with an initialized population.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;

        let mut rng = match cfg.run.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed rng")?,
        };

        let state = State::generate_initial_condition(&cfg.init, &mut rng)
            .context("failed to generate initial condition")?;

        let shared = Shared {
            params: RwLock::new(cfg.params),
            init: RwLock::new(cfg.init),
            state: RwLock::new(state),
            lifecycle: Mutex::new(Lifecycle::Idle),
            wakeup: Condvar::new(),
            status: Mutex::new("Ready. Start to begin simulation.".to_string()),
            rng: Mutex::new(rng),
            run: cfg.run,
        };

        Ok(Self {
            shared: Arc::new(shared),
            workers: Mutex::new(Workers::default()),
            join_timeout: cfg.run.join_timeout(),
        })
    }

    /// Resample the population from `init` and reset generation and history.
    ///
    /// Only allowed while `Idle`.
    pub fn initialize(&self, init: InitParams) -> Result<()> {
        let result = self.try_initialize(init);
        self.report(&result, "failed to initialize population");
        result
    }

    fn try_initialize(&self, init: InitParams) -> Result<()> {
        init.validate().context("invalid initial parameters")?;

        let lifecycle = lock(&self.shared.lifecycle);
        if *lifecycle != Lifecycle::Idle {
            bail!("cannot initialize while {}", *lifecycle);
        }

        *write(&self.shared.init) = init;
        self.shared.reinitialize(init)?;
        self.shared
            .set_status("Population initialized. Ready to start simulation.");
        Ok(())
    }

    /// Start the background loop.
    ///
    /// An empty population, including one left by extinction, is initialized
    /// first. Does nothing if a loop is already active.
    pub fn start(&self) -> Result<()> {
        let result = self.try_start();
        self.report(&result, "failed to start simulation");
        result
    }

    fn try_start(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        let mut lifecycle = lock(&self.shared.lifecycle);
        match *lifecycle {
            Lifecycle::Idle | Lifecycle::Extinct => {}
            Lifecycle::Running | Lifecycle::Paused => return Ok(()),
            Lifecycle::Completed => {
                bail!("simulation is {}, reset to start a new one", *lifecycle)
            }
        }

        if read(&self.shared.state).population.is_empty() {
            let init = *read(&self.shared.init);
            self.shared.reinitialize(init)?;
            log::info!("population reinitialized before start");
        }

        // The previous loop has exited or been told to stop.
        if let Some(old) = workers.current.take() {
            old.stop.store(true, Ordering::SeqCst);
            if let Some(old) = old.join(self.join_timeout) {
                workers.retired.push(old);
            }
        }
        workers.reap();

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("resistor-sim".into())
                .spawn(move || shared.run_loop(&stop))
                .context("failed to spawn simulation thread")?
        };
        workers.current = Some(Worker { stop, handle });

        *lifecycle = Lifecycle::Running;
        self.shared.set_status("Simulation running...");
        drop(lifecycle);
        self.shared.wakeup.notify_all();
        log::info!("simulation started");
        Ok(())
    }

    /// Suspend a running simulation; does nothing otherwise.
    pub fn pause(&self) {
        self.shared
            .transition(Lifecycle::Running, Lifecycle::Paused, "Simulation paused.");
    }

    /// Resume a paused simulation; does nothing otherwise.
    pub fn resume(&self) {
        self.shared
            .transition(Lifecycle::Paused, Lifecycle::Running, "Simulation resumed.");
    }

    /// Stop the background loop, reinitialize the population and return to `Idle`.
    ///
    /// A loop that does not stop within the join timeout is retired and joined
    /// later; it can no longer modify the state.
    pub fn reset(&self) -> Result<()> {
        let result = self.try_reset();
        self.report(&result, "failed to reset simulation");
        result
    }

    fn try_reset(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        if let Some(current) = workers.current.take() {
            current.stop.store(true, Ordering::SeqCst);
            self.shared.wakeup.notify_all();
            if let Some(current) = current.join(self.join_timeout) {
                log::warn!(
                    "simulation thread did not stop within {:?}, resetting anyway",
                    self.join_timeout
                );
                workers.retired.push(current);
            }
        }
        workers.reap();

        let mut lifecycle = lock(&self.shared.lifecycle);
        *lifecycle = Lifecycle::Idle;
        let init = *read(&self.shared.init);
        self.shared.reinitialize(init)?;
        self.shared.set_status("Simulation reset.");
        drop(lifecycle);
        self.shared.wakeup.notify_all();

        log::info!("simulation reset");
        Ok(())
    }

    /// Replace the live parameters; they apply from the next generation on.
    ///
    /// Invalid parameters are rejected and the current ones are kept.
    pub fn update_parameters(&self, params: Params) -> Result<()> {
        let result = params.validate().context("invalid parameters");
        if result.is_ok() {
            *write(&self.shared.params) = params;
            log::debug!("{params:?}");
        }
        self.report(&result, "rejected parameter update");
        result
    }

    /// Replace the parameters used by the next initialization.
    pub fn update_init_parameters(&self, init: InitParams) -> Result<()> {
        let result = init.validate().context("invalid initial parameters");
        if result.is_ok() {
            *write(&self.shared.init) = init;
        }
        self.report(&result, "rejected initial parameter update");
        result
    }

    pub fn params(&self) -> Params {
        *read(&self.shared.params)
    }

    pub fn init_params(&self) -> InitParams {
        *read(&self.shared.init)
    }

    pub fn generation(&self) -> usize {
        read(&self.shared.state).generation
    }

    pub fn population(&self) -> Arc<Population> {
        Arc::clone(&read(&self.shared.state).population)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *lock(&self.shared.lifecycle)
    }

    pub fn status(&self) -> String {
        lock(&self.shared.status).clone()
    }

    /// Take a consistent view of generation, population and history.
    pub fn snapshot(&self) -> Snapshot {
        let lifecycle = self.lifecycle();
        let status = self.status();
        let state = read(&self.shared.state);
        Snapshot {
            generation: state.generation,
            lifecycle,
            population: Arc::clone(&state.population),
            history: state.history.clone(),
            status,
        }
    }

    /// Block until the simulation leaves `Running`/`Paused` or `timeout` elapses.
    ///
    /// Returns the phase observed last.
    pub fn wait_while_active(&self, timeout: Duration) -> Lifecycle {
        let lifecycle = lock(&self.shared.lifecycle);
        let (lifecycle, _) = self
            .shared
            .wakeup
            .wait_timeout_while(lifecycle, timeout, |lifecycle| lifecycle.is_active())
            .unwrap_or_else(PoisonError::into_inner);
        *lifecycle
    }

    fn report(&self, result: &Result<()>, what: &str) {
        if let Err(error) = result {
            log::warn!("{what}: {error:#}");
            self.shared.set_status(&format!("Error: {error:#}"));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
        let workers = workers.current.take().into_iter().chain(workers.retired.drain(..));
        let deadline = Instant::now() + self.join_timeout;
        for worker in workers {
            worker.stop.store(true, Ordering::SeqCst);
            self.shared.wakeup.notify_all();
            let timeout = deadline.saturating_duration_since(Instant::now());
            if worker.join(timeout).is_some() {
                log::warn!("simulation thread still running on shutdown");
            }
        }
    }
}

impl Workers {
    /// Join the retired loops that have exited by now.
    fn reap(&mut self) {
        self.retired = std::mem::take(&mut self.retired)
            .into_iter()
            .filter_map(|worker| worker.join(Duration::ZERO))
            .collect();
    }
}

impl Worker {
    /// Join the thread, waiting at most `timeout`.
    ///
    /// Gives the worker back if it is still running.
    fn join(self, timeout: Duration) -> Option<Self> {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return Some(self);
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.handle.join().is_err() {
            log::error!("simulation thread panicked");
        }
        None
    }
}

impl Shared {
    fn run_loop(&self, stop: &AtomicBool) {
        loop {
            if !self.wait_until_running(stop) {
                break;
            }

            let population = Arc::clone(&read(&self.state).population);
            if population.is_empty() {
                self.finish(
                    stop,
                    Lifecycle::Extinct,
                    "Population extinct! Reset to start a new simulation.",
                );
                break;
            }

            // Parameters are read fresh every generation.
            let params = *read(&self.params);

            let step = {
                let mut rng = lock(&self.rng);
                engine::step(&population, &params, &mut *rng)
            };
            let step = match step {
                Ok(step) => step,
                Err(error) => {
                    log::error!("failed to perform step: {error:#}");
                    self.finish(stop, Lifecycle::Idle, &format!("Simulation stopped: {error:#}"));
                    break;
                }
            };

            let n_kept = step.population.len();
            let generation = {
                let mut state = write(&self.state);
                // Checked under the lock so a stopped loop never writes over a reset.
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                state.advance(step.population, step.mean_resistance);
                state.generation
            };
            log::debug!(
                "generation {generation}: {} survivors, {} offspring, {} kept, mean resistance {:.4}",
                step.survivors,
                step.offspring,
                n_kept,
                step.mean_resistance
            );

            if params.max_generations != 0 && generation >= params.max_generations {
                self.finish(
                    stop,
                    Lifecycle::Completed,
                    &format!("Simulation completed after {generation} generations."),
                );
                break;
            }

            self.pace(stop, params.speed);
        }
        log::debug!("simulation thread exiting");
    }

    /// Wait while paused; false once the loop must exit.
    fn wait_until_running(&self, stop: &AtomicBool) -> bool {
        let lifecycle = lock(&self.lifecycle);
        let lifecycle = self
            .wakeup
            .wait_while(lifecycle, |lifecycle| {
                *lifecycle == Lifecycle::Paused && !stop.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
        !stop.load(Ordering::SeqCst) && *lifecycle == Lifecycle::Running
    }

    /// Sleep between generations, waking early on stop.
    fn pace(&self, stop: &AtomicBool, speed: f64) {
        let interval = self.run.step_interval(speed);
        if interval.is_zero() {
            return;
        }
        let lifecycle = lock(&self.lifecycle);
        let _ = self
            .wakeup
            .wait_timeout_while(lifecycle, interval, |_| !stop.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn finish(&self, stop: &AtomicBool, terminal: Lifecycle, status: &str) {
        let mut lifecycle = lock(&self.lifecycle);
        if stop.load(Ordering::SeqCst) {
            return;
        }
        *lifecycle = terminal;
        // Status is set before observers are woken.
        self.set_status(status);
        drop(lifecycle);
        self.wakeup.notify_all();

        log::info!("simulation {terminal}: {status}");
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle, status: &str) {
        let mut lifecycle = lock(&self.lifecycle);
        if *lifecycle != from {
            return;
        }
        *lifecycle = to;
        self.set_status(status);
        drop(lifecycle);
        self.wakeup.notify_all();

        log::info!("simulation {to}");
    }

    fn reinitialize(&self, init: InitParams) -> Result<()> {
        let state = {
            let mut rng = lock(&self.rng);
            State::generate_initial_condition(&init, &mut *rng)
                .context("failed to generate initial condition")?
        };
        *write(&self.state) = state;
        Ok(())
    }

    fn set_status(&self, status: &str) {
        *lock(&self.status) = status.to_string();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw_lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw_lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw_lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw_lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(60);

    #[test]
    fn timed_out_loop_never_writes_after_reset() {
        let mut cfg = Config::default();
        cfg.run.seed = Some(21);
        cfg.run.base_interval_ms = 0;
        cfg.run.join_timeout_ms = 0;
        cfg.init.n_bacteria = 1_000_000;
        cfg.params.antibiotic_concentration = 0.0;
        cfg.params.reproduction_rate = 3.0;
        cfg.params.carrying_capacity = 10_000_000;
        let ctrl = Controller::new(cfg).expect("failed to construct controller");

        ctrl.start().expect("failed to start");
        thread::sleep(Duration::from_millis(10));
        ctrl.reset().expect("failed to reset");
        assert_eq!(ctrl.lifecycle(), Lifecycle::Idle);

        // Wait for the stopped loop to finish its step and exit.
        let start = Instant::now();
        loop {
            let snapshot = ctrl.snapshot();
            assert_eq!(snapshot.generation, 0);
            assert_eq!(snapshot.history.len(), 1);
            assert_eq!(snapshot.population.len(), 1_000_000);

            let mut workers = lock(&ctrl.workers);
            assert!(workers.current.is_none());
            workers.reap();
            if workers.retired.is_empty() {
                break;
            }
            drop(workers);
            assert!(start.elapsed() < DEADLINE, "stopped loop did not exit");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ctrl.generation(), 0);
        assert_eq!(ctrl.snapshot().history.len(), 1);
        assert_eq!(ctrl.lifecycle(), Lifecycle::Idle);

        ctrl.start().expect("failed to restart");
        assert_eq!(ctrl.lifecycle(), Lifecycle::Running);
        ctrl.pause();
    }

    #[test]
    fn start_takes_over_stale_worker() {
        let mut cfg = Config::default();
        cfg.run.seed = Some(22);
        cfg.run.base_interval_ms = 0;
        cfg.run.join_timeout_ms = 0;
        cfg.init.n_bacteria = 500_000;
        cfg.params.antibiotic_concentration = 0.0;
        cfg.params.reproduction_rate = 3.0;
        cfg.params.carrying_capacity = 10_000_000;
        let ctrl = Controller::new(cfg).expect("failed to construct controller");

        ctrl.start().expect("failed to start");
        ctrl.reset().expect("failed to reset");
        ctrl.start().expect("failed to restart");
        assert_eq!(ctrl.lifecycle(), Lifecycle::Running);

        // Every thread is still tracked: nothing was detached.
        let workers = lock(&ctrl.workers);
        assert!(workers.current.is_some());
        assert!(workers.retired.len() <= 1);
    }
}
