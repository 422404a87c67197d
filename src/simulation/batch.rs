//! Batch simulation — run context and seeded parallel workers.
//!
//! Purpose
//! -------
//! Bundle the read-only inputs of a pipeline invocation ([`RunContext`]) and
//! run independent replicates across a fixed number of workers.
//!
//! Key behaviors
//! -------------
//! - Worker `w` draws from `ChaCha8Rng::seed_from_u64(base_seed + w)` and
//!   simulates a fixed, pre-assigned number of replicates.
//! - Workers run on the rayon pool and share nothing mutable; outcomes come
//!   back in worker-index order regardless of scheduling.
//! - A replicate that exhausts its retry budget aborts its worker's batch
//!   only; the other workers' results are kept.
//!
//! Conventions
//! -----------
//! - Each replicate is handed to a caller-supplied mapping (e.g. feature
//!   extraction) so a worker holds only its reduced outputs.
use crate::simulation::{
    area_constraints::CarryingCapacity,
    birth_death::{BirthDeathConfig, BirthDeathSimulator, LineageSet},
    errors::{SimError, SimResult},
    preservation::{FossilRecord, PreservationConfig, PreservationModel},
    time_bins::{AreaTable, TimeBinning},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

/// RunContext — everything a simulation batch reads, built once.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub binning: TimeBinning,
    pub areas: AreaTable,
    pub birth_death: BirthDeathSimulator,
    pub preservation: PreservationModel,
    /// Derive carrying-capacity masks from the area table per replicate.
    pub use_area_constraints: bool,
    pub base_seed: u64,
    pub n_workers: usize,
    pub replicates_per_worker: usize,
}

/// Result of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome<T> {
    pub worker: usize,
    pub seed: u64,
    pub result: SimResult<Vec<T>>,
}

impl RunContext {
    /// Validate both simulator configs and the worker layout.
    ///
    /// Errors
    /// ------
    /// - Any configuration error from the simulators.
    /// - `SimError::InvalidParameter` when `n_workers == 0`.
    pub fn new(
        binning: TimeBinning, areas: AreaTable, birth_death: BirthDeathConfig,
        preservation: PreservationConfig, base_seed: u64, n_workers: usize,
        replicates_per_worker: usize,
    ) -> SimResult<Self> {
        if n_workers == 0 {
            return Err(SimError::InvalidParameter {
                name: "n_workers",
                value: 0.0,
                reason: "At least one worker is required.",
            });
        }
        Ok(RunContext {
            binning,
            areas,
            birth_death: BirthDeathSimulator::new(birth_death)?,
            preservation: PreservationModel::new(preservation)?,
            use_area_constraints: false,
            base_seed,
            n_workers,
            replicates_per_worker,
        })
    }

    pub fn with_area_constraints(mut self, enabled: bool) -> Self {
        self.use_area_constraints = enabled;
        self
    }

    /// Seed of worker `w`.
    pub fn worker_seed(&self, worker: usize) -> u64 {
        self.base_seed.wrapping_add(worker as u64)
    }

    /// Simulate one replicate: lineages, then their fossil record.
    pub fn simulate_replicate<R: Rng + ?Sized>(&self, rng: &mut R) -> SimResult<(LineageSet, FossilRecord)> {
        let lineages = self.birth_death.simulate_with_rng(rng)?;
        let record = if self.use_area_constraints {
            let capacity = CarryingCapacity::from_area_table(&lineages, &self.binning, &self.areas);
            self.preservation
                .with_carrying_capacity(capacity)
                .simulate(&lineages, &self.binning, &self.areas, rng)?
        } else {
            self.preservation.simulate(&lineages, &self.binning, &self.areas, rng)?
        };
        Ok((lineages, record))
    }

    /// Run worker `worker` sequentially, mapping every replicate through `map`.
    pub fn run_worker<T, F>(&self, worker: usize, map: &F) -> SimResult<Vec<T>>
    where
        F: Fn(&LineageSet, FossilRecord) -> T,
    {
        let mut rng = ChaCha8Rng::seed_from_u64(self.worker_seed(worker));
        let mut out = Vec::with_capacity(self.replicates_per_worker);
        for _ in 0..self.replicates_per_worker {
            let (lineages, record) = self.simulate_replicate(&mut rng)?;
            out.push(map(&lineages, record));
        }
        Ok(out)
    }

    /// Run every worker in parallel; outcomes are in worker-index order.
    pub fn simulate_batch<T, F>(&self, map: F) -> Vec<WorkerOutcome<T>>
    where
        T: Send,
        F: Fn(&LineageSet, FossilRecord) -> T + Sync,
    {
        info!(
            n_workers = self.n_workers,
            replicates_per_worker = self.replicates_per_worker,
            base_seed = self.base_seed,
            "starting simulation batch"
        );
        let outcomes: Vec<WorkerOutcome<T>> = (0..self.n_workers)
            .into_par_iter()
            .map(|worker| {
                let seed = self.worker_seed(worker);
                let result = self.run_worker(worker, &map);
                match &result {
                    Ok(batch) => info!(worker, seed, n = batch.len(), "worker finished"),
                    Err(err) => warn!(worker, seed, error = %err, "worker batch aborted"),
                }
                WorkerOutcome { worker, seed, result }
            })
            .collect();
        outcomes
    }
}

/// Concatenate successful batches in worker order; failed workers become
/// `SimError::WorkerFailed`.
pub fn collect_batches<T>(outcomes: Vec<WorkerOutcome<T>>) -> (Vec<T>, Vec<SimError>) {
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(batch) => items.extend(batch),
            Err(source) => failures.push(SimError::WorkerFailed {
                worker: outcome.worker,
                seed: outcome.seed,
                source: Box::new(source),
            }),
        }
    }
    (items, failures)
}
