//! simulation — diversification and fossil-preservation simulators.
//!
//! Purpose
//! -------
//! Generate synthetic evolutionary histories and their fossil records: a
//! stochastic rate process drives a birth–death simulator, whose lineages are
//! placed in space and sampled by a preservation model. Batches of replicates
//! run in parallel under a shared [`RunContext`].
//!
//! Key behaviors
//! -------------
//! - [`rates`]: piecewise-constant birth/death regimes with Poisson shift
//!   counts, mass-extinction / mass-speciation pulses and an optional
//!   diversity-dependent (equilibrium) death rate.
//! - [`birth_death`]: discrete-step birth–death simulation with bounded
//!   rejection resampling.
//! - [`geography`] and [`area_constraints`]: area sizes, origin areas,
//!   dispersal, and carrying-capacity masks.
//! - [`preservation`]: species-, area- and time-dependent sampling rates and
//!   Poisson occurrence draws, with locality counts and provenance records.
//! - [`batch`]: seeded rayon workers returning results in worker order.
//!
//! Invariants & assumptions
//! ------------------------
//! - Ages are in Myr before present; per-bin arrays are youngest-first.
//! - Every configuration struct is validated at construction; samplers never
//!   re-check their inputs.
//! - All randomness flows through an explicit `Rng`; a seed fully determines
//!   a replicate.
//!
//! Conventions
//! -----------
//! - Errors are reported as [`SimError`]; per-replicate stochastic failures
//!   are retried inside the birth–death simulator and only surface once the
//!   retry budget is exhausted.
//! - Replicate rejections are logged at `debug`, worker failures at `warn`.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests for its invariants; end-to-end
//!   scenarios live in `tests/integration_pipeline.rs`.

pub mod area_constraints;
pub mod batch;
pub mod birth_death;
pub mod errors;
pub mod geography;
pub mod preservation;
pub mod ranges;
pub mod rates;
pub mod time_bins;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::area_constraints::CarryingCapacity;
pub use self::batch::{collect_batches, RunContext, WorkerOutcome};
pub use self::birth_death::{BirthDeathConfig, BirthDeathSimulator, Lineage, LineageSet};
pub use self::errors::{SimError, SimResult};
pub use self::preservation::{
    FossilRecord, OccurrenceData, OccurrenceRecord, PreservationConfig, PreservationModel,
    SimulationSettings, TemporalModel,
};
pub use self::ranges::ParamRange;
pub use self::rates::{
    DeathModel, Event, RateProcess, RateProcessConfig, RateRegime, RateSchedule, RateSegment,
    RateTarget,
};
pub use self::time_bins::{AreaSpan, AreaTable, TimeBinning};
