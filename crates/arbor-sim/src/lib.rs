//! arbor-sim library.
//!
//! Deterministic, seedable simulation of a producer mutating an object graph
//! while its lifecycle events reach a [`arbor_core::TreeProjection`] late,
//! twice, or out of order.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod delivery;
pub mod oracle;
pub mod rng;
pub mod shadow;
pub mod simulator;
pub mod workload;

pub use campaign::{CampaignConfig, CampaignReport, DetailedTrace, replay_seed, run_campaign, run_single_seed};
pub use delivery::{DeliveryFaults, DeliveryQueue};
pub use oracle::{InvariantViolation, OracleResult, TreeOracle};
pub use rng::DeterministicRng;
pub use shadow::{ShadowObserver, ShadowReport};
pub use simulator::{SimulationConfig, SimulationResult, Simulator, TraceEvent, TraceEventKind};
pub use workload::{Mutation, Workload, WorkloadConfig};
