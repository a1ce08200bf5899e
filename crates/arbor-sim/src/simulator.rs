//! One deterministic simulation run.
//!
//! Each round the workload mutates the registry, freshly published events are
//! queued with injected faults, and whatever is due is applied to the
//! projection. After the last round the queue is drained so every event is
//! delivered at least once.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use arbor_core::config::{ProjectionConfig, VerifyConfig};
use arbor_core::{
    ApplyOutcome, ApplyStats, LifecycleEvent, NodeHandle, ObjectLock, ObjectRegistry,
    TreeProjection,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::delivery::{DeliveryFaults, DeliveryQueue};
use crate::rng::DeterministicRng;
use crate::shadow::{ShadowObserver, ShadowReport};
use crate::workload::{Mutation, Workload, WorkloadConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub rounds: u64,
    pub workload: WorkloadConfig,
    pub faults: DeliveryFaults,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            rounds: 24,
            workload: WorkloadConfig::default(),
            faults: DeliveryFaults::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Rejects configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.workload.ops_per_round == 0 {
            bail!("ops_per_round must be > 0");
        }
        if self.workload.max_live_nodes == 0 {
            bail!("max_live_nodes must be > 0");
        }
        if self.workload.create_weight == 0 {
            bail!("create_weight must be > 0");
        }
        Ok(())
    }
}

/// One line of the simulation trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    Mutate {
        mutation: Mutation,
    },
    Enqueue {
        event: LifecycleEvent,
        delay_rounds: u8,
        duplicated: bool,
    },
    Deliver {
        event: LifecycleEvent,
        outcome: ApplyOutcome,
    },
    Reorder {
        batch: usize,
    },
}

/// Consistency check that failed right after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyFailure {
    pub round: u64,
    pub event: LifecycleEvent,
    pub error: String,
}

/// Everything a run produced, plus handles for post-run oracle checks.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub config: SimulationConfig,
    pub trace: Vec<TraceEvent>,
    /// Events in the order they were applied, duplicates included.
    pub delivered: Vec<LifecycleEvent>,
    pub engine_parents: BTreeMap<NodeHandle, Option<NodeHandle>>,
    pub source_parents: BTreeMap<NodeHandle, Option<NodeHandle>>,
    pub engine_rows: BTreeMap<Option<NodeHandle>, Vec<NodeHandle>>,
    pub shadow: ShadowReport,
    pub stats: ApplyStats,
    pub consistency_failures: Vec<ConsistencyFailure>,
    /// The run hit at least one of the engine's recovery paths.
    pub interesting_state_reached: bool,
    pub registry: Arc<ObjectRegistry>,
    pub engine: Arc<TreeProjection<ObjectRegistry>>,
}

impl SimulationResult {
    #[must_use]
    pub fn converged(&self) -> bool {
        self.engine_parents == self.source_parents
    }
}

/// Deterministic single-seed simulator.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    workload: Workload,
    queue: DeliveryQueue,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error when `config` fails validation.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng: DeterministicRng::new(config.seed),
            workload: Workload::new(config.workload),
            queue: DeliveryQueue::new(config.faults),
        })
    }

    /// Run every round, then drain the queue.
    ///
    /// # Errors
    ///
    /// Unexpected registry failures from the workload.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let lock = ObjectLock::new();
        let registry = Arc::new(ObjectRegistry::new(lock.clone()));
        let events = registry.subscribe();
        let projection_config = ProjectionConfig {
            verify: VerifyConfig {
                after_each_event: true,
            },
            ..ProjectionConfig::default()
        };
        let engine = Arc::new(TreeProjection::with_config(
            Arc::clone(&registry),
            lock,
            projection_config,
        ));
        let shadow = ShadowObserver::new();
        engine.subscribe(shadow.clone());

        let mut trace = Vec::new();
        let mut delivered = Vec::new();
        let mut consistency_failures = Vec::new();

        for round in 0..self.config.rounds {
            for _ in 0..self.config.workload.ops_per_round {
                let mutation = self.workload.step(&registry, &mut self.rng)?;
                trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Mutate { mutation },
                });
            }

            for event in events.try_iter() {
                let outcome = self.queue.enqueue(event, round, &mut self.rng);
                trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Enqueue {
                        event,
                        delay_rounds: outcome.delay_rounds,
                        duplicated: outcome.duplicated,
                    },
                });
            }

            let ready = self.queue.deliver_ready(round, &mut self.rng);
            Self::apply_batch(
                &engine,
                round,
                ready,
                &mut trace,
                &mut delivered,
                &mut consistency_failures,
            );
        }

        let final_round = self.config.rounds;
        let rest = self.queue.drain_all(&mut self.rng);
        debug!(remaining = rest.delivered.len(), "draining delivery queue");
        Self::apply_batch(
            &engine,
            final_round,
            rest,
            &mut trace,
            &mut delivered,
            &mut consistency_failures,
        );

        let snapshot = engine.snapshot();
        let stats = engine.stats();
        let interesting_state_reached = stats.ancestors_healed > 0
            || stats.ancestors_relocated > 0
            || stats.descendants_salvaged > 0
            || stats.ignored_not_live > 0;

        let result = SimulationResult {
            config: self.config,
            trace,
            delivered,
            engine_parents: snapshot.parent_map(),
            source_parents: registry.parent_map(),
            engine_rows: snapshot.children_map(),
            shadow: shadow.report(),
            stats,
            consistency_failures,
            interesting_state_reached,
            registry,
            engine,
        };
        info!(
            seed = self.config.seed,
            events = result.delivered.len(),
            converged = result.converged(),
            interesting = result.interesting_state_reached,
            "simulation finished"
        );
        Ok(result)
    }

    fn apply_batch(
        engine: &TreeProjection<ObjectRegistry>,
        round: u64,
        batch: crate::delivery::DeliverOutcome,
        trace: &mut Vec<TraceEvent>,
        delivered: &mut Vec<LifecycleEvent>,
        failures: &mut Vec<ConsistencyFailure>,
    ) {
        if batch.reordered {
            trace.push(TraceEvent {
                round,
                kind: TraceEventKind::Reorder {
                    batch: batch.delivered.len(),
                },
            });
        }
        for event in batch.delivered {
            let outcome = engine.apply(event);
            delivered.push(event);
            trace.push(TraceEvent {
                round,
                kind: TraceEventKind::Deliver { event, outcome },
            });
            if let Err(err) = engine.verify() {
                failures.push(ConsistencyFailure {
                    round,
                    event,
                    error: err.to_string(),
                });
            }
        }
    }
}
