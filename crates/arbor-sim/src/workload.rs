//! Random producer mutations against an [`ObjectRegistry`].

use arbor_core::{NodeHandle, ObjectRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::rng::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Producer mutations per round.
    pub ops_per_round: usize,
    /// Relative weight of creations.
    pub create_weight: u32,
    /// Relative weight of destructions.
    pub destroy_weight: u32,
    /// Relative weight of re-parentings.
    pub reparent_weight: u32,
    /// Percentage of creations/re-parentings that target the root.
    pub root_percent: u8,
    /// Creations are skipped while this many nodes are live.
    pub max_live_nodes: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            ops_per_round: 4,
            create_weight: 5,
            destroy_weight: 2,
            reparent_weight: 3,
            root_percent: 20,
            max_live_nodes: 64,
        }
    }
}

/// One producer step, as recorded in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Created {
        node: NodeHandle,
        parent: Option<NodeHandle>,
    },
    Destroyed {
        node: NodeHandle,
        cascade: usize,
    },
    Reparented {
        node: NodeHandle,
        to: Option<NodeHandle>,
    },
    /// The registry refused the change (a cycle).
    Rejected {
        node: NodeHandle,
        to: Option<NodeHandle>,
    },
    /// Nothing to do (empty graph or node budget reached).
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Create,
    Destroy,
    Reparent,
}

/// Weighted random mutator.
#[derive(Debug, Clone)]
pub struct Workload {
    config: WorkloadConfig,
}

impl Workload {
    #[must_use]
    pub const fn new(config: WorkloadConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Perform one random mutation.
    ///
    /// # Errors
    ///
    /// Only unexpected registry failures; a rejected cycle is reported as
    /// [`Mutation::Rejected`].
    pub fn step(
        &self,
        registry: &ObjectRegistry,
        rng: &mut DeterministicRng,
    ) -> Result<Mutation, RegistryError> {
        let live = registry.live_nodes();
        let mutation = match self.pick_kind(rng) {
            Kind::Create if live.len() < self.config.max_live_nodes => {
                let parent = self.pick_parent(&live, rng);
                let node = registry.create(parent)?;
                Mutation::Created { node, parent }
            }
            Kind::Destroy => match rng.choose(&live) {
                Some(&node) => {
                    let cascade = registry.destroy(node)?.len();
                    Mutation::Destroyed { node, cascade }
                }
                None => Mutation::Idle,
            },
            Kind::Reparent => match rng.choose(&live) {
                Some(&node) => {
                    let to = self.pick_parent(&live, rng);
                    match registry.reparent(node, to) {
                        Ok(()) => Mutation::Reparented { node, to },
                        Err(RegistryError::CycleRejected { .. }) => Mutation::Rejected { node, to },
                        Err(err) => return Err(err),
                    }
                }
                None => Mutation::Idle,
            },
            Kind::Create => Mutation::Idle,
        };
        trace!(?mutation, "workload step");
        Ok(mutation)
    }

    fn pick_kind(&self, rng: &mut DeterministicRng) -> Kind {
        let c = &self.config;
        let total = u64::from(c.create_weight) + u64::from(c.destroy_weight) + u64::from(c.reparent_weight);
        let roll = rng.next_bounded(total.max(1));
        if roll < u64::from(c.create_weight) {
            Kind::Create
        } else if roll < u64::from(c.create_weight) + u64::from(c.destroy_weight) {
            Kind::Destroy
        } else {
            Kind::Reparent
        }
    }

    fn pick_parent(&self, live: &[NodeHandle], rng: &mut DeterministicRng) -> Option<NodeHandle> {
        if rng.hit_rate_percent(self.config.root_percent) {
            None
        } else {
            rng.choose(live).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_steps_can_only_create_or_idle() {
        let registry = ObjectRegistry::default();
        let workload = Workload::new(WorkloadConfig::default());
        let mut rng = DeterministicRng::new(1);
        let first = workload.step(&registry, &mut rng).expect("step");
        assert!(matches!(first, Mutation::Created { parent: None, .. } | Mutation::Idle));
    }

    #[test]
    fn node_budget_caps_creations() {
        let registry = ObjectRegistry::default();
        let workload = Workload::new(WorkloadConfig {
            create_weight: 1,
            destroy_weight: 0,
            reparent_weight: 0,
            max_live_nodes: 5,
            ..WorkloadConfig::default()
        });
        let mut rng = DeterministicRng::new(2);
        for _ in 0..20 {
            workload.step(&registry, &mut rng).expect("step");
        }
        assert_eq!(registry.live_count(), 5);
    }

    #[test]
    fn mixed_workload_is_deterministic_per_seed() {
        let run = |seed| {
            let registry = ObjectRegistry::default();
            let workload = Workload::new(WorkloadConfig::default());
            let mut rng = DeterministicRng::new(seed);
            let steps: Vec<Mutation> = (0..200)
                .map(|_| workload.step(&registry, &mut rng).expect("step"))
                .collect();
            (steps, registry.parent_map())
        };
        assert_eq!(run(17), run(17));
        let (steps, _) = run(17);
        assert!(steps.iter().any(|m| matches!(m, Mutation::Destroyed { .. })));
        assert!(steps.iter().any(|m| matches!(m, Mutation::Reparented { .. })));
    }
}
