use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arbor_core::{LifecycleEvent, NodeHandle, ObjectRegistry, TreeProjection};

use crate::rng::DeterministicRng;
use crate::simulator::SimulationResult;

/// Oracle result for one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// Diagnostic for a single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The index failed its mutual-inverse check right after an event.
    Consistency {
        round: u64,
        /// The event just applied; `None` for the final check.
        event: Option<LifecycleEvent>,
        error: String,
    },

    /// After full delivery the projection disagrees with the source graph.
    Convergence {
        /// Live in the source but not indexed.
        missing: Vec<NodeHandle>,
        /// Indexed but not live.
        extra: Vec<NodeHandle>,
        /// `(node, indexed parent, source parent)`.
        misplaced: Vec<(NodeHandle, Option<NodeHandle>, Option<NodeHandle>)>,
    },

    /// The tree rebuilt from notifications differs from the index, or the
    /// notification protocol was broken.
    NotificationReplay {
        protocol_errors: Vec<String>,
        rows_match: bool,
    },

    /// Re-applying a delivered `Added`/`Removed` changed the projection.
    Idempotence { event: LifecycleEvent },

    /// A shuffled replay of the delivered events against the final graph
    /// produced a different parent map.
    Commutativity {
        permutation_index: usize,
        differing_nodes: Vec<NodeHandle>,
    },
}

/// Post-run invariant checks for a [`SimulationResult`].
pub struct TreeOracle;

impl TreeOracle {
    /// Every per-event consistency check passed.
    #[must_use]
    pub fn check_consistency(result: &SimulationResult) -> OracleResult {
        let mut violations: Vec<InvariantViolation> = result
            .consistency_failures
            .iter()
            .map(|failure| InvariantViolation::Consistency {
                round: failure.round,
                event: Some(failure.event),
                error: failure.error.clone(),
            })
            .collect();
        if let Err(err) = result.engine.verify() {
            violations.push(InvariantViolation::Consistency {
                round: result.config.rounds,
                event: None,
                error: err.to_string(),
            });
        }
        OracleResult::from_violations(violations)
    }

    /// Indexed parent map equals the source graph's.
    #[must_use]
    pub fn check_convergence(
        engine: &BTreeMap<NodeHandle, Option<NodeHandle>>,
        source: &BTreeMap<NodeHandle, Option<NodeHandle>>,
    ) -> OracleResult {
        if engine == source {
            return OracleResult::pass();
        }
        let missing = source.keys().filter(|n| !engine.contains_key(n)).copied().collect();
        let extra = engine.keys().filter(|n| !source.contains_key(n)).copied().collect();
        let misplaced = engine
            .iter()
            .filter_map(|(&node, &indexed)| {
                source
                    .get(&node)
                    .filter(|&&actual| actual != indexed)
                    .map(|&actual| (node, indexed, actual))
            })
            .collect();
        OracleResult::from_violations(vec![InvariantViolation::Convergence {
            missing,
            extra,
            misplaced,
        }])
    }

    /// The shadow view matches the index and saw a well-formed protocol.
    #[must_use]
    pub fn check_notification_replay(result: &SimulationResult) -> OracleResult {
        let rows_match = result.shadow.rows == result.engine_rows;
        if rows_match && result.shadow.violations.is_empty() {
            return OracleResult::pass();
        }
        OracleResult::from_violations(vec![InvariantViolation::NotificationReplay {
            protocol_errors: result.shadow.violations.clone(),
            rows_match,
        }])
    }

    /// Re-deliver every distinct `Added`/`Removed` event; each must be a no-op.
    ///
    /// `Reparented` is excluded: re-delivering it moves the node to the end of
    /// its parent's rows.
    #[must_use]
    pub fn check_idempotence(
        engine: &TreeProjection<ObjectRegistry>,
        delivered: &[LifecycleEvent],
    ) -> OracleResult {
        let distinct: BTreeSet<(u8, NodeHandle)> = delivered
            .iter()
            .filter_map(|event| match *event {
                LifecycleEvent::Added(node) => Some((0, node)),
                LifecycleEvent::Removed(node) => Some((1, node)),
                LifecycleEvent::Reparented(_) => None,
            })
            .collect();

        let mut violations = Vec::new();
        for (tag, node) in distinct {
            let event = if tag == 0 {
                LifecycleEvent::Added(node)
            } else {
                LifecycleEvent::Removed(node)
            };
            let before = engine.snapshot();
            let outcome = engine.apply(event);
            if outcome.is_structural() || engine.snapshot() != before {
                violations.push(InvariantViolation::Idempotence { event });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Apply the delivered events in `iterations` shuffled orders to fresh
    /// projections over the final graph; all must match its parent map.
    #[must_use]
    pub fn check_commutativity(
        registry: &Arc<ObjectRegistry>,
        delivered: &[LifecycleEvent],
        rng: &mut DeterministicRng,
        iterations: usize,
    ) -> OracleResult {
        let expected = registry.parent_map();
        let mut violations = Vec::new();

        for permutation_index in 0..iterations {
            let mut events = delivered.to_vec();
            rng.shuffle(&mut events);

            let fresh = TreeProjection::new(Arc::clone(registry), registry.lock().clone());
            for event in events {
                fresh.apply(event);
            }

            let actual = fresh.snapshot().parent_map();
            if actual != expected {
                let differing_nodes = expected
                    .keys()
                    .chain(actual.keys())
                    .filter(|node| expected.get(node) != actual.get(node))
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                violations.push(InvariantViolation::Commutativity {
                    permutation_index,
                    differing_nodes,
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Run every check and merge the results.
    ///
    /// Idempotence runs last because it re-applies events to the live engine.
    #[must_use]
    pub fn check_all(result: &SimulationResult, rng: &mut DeterministicRng) -> OracleResult {
        let consistency = Self::check_consistency(result);
        let convergence = Self::check_convergence(&result.engine_parents, &result.source_parents);
        let replay = Self::check_notification_replay(result);
        let commutativity = Self::check_commutativity(&result.registry, &result.delivered, rng, 4);
        let idempotence = Self::check_idempotence(&result.engine, &result.delivered);

        consistency
            .merge(convergence)
            .merge(replay)
            .merge(commutativity)
            .merge(idempotence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulationConfig, Simulator};

    fn h(raw: u64) -> NodeHandle {
        NodeHandle::from_raw(raw)
    }

    #[test]
    fn convergence_reports_each_kind_of_difference() {
        let engine = BTreeMap::from([(h(1), None), (h(2), Some(h(1))), (h(9), None)]);
        let source = BTreeMap::from([(h(1), None), (h(2), None), (h(3), Some(h(1)))]);

        let result = TreeOracle::check_convergence(&engine, &source);
        assert!(!result.passed);
        assert_eq!(
            result.violations,
            vec![InvariantViolation::Convergence {
                missing: vec![h(3)],
                extra: vec![h(9)],
                misplaced: vec![(h(2), Some(h(1)), None)],
            }]
        );
    }

    #[test]
    fn identical_maps_converge() {
        let map = BTreeMap::from([(h(1), None)]);
        assert!(TreeOracle::check_convergence(&map, &map).passed);
    }

    #[test]
    fn merge_accumulates_failures() {
        let failed = OracleResult::from_violations(vec![InvariantViolation::Idempotence {
            event: LifecycleEvent::Added(h(1)),
        }]);
        let merged = OracleResult::pass().merge(failed).merge(OracleResult::pass());
        assert!(!merged.passed);
        assert_eq!(merged.violations.len(), 1);
    }

    #[test]
    fn full_suite_passes_on_a_faulty_run() {
        let config = SimulationConfig {
            seed: 3,
            rounds: 16,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("config").run().expect("run");
        let mut rng = DeterministicRng::new(3);
        let oracle = TreeOracle::check_all(&result, &mut rng);
        assert!(oracle.passed, "{:?}", oracle.violations);
    }
}
