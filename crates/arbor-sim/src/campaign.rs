//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same parameters, collecting pass/fail results
//! and the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use arbor_core::ErrorCode;
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryFaults;
use crate::oracle::{InvariantViolation, OracleResult, TreeOracle};
use crate::rng::DeterministicRng;
use crate::simulator::{SimulationConfig, SimulationResult, Simulator};
use crate::workload::WorkloadConfig;

/// Salt separating the oracle's shuffle stream from the simulation's.
const ORACLE_SEED_SALT: u64 = 0xDEAD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    /// Simulation rounds per seed.
    pub rounds: u64,
    /// Producer mutations per round.
    pub ops_per_round: usize,
    /// Upper bound on live nodes.
    pub max_live_nodes: usize,
    /// Maximum delivery delay in rounds.
    pub fault_max_delay: u8,
    /// Delivery duplication probability (percent, 0–100).
    pub fault_duplicate_percent: u8,
    /// Ready-batch shuffle probability (percent, 0–100).
    pub fault_reorder_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            rounds: 24,
            ops_per_round: 4,
            max_live_nodes: 48,
            fault_max_delay: 3,
            fault_duplicate_percent: 5,
            fault_reorder_percent: 20,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            rounds: self.rounds,
            workload: WorkloadConfig {
                ops_per_round: self.ops_per_round,
                max_live_nodes: self.max_live_nodes,
                ..WorkloadConfig::default()
            },
            faults: DeliveryFaults {
                max_delay_rounds: self.fault_max_delay,
                duplicate_rate_percent: self.fault_duplicate_percent,
                reorder_rate_percent: self.fault_reorder_percent,
            },
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        let code = ErrorCode::InvalidSimulationConfig;
        if self.seed_range.is_empty() {
            bail!("{code}: seed_range must not be empty");
        }
        if self.rounds == 0 {
            bail!("{code}: rounds must be > 0");
        }
        if self.ops_per_round == 0 {
            bail!("{code}: ops_per_round must be > 0");
        }
        if self.max_live_nodes == 0 {
            bail!("{code}: max_live_nodes must be > 0");
        }
        if self.fault_duplicate_percent > 100 || self.fault_reorder_percent > 100 {
            bail!("{code}: fault percentages must be within 0..=100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds whose run exercised at least one recovery path.
    pub interesting_states_reached: usize,
    /// Events applied across all seeds.
    pub events_applied: u64,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Detailed trace produced by replaying a single seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

impl DetailedTrace {
    /// Human-readable lines for every violation.
    #[must_use]
    pub fn violation_lines(&self) -> Vec<String> {
        self.oracle.violations.iter().map(format_violation).collect()
    }
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
        events_applied: 0,
    };

    for seed in config.seed_range.clone() {
        let (result, oracle) = run_seed(seed, config)?;
        report.seeds_run += 1;
        report.events_applied += result.stats.events;
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(report)
}

/// Run a single seed and return `Ok(())` on pass, `Err(violations)` on failure.
///
/// # Errors
///
/// The outer error is an internal simulation failure; the inner `Result`
/// distinguishes pass from invariant violations.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let (_, oracle) = run_seed(seed, config)?;
    if oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(oracle.violations))
    }
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let (result, oracle) = run_seed(seed, config)?;
    Ok(DetailedTrace { result, oracle })
}

fn run_seed(seed: u64, config: &CampaignConfig) -> Result<(SimulationResult, OracleResult)> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let mut oracle_rng = DeterministicRng::new(seed.wrapping_add(ORACLE_SEED_SALT));
    let oracle = TreeOracle::check_all(&result, &mut oracle_rng);
    Ok((result, oracle))
}

/// Format an invariant violation into a human-readable string.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Consistency {
            round,
            event,
            error,
        } => match event {
            Some(event) => format!("Consistency: after {event} in round {round}: {error}"),
            None => format!("Consistency: final index check failed: {error}"),
        },
        InvariantViolation::Convergence {
            missing,
            extra,
            misplaced,
        } => format!(
            "Convergence: projection diverges from source \
             (missing={missing:?}, extra={extra:?}, misplaced={})",
            misplaced.len()
        ),
        InvariantViolation::NotificationReplay {
            protocol_errors,
            rows_match,
        } => format!(
            "NotificationReplay: rows_match={rows_match}, {} protocol errors{}",
            protocol_errors.len(),
            protocol_errors
                .first()
                .map(|first| format!(" (first: {first})"))
                .unwrap_or_default()
        ),
        InvariantViolation::Idempotence { event } => {
            format!("Idempotence: re-applying {event} changed the projection")
        }
        InvariantViolation::Commutativity {
            permutation_index,
            differing_nodes,
        } => format!(
            "Commutativity: permutation {permutation_index} diverges on {} nodes",
            differing_nodes.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{LifecycleEvent, NodeHandle};

    #[test]
    fn campaign_config_default_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn campaign_config_empty_seed_range_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        let err = config.validate().expect_err("empty range");
        assert!(err.to_string().starts_with("E4001"));
    }

    #[test]
    fn campaign_config_zero_rounds_rejected() {
        let config = CampaignConfig {
            rounds: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn campaign_config_bad_percent_rejected() {
        let config = CampaignConfig {
            fault_reorder_percent: 101,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sim_config_for_seed_carries_parameters() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.rounds, config.rounds);
        assert_eq!(sim.workload.max_live_nodes, config.max_live_nodes);
        assert_eq!(sim.faults.reorder_rate_percent, config.fault_reorder_percent);
    }

    #[test]
    fn run_single_seed_passes() {
        let config = CampaignConfig {
            seed_range: 0..1,
            rounds: 16,
            ..CampaignConfig::default()
        };
        let result = run_single_seed(0, &config).expect("sim should not error");
        assert!(result.is_ok(), "seed 0 should pass: {result:?}");
    }

    #[test]
    fn run_campaign_100_seeds_pass() {
        let config = CampaignConfig {
            seed_range: 0..100,
            rounds: 16,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign should not error");
        assert_eq!(report.seeds_run, 100);
        assert!(
            report.all_passed(),
            "campaign failed: {} failures, first at seed {:?}: {:?}",
            report.failures.len(),
            report.first_failure,
            report.failures.first(),
        );
        assert!(report.first_failure.is_none());
        assert!(report.events_applied > 0);
    }

    #[test]
    fn heavy_faults_reach_interesting_states() {
        let config = CampaignConfig {
            seed_range: 0..20,
            rounds: 16,
            fault_max_delay: 4,
            fault_duplicate_percent: 20,
            fault_reorder_percent: 50,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign should not error");
        assert!(report.all_passed(), "{:?}", report.failures.first());
        assert!(
            report.interesting_states_reached > 0,
            "expected some seeds to exercise recovery paths"
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let config = CampaignConfig::default();
        let first = replay_seed(7, &config).expect("replay 1");
        let second = replay_seed(7, &config).expect("replay 2");

        assert_eq!(first.result.trace, second.result.trace);
        assert_eq!(first.result.delivered, second.result.delivered);
        assert_eq!(first.result.engine_parents, second.result.engine_parents);
        assert!(first.oracle.passed, "{:?}", first.violation_lines());
    }

    #[test]
    fn campaign_report_serializes_to_json() {
        let report = CampaignReport {
            seeds_run: 10,
            seeds_passed: 9,
            first_failure: Some(7),
            failures: vec![SeedFailure {
                seed: 7,
                violations: vec!["Convergence: projection diverges".into()],
            }],
            interesting_states_reached: 5,
            events_applied: 1_234,
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"seeds_run\":10"));
        assert!(json.contains("\"first_failure\":7"));
    }

    #[test]
    fn format_violation_produces_readable_strings() {
        let v = InvariantViolation::Idempotence {
            event: LifecycleEvent::Removed(NodeHandle::from_raw(0x40)),
        };
        let s = format_violation(&v);
        assert!(s.contains("Idempotence"));
        assert!(s.contains("removed(0x40)"));

        let v = InvariantViolation::Consistency {
            round: 3,
            event: None,
            error: "boom".into(),
        };
        assert!(format_violation(&v).contains("final index check"));
    }
}
