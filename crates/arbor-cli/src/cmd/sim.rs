//! `arbor sim`: deterministic simulation campaign across a seed range.

use std::io::Write;
use std::ops::Range;
use std::process;

use anyhow::Result;
use arbor_sim::campaign::{CampaignConfig, run_campaign};
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Knobs shared by `arbor sim` and `arbor replay`.
#[derive(Args, Debug, Clone)]
pub struct FaultArgs {
    /// Simulation rounds per seed.
    #[arg(long, default_value = "24")]
    pub rounds: u64,

    /// Producer mutations per round.
    #[arg(long, default_value = "4")]
    pub ops_per_round: usize,

    /// Upper bound on live nodes in the simulated registry.
    #[arg(long, default_value = "48")]
    pub max_nodes: usize,

    /// Maximum delivery delay in rounds.
    #[arg(long, default_value = "3")]
    pub max_delay: u8,

    /// Percent of events delivered twice.
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub duplicate: u8,

    /// Percent of ready batches delivered in shuffled order.
    #[arg(long, default_value = "20", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub reorder: u8,
}

impl FaultArgs {
    pub fn campaign_config(&self, seed_range: Range<u64>) -> CampaignConfig {
        CampaignConfig {
            seed_range,
            rounds: self.rounds,
            ops_per_round: self.ops_per_round,
            max_live_nodes: self.max_nodes,
            fault_max_delay: self.max_delay,
            fault_duplicate_percent: self.duplicate,
            fault_reorder_percent: self.reorder,
        }
    }

    /// Flags that reproduce these settings on the command line.
    pub fn replay_flags(&self) -> String {
        format!(
            "--rounds {} --ops-per-round {} --max-nodes {} --max-delay {} --duplicate {} --reorder {}",
            self.rounds, self.ops_per_round, self.max_nodes, self.max_delay, self.duplicate, self.reorder
        )
    }
}

#[derive(Args, Debug)]
pub struct SimArgs {
    /// Seeds to run: `A..B`, or `N` for `0..N`.
    #[arg(long, default_value = "0..100", value_parser = parse_seed_range)]
    pub seeds: Range<u64>,

    #[command(flatten)]
    pub faults: FaultArgs,
}

fn parse_seed_range(raw: &str) -> Result<Range<u64>, String> {
    let range = match raw.split_once("..") {
        Some((start, end)) => {
            let start = start.trim().parse::<u64>().map_err(|e| format!("bad start: {e}"))?;
            let end = end.trim().parse::<u64>().map_err(|e| format!("bad end: {e}"))?;
            start..end
        }
        None => 0..raw.trim().parse::<u64>().map_err(|e| format!("bad count: {e}"))?,
    };
    if range.is_empty() {
        return Err(format!("seed range {raw} is empty"));
    }
    Ok(range)
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seed_start: u64,
    seed_end: u64,
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    events_applied: u64,
    all_passed: bool,
    failures: Vec<arbor_sim::campaign::SeedFailure>,
}

/// Failure samples shown in human output.
const FAILURE_SAMPLE: usize = 5;

/// Execute `arbor sim`. Exits with status 1 if any seed fails.
///
/// # Errors
///
/// Invalid campaign parameters or an internal simulation failure.
pub fn run_sim(args: &SimArgs, output: OutputMode) -> Result<()> {
    let config = args.faults.campaign_config(args.seeds.clone());
    let report = run_campaign(&config)?;

    let out = RunOutput {
        seed_start: args.seeds.start,
        seed_end: args.seeds.end,
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        events_applied: report.events_applied,
        all_passed: report.all_passed(),
        failures: report.failures.clone(),
    };
    let replay_hint = format!(
        "arbor replay --seed {} {}",
        out.first_failure.unwrap_or(0),
        args.faults.replay_flags()
    );

    render_mode(
        output,
        &out,
        |out, w| {
            writeln!(
                w,
                "campaign seeds={}..{} rounds={} max_delay={} duplicate={} reorder={}",
                out.seed_start,
                out.seed_end,
                args.faults.rounds,
                args.faults.max_delay,
                args.faults.duplicate,
                args.faults.reorder
            )?;
            writeln!(
                w,
                "results passed={} failed={} interesting_states={} events={} all_passed={}",
                out.seeds_passed,
                out.seeds_failed,
                out.interesting_states_reached,
                out.events_applied,
                out.all_passed
            )?;
            for failure in out.failures.iter().take(FAILURE_SAMPLE) {
                writeln!(w, "failure seed={} violations={}", failure.seed, failure.violations.len())?;
            }
            if !out.all_passed {
                writeln!(w, "hint {replay_hint}")?;
            }
            Ok(())
        },
        |out, w| {
            pretty_section(w, "Simulation Campaign")?;
            pretty_kv(w, "Seeds", format!("{}..{}", out.seed_start, out.seed_end))?;
            pretty_kv(w, "Rounds", args.faults.rounds.to_string())?;
            pretty_kv(
                w,
                "Faults",
                format!(
                    "delay<={} dup={}% reorder={}%",
                    args.faults.max_delay, args.faults.duplicate, args.faults.reorder
                ),
            )?;
            pretty_kv(
                w,
                "Results",
                format!(
                    "{} passed / {} failed ({} interesting)",
                    out.seeds_passed, out.seeds_failed, out.interesting_states_reached
                ),
            )?;
            pretty_kv(w, "Events", out.events_applied.to_string())?;
            if out.all_passed {
                return pretty_kv(w, "Status", "all seeds passed");
            }

            writeln!(w)?;
            pretty_section(w, "Failure Samples")?;
            for failure in out.failures.iter().take(FAILURE_SAMPLE) {
                writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
                for violation in &failure.violations {
                    writeln!(w, "  - {violation}")?;
                }
            }
            if out.failures.len() > FAILURE_SAMPLE {
                writeln!(w, "... and {} more failures", out.failures.len() - FAILURE_SAMPLE)?;
            }
            writeln!(w)?;
            pretty_kv(w, "Replay", &replay_hint)
        },
    )?;

    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}
