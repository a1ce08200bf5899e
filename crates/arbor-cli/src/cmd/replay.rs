//! `arbor replay`: re-run one seed and show what happened.

use std::io::Write;
use std::process;

use anyhow::Result;
use arbor_core::ApplyStats;
use arbor_sim::TraceEvent;
use arbor_sim::campaign::replay_seed;
use clap::Args;
use serde::Serialize;

use super::sim::FaultArgs;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Seed to replay.
    #[arg(long)]
    pub seed: u64,

    /// Include every trace line in the output.
    #[arg(long)]
    pub trace: bool,

    #[command(flatten)]
    pub faults: FaultArgs,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    trace_events: usize,
    delivered_events: usize,
    live_nodes: usize,
    indexed_nodes: usize,
    converged: bool,
    interesting_state_reached: bool,
    oracle_passed: bool,
    violations: Vec<String>,
    stats: ApplyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<Vec<TraceEvent>>,
}

/// Execute `arbor replay`. Exits with status 1 when the oracle fails.
///
/// # Errors
///
/// Invalid parameters or an internal simulation failure.
pub fn run_replay(args: &ReplayArgs, output: OutputMode) -> Result<()> {
    let config = args.faults.campaign_config(args.seed..args.seed.saturating_add(1));
    let detailed = replay_seed(args.seed, &config)?;
    let result = &detailed.result;

    let out = ReplayOutput {
        seed: args.seed,
        trace_events: result.trace.len(),
        delivered_events: result.delivered.len(),
        live_nodes: result.source_parents.len(),
        indexed_nodes: result.engine_parents.len(),
        converged: result.converged(),
        interesting_state_reached: result.interesting_state_reached,
        oracle_passed: detailed.oracle.passed,
        violations: detailed.violation_lines(),
        stats: result.stats.clone(),
        trace: args.trace.then(|| result.trace.clone()),
    };

    render_mode(
        output,
        &out,
        |out, w| {
            writeln!(
                w,
                "replay seed={} rounds={} max_delay={} duplicate={} reorder={}",
                out.seed,
                args.faults.rounds,
                args.faults.max_delay,
                args.faults.duplicate,
                args.faults.reorder
            )?;
            writeln!(
                w,
                "result converged={} oracle_passed={} trace_events={} delivered={} live={} indexed={} interesting={}",
                out.converged,
                out.oracle_passed,
                out.trace_events,
                out.delivered_events,
                out.live_nodes,
                out.indexed_nodes,
                out.interesting_state_reached
            )?;
            write_stats_line(w, &out.stats)?;
            for violation in &out.violations {
                writeln!(w, "violation={violation}")?;
            }
            for event in out.trace.iter().flatten() {
                writeln!(w, "trace {}", serde_json::to_string(event).unwrap_or_default())?;
            }
            Ok(())
        },
        |out, w| {
            pretty_section(w, &format!("Replay Seed {}", out.seed))?;
            pretty_kv(w, "Rounds", args.faults.rounds.to_string())?;
            pretty_kv(w, "Trace events", out.trace_events.to_string())?;
            pretty_kv(w, "Delivered", out.delivered_events.to_string())?;
            pretty_kv(w, "Nodes", format!("{} live / {} indexed", out.live_nodes, out.indexed_nodes))?;
            pretty_kv(w, "Converged", out.converged.to_string())?;
            pretty_kv(w, "Interesting", out.interesting_state_reached.to_string())?;
            pretty_kv(w, "Oracle", out.oracle_passed.to_string())?;

            writeln!(w)?;
            pretty_section(w, "Engine Counters")?;
            let stats = &out.stats;
            pretty_kv(
                w,
                "Outcomes",
                format!(
                    "{} inserted, {} removed, {} moved, {} ignored",
                    stats.inserted,
                    stats.removed,
                    stats.moved,
                    stats.ignored()
                ),
            )?;
            pretty_kv(
                w,
                "Recovery",
                format!(
                    "{} healed, {} relocated, {} erased, {} salvaged",
                    stats.ancestors_healed,
                    stats.ancestors_relocated,
                    stats.descendants_erased,
                    stats.descendants_salvaged
                ),
            )?;

            if !out.violations.is_empty() {
                writeln!(w)?;
                pretty_section(w, "Invariant Violations")?;
                for violation in &out.violations {
                    writeln!(w, "- {violation}")?;
                }
            }

            if let Some(trace) = &out.trace {
                writeln!(w)?;
                pretty_section(w, "Trace")?;
                for event in trace {
                    writeln!(w, "r{:<4} {:?}", event.round, event.kind)?;
                }
            }
            Ok(())
        },
    )?;

    if !detailed.oracle.passed {
        process::exit(1);
    }
    Ok(())
}

fn write_stats_line(w: &mut dyn Write, stats: &ApplyStats) -> std::io::Result<()> {
    writeln!(
        w,
        "stats events={} inserted={} removed={} moved={} ignored={} healed={} relocated={} erased={} salvaged={}",
        stats.events,
        stats.inserted,
        stats.removed,
        stats.moved,
        stats.ignored(),
        stats.ancestors_healed,
        stats.ancestors_relocated,
        stats.descendants_erased,
        stats.descendants_salvaged
    )
}
