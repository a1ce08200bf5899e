//! `arbor demo`: a live projection with concurrent producer, pump and readers.
//!
//! The producer mutates an [`ObjectRegistry`] on its own thread while the
//! pump feeds the published events to a [`TreeProjection`] and reader
//! threads walk and render it. Once the producer is done the pump drains and
//! stops, then `--undelivered` nodes are destroyed with nobody listening so
//! the final tree shows what a view sees for objects it has not heard about.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use arbor_core::config::ProjectionConfig;
use arbor_core::{
    ApplyStats, ErrorCode, EventPump, NodeFormatter, NodeHandle, ObjectLock, ObjectRegistry, PumpReport,
    TreeProjection,
};
use arbor_sim::{DeterministicRng, Mutation, Workload, WorkloadConfig};
use clap::Args;
use serde::Serialize;
use tracing::{debug, info};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Upper bound on live nodes.
    #[arg(long, default_value = "24")]
    pub nodes: usize,

    /// Producer mutations to perform.
    #[arg(long, default_value = "200")]
    pub steps: usize,

    /// Seed for the producer's choices.
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Concurrent reader threads.
    #[arg(long, default_value = "4")]
    pub readers: usize,

    /// Nodes destroyed after the pump has stopped.
    #[arg(long, default_value = "1")]
    pub undelivered: usize,
}

/// Address in column 0, live child count in column 1.
struct RegistryFormatter {
    registry: Arc<ObjectRegistry>,
}

impl NodeFormatter for RegistryFormatter {
    fn column_count(&self) -> usize {
        2
    }

    fn format(&self, node: NodeHandle, column: usize) -> Option<String> {
        match column {
            0 => Some(node.to_string()),
            1 => match self.registry.children_of(Some(node)).len() {
                0 => None,
                1 => Some("1 child".to_string()),
                n => Some(format!("{n} children")),
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
struct ReaderReport {
    passes: u64,
    cells: u64,
    dangling: u64,
    /// Rows that vanished between the walk and the read.
    stale: u64,
}

#[derive(Debug, Serialize)]
struct DemoRow {
    depth: usize,
    node: NodeHandle,
    address: String,
    detail: String,
    dangling: bool,
}

#[derive(Debug, Serialize)]
struct DemoOutput {
    seed: u64,
    mutations: usize,
    live_nodes: usize,
    indexed_nodes: usize,
    undelivered: Vec<NodeHandle>,
    pump: PumpReport,
    readers: Vec<ReaderReport>,
    stats: ApplyStats,
    rows: Vec<DemoRow>,
}

fn spawn_reader(
    id: usize,
    engine: Arc<TreeProjection<ObjectRegistry>>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<ReaderReport>> {
    thread::Builder::new()
        .name(format!("arbor-reader-{id}"))
        .spawn(move || {
            let mut report = ReaderReport::default();
            while !stop.load(Ordering::Acquire) {
                for (_, position) in engine.snapshot().walk() {
                    for column in 0..engine.column_count() {
                        match engine.data(&position, column) {
                            Some(cell) if cell.is_dangling() => report.dangling += 1,
                            Some(_) => {}
                            None => report.stale += 1,
                        }
                        report.cells += 1;
                    }
                }
                report.passes += 1;
                thread::yield_now();
            }
            debug!(reader = id, ?report, "reader stopped");
            report
        })
}

fn spawn_producer(
    registry: Arc<ObjectRegistry>,
    config: WorkloadConfig,
    steps: usize,
    seed: u64,
) -> std::io::Result<JoinHandle<Result<Vec<Mutation>>>> {
    thread::Builder::new()
        .name("arbor-producer".to_string())
        .spawn(move || {
            let workload = Workload::new(config);
            let mut rng = DeterministicRng::new(seed);
            let mut mutations = Vec::with_capacity(steps);
            for _ in 0..steps {
                mutations.push(workload.step(&registry, &mut rng)?);
                thread::yield_now();
            }
            Ok(mutations)
        })
}

fn join<T>(handle: JoinHandle<T>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{}: {what} thread panicked", ErrorCode::InternalUnexpected))
}

/// Execute `arbor demo`.
///
/// # Errors
///
/// Thread spawn failures, a panicked worker, or an unexpected registry error.
pub fn run_demo(args: &DemoArgs, projection: &ProjectionConfig, output: OutputMode) -> Result<()> {
    let lock = ObjectLock::new();
    let registry = Arc::new(ObjectRegistry::new(lock.clone()));
    let events = registry.subscribe();
    let formatter = RegistryFormatter {
        registry: Arc::clone(&registry),
    };
    let engine = Arc::new(
        TreeProjection::with_config(Arc::clone(&registry), lock, projection.clone())
            .with_formatter(Arc::new(formatter)),
    );

    let pump = EventPump::new(Arc::clone(&engine), events).spawn()?;
    let stop = Arc::new(AtomicBool::new(false));
    let readers = (0..args.readers)
        .map(|id| spawn_reader(id, Arc::clone(&engine), Arc::clone(&stop)))
        .collect::<std::io::Result<Vec<_>>>()?;

    let workload = WorkloadConfig {
        ops_per_round: 1,
        max_live_nodes: args.nodes.max(1),
        ..WorkloadConfig::default()
    };
    let producer = spawn_producer(Arc::clone(&registry), workload, args.steps, args.seed)?;
    let mutations = join(producer, "producer")??;

    registry.close_subscribers();
    let pump = join(pump, "pump")?;
    info!(applied = pump.applied, structural = pump.structural, "pump drained");

    let mut undelivered = Vec::new();
    let mut rng = DeterministicRng::new(args.seed);
    for _ in 0..args.undelivered {
        let live = registry.live_nodes();
        let Some(&victim) = rng.choose(&live) else {
            break;
        };
        undelivered.extend(registry.destroy(victim)?);
    }

    stop.store(true, Ordering::Release);
    let readers = readers
        .into_iter()
        .map(|handle| join(handle, "reader"))
        .collect::<Result<Vec<_>>>()?;

    let rows = engine
        .snapshot()
        .walk()
        .into_iter()
        .filter_map(|(depth, position)| {
            let address = engine.data(&position, 0)?;
            let detail = engine.data(&position, 1)?;
            Some(DemoRow {
                depth,
                node: position.node(),
                dangling: address.is_dangling(),
                address: address.text().to_string(),
                detail: detail.text().to_string(),
            })
        })
        .collect();

    let out = DemoOutput {
        seed: args.seed,
        mutations: mutations.len(),
        live_nodes: registry.live_count(),
        indexed_nodes: engine.len(),
        undelivered,
        pump,
        readers,
        stats: engine.stats(),
        rows,
    };

    render_mode(output, &out, write_text, write_pretty)
}

fn write_text(out: &DemoOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "demo seed={} mutations={} live={} indexed={} applied={} structural={}",
        out.seed, out.mutations, out.live_nodes, out.indexed_nodes, out.pump.applied, out.pump.structural
    )?;
    for (id, reader) in out.readers.iter().enumerate() {
        writeln!(
            w,
            "reader id={id} passes={} cells={} dangling={} stale={}",
            reader.passes, reader.cells, reader.dangling, reader.stale
        )?;
    }
    for row in &out.rows {
        writeln!(
            w,
            "row depth={} node={} detail={:?} dangling={}",
            row.depth, row.node, row.detail, row.dangling
        )?;
    }
    Ok(())
}

fn write_pretty(out: &DemoOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Projection Demo")?;
    pretty_kv(w, "Seed", out.seed.to_string())?;
    pretty_kv(w, "Mutations", out.mutations.to_string())?;
    pretty_kv(w, "Nodes", format!("{} live / {} indexed", out.live_nodes, out.indexed_nodes))?;
    pretty_kv(
        w,
        "Pump",
        format!("{} applied, {} structural", out.pump.applied, out.pump.structural),
    )?;
    pretty_kv(
        w,
        "Recovery",
        format!(
            "{} healed, {} relocated, {} salvaged",
            out.stats.ancestors_healed, out.stats.ancestors_relocated, out.stats.descendants_salvaged
        ),
    )?;
    let reads: u64 = out.readers.iter().map(|r| r.cells).sum();
    let dangling: u64 = out.readers.iter().map(|r| r.dangling).sum();
    pretty_kv(
        w,
        "Readers",
        format!("{} threads, {reads} cells read, {dangling} dangling", out.readers.len()),
    )?;

    writeln!(w)?;
    pretty_section(w, "Tree")?;
    if out.rows.is_empty() {
        return writeln!(w, "(empty)");
    }
    for row in &out.rows {
        let indent = "  ".repeat(row.depth);
        let marker = if row.dangling { "  [not live]" } else { "" };
        writeln!(w, "{indent}{:<18} {}{marker}", row.address, row.detail)?;
    }
    Ok(())
}
