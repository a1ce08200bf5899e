#![forbid(unsafe_code)]

use anyhow::Result;
use arbor_sim::{DeterministicRng, SimulationConfig, Simulator, TreeOracle};

fn main() -> Result<()> {
    let mut simulator = Simulator::new(SimulationConfig::default())?;
    let result = simulator.run()?;
    let oracle = TreeOracle::check_all(&result, &mut DeterministicRng::new(result.config.seed));

    println!(
        "simulation complete: trace_events={} delivered={} converged={} interesting={} oracle_passed={}",
        result.trace.len(),
        result.delivered.len(),
        result.converged(),
        result.interesting_state_reached,
        oracle.passed,
    );

    Ok(())
}
