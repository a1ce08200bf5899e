use arbor_sim::{
    DeliveryFaults, DeterministicRng, SimulationConfig, Simulator, TreeOracle, WorkloadConfig,
};
use proptest::prelude::*;

fn arb_faults() -> impl Strategy<Value = DeliveryFaults> {
    (0u8..=6, 0u8..=40, 0u8..=100).prop_map(|(delay, duplicate, reorder)| DeliveryFaults {
        max_delay_rounds: delay,
        duplicate_rate_percent: duplicate,
        reorder_rate_percent: reorder,
    })
}

fn arb_workload() -> impl Strategy<Value = WorkloadConfig> {
    (1usize..=6, 1u32..=6, 0u32..=4, 0u32..=6, 0u8..=100, 4usize..=40).prop_map(
        |(ops, create, destroy, reparent, root, max)| WorkloadConfig {
            ops_per_round: ops,
            create_weight: create,
            destroy_weight: destroy,
            reparent_weight: reparent,
            root_percent: root,
            max_live_nodes: max,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever the fault mix, once every event is delivered the projection
    /// equals the source graph and every oracle check holds.
    #[test]
    fn any_fault_mix_converges(
        seed in any::<u64>(),
        rounds in 1u64..=20,
        workload in arb_workload(),
        faults in arb_faults(),
    ) {
        let config = SimulationConfig { seed, rounds, workload, faults };
        let result = Simulator::new(config).expect("valid config").run().expect("run");

        prop_assert!(result.converged());
        let oracle = TreeOracle::check_all(&result, &mut DeterministicRng::new(seed ^ 0x5eed));
        prop_assert!(oracle.passed, "{:?}", oracle.violations);
    }

    /// Delivering the whole stream a second time leaves every node under
    /// the same parent.
    #[test]
    fn second_delivery_keeps_parents(seed in any::<u64>(), workload in arb_workload()) {
        let config = SimulationConfig {
            seed,
            rounds: 12,
            workload,
            faults: DeliveryFaults::none(),
        };
        let result = Simulator::new(config).expect("valid config").run().expect("run");
        prop_assert!(result.converged());

        for &event in &result.delivered {
            result.engine.apply(event);
        }
        prop_assert_eq!(result.engine.snapshot().parent_map(), result.source_parents.clone());
        prop_assert!(result.engine.verify().is_ok());
    }
}
