//! Common strategies for property-based testing
//!
//! Every proptest [`Strategy`] which cannot be handled by an [`Arbitrary`] impl
//! or a function that is only used by a single module is centralized here.

use crate::{
    cpu::cpuset::CpuSet,
    object::types::ObjectType,
    placement::policy::{
        CoreSpecialization, CpuBindType, NodeDistribution, PlacementFlags, StepLayout,
        SubDistribution, TaskDistribution,
    },
    topology::{builder::TopologyBuilder, Topology},
};
use proptest::prelude::*;
use std::ops::RangeInclusive;

/// Optional synthetic levels, from the outermost to the innermost
const OPTIONAL_LEVELS: [&str; 5] = ["group", "numa", "pack", "l3", "core"];

/// Generate a valid synthetic topology description
///
/// Every optional level is present or not, with 1 to 3 children per parent,
/// and cores have 1 or 2 hardware threads.
pub(crate) fn synthetic_description() -> impl Strategy<Value = String> {
    let level = || prop::option::of(1..=3usize);
    let levels = (level(), level(), level(), level(), level());
    (levels, 1..=2usize).prop_map(|((group, numa, pack, l3, core), pus)| {
        let mut description = OPTIONAL_LEVELS
            .iter()
            .zip([group, numa, pack, l3, core])
            .filter_map(|(name, count)| count.map(|count| format!("{name}:{count} ")))
            .collect::<String>();
        description.push_str(&format!("pu:{pus}"));
        description
    })
}

/// Generate a topology where a non-empty subset of the CPUs is allowed
pub(crate) fn topology() -> impl Strategy<Value = Topology> {
    synthetic_description().prop_flat_map(|description| {
        let builder = TopologyBuilder::from_synthetic(&description)
            .expect("generated descriptions are valid");
        let num_pus = builder
            .clone()
            .build()
            .expect("unrestricted topologies always build")
            .num_objects_with_type(ObjectType::PU);
        prop_oneof![
            1 => Just(None),
            3 => prop::sample::subsequence((0..num_pus).collect::<Vec<_>>(), 1..=num_pus)
                .prop_map(Some),
        ]
        .prop_map(move |allowed| {
            let builder = match allowed {
                Some(allowed) => builder.clone().with_allowed_cpuset(CpuSet::from_iter(allowed)),
                None => builder.clone(),
            };
            builder.build().expect("allowed CPUs are within the topology")
        })
    })
}

/// Generate a task distribution
pub(crate) fn distribution() -> impl Strategy<Value = TaskDistribution> {
    let node = prop::sample::select(vec![
        NodeDistribution::Block,
        NodeDistribution::Cyclic,
        NodeDistribution::Plane,
        NodeDistribution::Arbitrary,
        NodeDistribution::Unknown,
    ]);
    let sub = || {
        prop::option::of(prop::sample::select(vec![
            SubDistribution::Block,
            SubDistribution::Cyclic,
            SubDistribution::FullCyclic,
        ]))
    };
    (node, sub(), sub()).prop_map(|(node, socket, core)| TaskDistribution { node, socket, core })
}

/// Generate a binding request that does not need a bind list
pub(crate) fn cpu_bind_type() -> impl Strategy<Value = CpuBindType> {
    let target = prop::sample::select(vec![
        CpuBindType::empty(),
        CpuBindType::TO_THREADS,
        CpuBindType::TO_CORES,
        CpuBindType::TO_SOCKETS,
        CpuBindType::TO_LDOMS,
        CpuBindType::TO_BOARDS,
    ]);
    let kind = prop::sample::select(vec![
        CpuBindType::empty(),
        CpuBindType::NONE,
        CpuBindType::RANK,
        CpuBindType::LDRANK,
    ]);
    (target, kind, prop::bool::weighted(0.1)).prop_map(|(target, kind, verbose)| {
        let mut bind = target | kind;
        bind.set(CpuBindType::VERBOSE, verbose);
        bind
    })
}

/// Generate a step layout with `node_tasks` tasks, and node-wide flags
pub(crate) fn layout_with_tasks(
    node_tasks: RangeInclusive<usize>,
) -> impl Strategy<Value = (StepLayout, PlacementFlags)> {
    let core_spec = prop_oneof![
        3 => Just(CoreSpecialization::None),
        1 => (0..=2usize).prop_map(CoreSpecialization::Threads),
    ];
    let flags = any::<u32>().prop_map(PlacementFlags::from_bits_truncate);
    (
        node_tasks,
        1..=2usize,
        core_spec,
        distribution(),
        cpu_bind_type(),
        flags,
    )
        .prop_map(
            |(node_tasks, cpus_per_task, core_spec, distribution, bind, flags)| {
                let layout = StepLayout::new(node_tasks, cpus_per_task)
                    .with_core_spec(core_spec)
                    .with_distribution(distribution)
                    .with_cpu_bind(bind, None);
                (layout, flags)
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn descriptions_round_trip(description in synthetic_description()) {
            let topology = Topology::from_synthetic(&description).unwrap();
            prop_assert_eq!(topology.export_synthetic(), description);
        }

        #[test]
        fn allowed_cpus_are_in_the_topology(topology in topology()) {
            prop_assert!(!topology.allowed_cpuset().is_empty());
            prop_assert!(topology.cpuset().includes(topology.allowed_cpuset()));
        }
    }
}
