//! Binding granularity selection
//!
//! Before tasks can be placed, one must decide which kind of topology object
//! each of them is bound to. This depends on how many objects of each kind
//! the node has, how many CPUs the step needs and which binding the user
//! requested.

use super::policy::{CpuBindType, PlacementFlags, StepLayout};
use crate::{object::types::ObjectType, topology::Topology};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::cmp::Ordering;

/// Object counts of a node, as seen by task placement
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct NodeShape {
    /// Number of PUs
    pub num_pus: usize,

    /// Number of cores
    pub num_cores: usize,

    /// Number of objects of type [`NodeShape::socket_type`]
    pub num_sockets: usize,

    /// Number of objects of type [`NodeShape::socket_or_node`]
    pub num_sockets_or_nodes: usize,

    /// Number of NUMA nodes, aka locality domains
    pub num_ldoms: usize,

    /// Object type that distribution engines treat as sockets
    ///
    /// This is [`ObjectType::L3Cache`] if L3 caches are configured to act as
    /// sockets, and [`ObjectType::Package`] otherwise.
    pub socket_type: ObjectType,

    /// Object type used for socket-level binding
    ///
    /// This is [`ObjectType::NUMANode`] if packages hold several NUMA nodes,
    /// and [`NodeShape::socket_type`] otherwise.
    pub socket_or_node: ObjectType,
}
//
impl NodeShape {
    /// Measure the shape of `topology`
    pub fn new(topology: &Topology, flags: PlacementFlags) -> Self {
        let socket_type = if flags.contains(PlacementFlags::L3CACHE_AS_SOCKET) {
            ObjectType::L3Cache
        } else {
            ObjectType::Package
        };
        let numa_inside_packages = matches!(
            (
                topology.depth_for_type(ObjectType::NUMANode),
                topology.depth_for_type(ObjectType::Package)
            ),
            (Some(numa), Some(package)) if numa > package
        );
        let socket_or_node = if numa_inside_packages {
            ObjectType::NUMANode
        } else {
            socket_type
        };
        Self {
            num_pus: topology.num_objects_with_type(ObjectType::PU),
            num_cores: topology.num_objects_with_type(ObjectType::Core),
            num_sockets: topology.num_objects_with_type(socket_type),
            num_sockets_or_nodes: topology.num_objects_with_type(socket_or_node),
            num_ldoms: topology.num_objects_with_type(ObjectType::NUMANode),
            socket_type,
            socket_or_node,
        }
    }

    /// Number of hardware threads per core, rounded up
    pub fn threads_per_core(&self) -> usize {
        if self.num_cores == 0 {
            1
        } else {
            self.num_pus.div_ceil(self.num_cores).max(1)
        }
    }
}

/// Kind of object that each task is bound to, and how many of them exist
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Granularity {
    /// Type of objects that tasks are bound to
    pub object_type: ObjectType,

    /// Number of such objects on the node
    pub num_objects: usize,
}
//
impl Granularity {
    /// Select the binding granularity
    ///
    /// Candidate levels are evaluated from the finest to the coarsest, and
    /// each level whose condition holds overrides the previous choice:
    ///
    /// 1. The whole machine, which disables affinity.
    /// 2. PUs, if there are enough of them for every required CPU on top of
    ///    the `reserved` specialized threads.
    /// 3. PUs if thread binding was requested. Otherwise cores, if there are
    ///    enough of them for every required CPU or core binding was requested.
    /// 4. Sockets, if there is one per task and socket binding was requested.
    /// 5. NUMA nodes, if there is one per task, there are at least as many
    ///    sockets as NUMA nodes, and locality domain binding was requested.
    pub fn select(shape: &NodeShape, layout: &StepLayout, reserved: usize) -> Self {
        let bind = layout.cpu_bind_type;
        let required_pus = layout.required_pus();
        let num_tasks = layout.node_tasks;

        let mut granularity = Self {
            object_type: ObjectType::Machine,
            num_objects: 1,
        };
        if shape.num_pus >= required_pus + reserved {
            granularity = Self::pus(shape);
        }
        if bind.contains(CpuBindType::TO_THREADS) {
            granularity = Self::pus(shape);
        } else if shape.num_cores >= required_pus || bind.contains(CpuBindType::TO_CORES) {
            granularity = Self {
                object_type: ObjectType::Core,
                num_objects: shape.num_cores,
            };
        }
        if shape.num_sockets_or_nodes >= num_tasks && bind.contains(CpuBindType::TO_SOCKETS) {
            granularity = Self {
                object_type: shape.socket_or_node,
                num_objects: shape.num_sockets_or_nodes,
            };
        }
        if shape.num_ldoms >= num_tasks
            && shape.num_sockets_or_nodes >= shape.num_ldoms
            && (bind.contains(CpuBindType::TO_LDOMS) || bind.is_ldom_mode())
        {
            granularity = Self {
                object_type: ObjectType::NUMANode,
                num_objects: shape.num_ldoms,
            };
        }
        granularity
    }

    /// PU granularity
    fn pus(shape: &NodeShape) -> Self {
        Self {
            object_type: ObjectType::PU,
            num_objects: shape.num_pus,
        }
    }

    /// Truth that this granularity is cores or finer in `topology`
    pub fn is_core_or_finer(&self, topology: &Topology) -> bool {
        topology.compare_types(self.object_type, ObjectType::Core) != Ordering::Less
    }
}

/// Object type that the user asked tasks to be bound to
///
/// Bound task CPU sets are widened to the enclosing object of this type when
/// the granularity is finer.
pub fn requested_type(bind: CpuBindType, shape: &NodeShape) -> ObjectType {
    if bind.contains(CpuBindType::TO_THREADS) {
        ObjectType::PU
    } else if bind.contains(CpuBindType::TO_CORES) {
        ObjectType::Core
    } else if bind.contains(CpuBindType::TO_SOCKETS) {
        shape.socket_or_node
    } else if bind.contains(CpuBindType::TO_LDOMS) || bind.is_ldom_mode() {
        ObjectType::NUMANode
    } else if bind.contains(CpuBindType::TO_BOARDS) {
        ObjectType::Group
    } else {
        ObjectType::Core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn shape(description: &str) -> (Topology, NodeShape) {
        let topology = Topology::from_synthetic(description).unwrap();
        let shape = NodeShape::new(&topology, PlacementFlags::empty());
        (topology, shape)
    }

    #[test]
    fn node_shapes() {
        let (_, plain) = shape("numa:2 pack:1 l3:2 core:4 pu:2");
        assert_eq!(plain.num_pus, 32);
        assert_eq!(plain.num_cores, 16);
        assert_eq!(plain.num_sockets, 2);
        assert_eq!(plain.num_ldoms, 2);
        assert_eq!(plain.socket_or_node, ObjectType::Package);
        assert_eq!(plain.threads_per_core(), 2);

        let topology = Topology::from_synthetic("numa:2 pack:1 l3:2 core:4 pu:2").unwrap();
        let l3 = NodeShape::new(&topology, PlacementFlags::L3CACHE_AS_SOCKET);
        assert_eq!(l3.socket_type, ObjectType::L3Cache);
        assert_eq!(l3.num_sockets, 4);

        let (_, split) = shape("pack:2 numa:2 core:2 pu:1");
        assert_eq!(split.socket_type, ObjectType::Package);
        assert_eq!(split.socket_or_node, ObjectType::NUMANode);
        assert_eq!(split.num_sockets, 2);
        assert_eq!(split.num_sockets_or_nodes, 4);
    }

    #[test]
    fn downgrade_to_machine() {
        // 8 PUs and 8 cores cannot host 16 CPUs
        let (_, shape) = shape("pack:2 core:4 pu:1");
        let layout = StepLayout::new(16, 1);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::Machine);
        assert_eq!(granularity.num_objects, 1);
    }

    #[test]
    fn pus_then_cores() {
        let (topology, shape) = shape("pack:2 core:4 pu:2");

        // 12 CPUs fit in PUs but not in cores
        let granularity = Granularity::select(&shape, &StepLayout::new(6, 2), 0);
        assert_eq!(granularity.object_type, ObjectType::PU);
        assert_eq!(granularity.num_objects, 16);
        assert!(granularity.is_core_or_finer(&topology));

        // 8 CPUs fit in cores, which override PUs
        let granularity = Granularity::select(&shape, &StepLayout::new(4, 2), 0);
        assert_eq!(granularity.object_type, ObjectType::Core);

        // Reserved threads count against PUs
        let granularity = Granularity::select(&shape, &StepLayout::new(14, 1), 3);
        assert_eq!(granularity.object_type, ObjectType::Machine);

        // Thread binding forces PUs
        let layout = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::TO_THREADS, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::PU);

        // Core binding forces cores, even when there are not enough
        let layout = StepLayout::new(6, 2).with_cpu_bind(CpuBindType::TO_CORES, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::Core);
        assert_eq!(granularity.num_objects, 8);
    }

    #[test]
    fn sockets_override_cores() {
        let (topology, shape) = shape("pack:2 core:4 pu:2");
        let layout = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::TO_SOCKETS, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::Package);
        assert_eq!(granularity.num_objects, 2);
        assert!(!granularity.is_core_or_finer(&topology));

        // Not one socket per task
        let layout = StepLayout::new(3, 1).with_cpu_bind(CpuBindType::TO_SOCKETS, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::Core);
    }

    #[test]
    fn ldom_guard() {
        let (_, shape) = shape("numa:2 pack:1 core:4 pu:1");
        let layout = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::LDRANK, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::NUMANode);

        // More NUMA nodes than sockets
        let (_, shape) = self::shape("numa:4 core:2 pu:1");
        let layout = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::TO_LDOMS, None);
        let granularity = Granularity::select(&shape, &layout, 0);
        assert_eq!(granularity.object_type, ObjectType::Core);
    }

    #[test]
    fn requested_types() {
        let (_, plain) = shape("numa:2 pack:1 core:4 pu:1");
        let (_, split) = shape("pack:2 numa:2 core:2 pu:1");
        assert_eq!(requested_type(CpuBindType::empty(), &plain), ObjectType::Core);
        assert_eq!(
            requested_type(CpuBindType::TO_THREADS | CpuBindType::TO_SOCKETS, &plain),
            ObjectType::PU
        );
        assert_eq!(requested_type(CpuBindType::TO_SOCKETS, &plain), ObjectType::Package);
        assert_eq!(requested_type(CpuBindType::TO_SOCKETS, &split), ObjectType::NUMANode);
        assert_eq!(requested_type(CpuBindType::TO_LDOMS, &plain), ObjectType::NUMANode);
        assert_eq!(requested_type(CpuBindType::LDMASK, &plain), ObjectType::NUMANode);
        assert_eq!(requested_type(CpuBindType::TO_BOARDS, &plain), ObjectType::Group);
        assert_eq!(requested_type(CpuBindType::MASK, &plain), ObjectType::Core);
    }
}
