//! Object types

#[cfg(doc)]
use crate::{object::TopologyObject, topology::Topology};
use std::cmp::Ordering;
use strum::{EnumCount, EnumIter, IntoStaticStr};

/// Type of a [`TopologyObject`]
///
/// Object types are ordered from the outermost to the innermost, so that
/// `A < B` means that objects of type `A` contain objects of type `B` in
/// typical topologies:
///
/// - [`ObjectType::Machine`] is always the highest and [`ObjectType::PU`] is
///   always the deepest.
/// - [`ObjectType::Group`] sits right below the machine.
/// - [`ObjectType::NUMANode`] is ordered above [`ObjectType::Package`], which
///   matches machines where each package contains a single memory domain.
///
/// This static order is only a fallback. Some machines carry several NUMA
/// nodes per package, in which case [`Topology::compare_types()`] must be
/// used to compare types according to their actual depth.
#[derive(
    Copy, Clone, Debug, EnumCount, EnumIter, Eq, Hash, IntoStaticStr, PartialEq, strum::Display,
)]
#[doc(alias = "hwloc_obj_type_t")]
pub enum ObjectType {
    /// The root object, a set of processors and memory with cache coherency
    ///
    /// This type is always used for the root object of a topology, and never
    /// used anywhere else. Hence it never has a parent.
    #[doc(alias = "HWLOC_OBJ_MACHINE")]
    Machine,

    /// Group object, such as a board of a multi-board machine
    #[doc(alias = "HWLOC_OBJ_GROUP")]
    Group,

    /// NUMA node, aka locality domain
    ///
    /// A set of processors that share the same directly attached memory.
    #[doc(alias = "HWLOC_OBJ_NUMANODE")]
    #[strum(serialize = "NUMANode")]
    NUMANode,

    /// Physical package, what goes into a physical motherboard socket
    ///
    /// Usually contains multiple cores.
    #[doc(alias = "HWLOC_OBJ_PACKAGE")]
    Package,

    /// Level 3 cache
    ///
    /// Can stand in for the socket level on machines where a package holds
    /// several L3 domains.
    #[doc(alias = "HWLOC_OBJ_L3CACHE")]
    L3Cache,

    /// A computation unit (may be shared by several PUs aka logical processors)
    #[doc(alias = "HWLOC_OBJ_CORE")]
    Core,

    /// Processing Unit, or (Logical) Processor
    ///
    /// An execution unit (may share a core with some other logical
    /// processors, e.g. in the case of an SMT core). This is the leaf of the
    /// CPU hierarchy.
    #[doc(alias = "HWLOC_OBJ_PU")]
    PU,
}
//
impl ObjectType {
    /// Position of this type in the static outermost-to-innermost order
    fn static_rank(self) -> u8 {
        match self {
            Self::Machine => 0,
            Self::Group => 1,
            Self::NUMANode => 2,
            Self::Package => 3,
            Self::L3Cache => 4,
            Self::Core => 5,
            Self::PU => 6,
        }
    }
}
//
impl Ord for ObjectType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.static_rank().cmp(&other.static_rank())
    }
}
//
impl PartialOrd for ObjectType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
