//! Objects within a hardware topology
//!
//! A [`Topology`] is first and foremost a tree of [`TopologyObject`] which
//! represents resource sharing relationships in hardware: a machine holds
//! boards or NUMA nodes, which hold sockets, which hold cores, which hold
//! processing units (PUs, aka hardware threads).
//!
//! Objects are stored level by level inside of their topology, so they refer
//! to their parent and children through indices. Navigation between objects
//! therefore goes through [`Topology`] methods such as
//! [`Topology::parent()`] and [`Topology::ancestors()`].

pub mod types;

use self::types::ObjectType;
use crate::cpu::cpuset::CpuSet;
#[cfg(doc)]
use crate::topology::Topology;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::{
    fmt::{self, Display},
    ops::Range,
};

/// Hardware topology object
///
/// The documentation is sliced into smaller parts:
///
/// - [Basic identity](#basic-identity)
/// - [Depth and relatives](#depth-and-relatives)
/// - [CPU set](#cpu-set)
///
/// You cannot create an owned object of this type, it belongs to the topology.
#[derive(Clone, Debug, Eq, PartialEq)]
#[doc(alias = "hwloc_obj")]
pub struct TopologyObject {
    /// Type of object
    pub(crate) object_type: ObjectType,

    /// Depth of the level this object belongs to
    pub(crate) depth: usize,

    /// Index of this object within its level
    pub(crate) logical_index: usize,

    /// OS-provided physical index number
    pub(crate) os_index: Option<usize>,

    /// Logical index of the parent within the level above, if any
    pub(crate) parent: Option<usize>,

    /// Logical indices of the children within the level below
    pub(crate) children: Range<usize>,

    /// CPUs covered by this object
    pub(crate) cpuset: CpuSet,
}

/// # Basic identity
impl TopologyObject {
    /// Type of object
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// The OS-provided physical index number
    ///
    /// For PUs, this is the CPU number that affinity masks refer to.
    pub fn os_index(&self) -> Option<usize> {
        self.os_index
    }
}

/// # Depth and relatives
impl TopologyObject {
    /// Vertical index in the hierarchy
    ///
    /// The root object has depth 0, and each level below it has a depth that
    /// is one higher than the level above.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Horizontal index in the whole list of similar objects
    ///
    /// Objects are numbered in tree order, so the logical index of a PU is
    /// its position in a depth-first enumeration of the machine.
    pub fn logical_index(&self) -> usize {
        self.logical_index
    }

    /// Number of children of this object
    pub fn arity(&self) -> usize {
        self.children.len()
    }

    /// Truth that this object is the root of its topology
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// # CPU set
impl TopologyObject {
    /// CPUs covered by this object
    ///
    /// The CPU set of an object is always included in that of its parent.
    pub fn cpuset(&self) -> &CpuSet {
        &self.cpuset
    }

    /// Truth that this object is inside of the given CPU set `set`
    pub fn is_inside_cpuset(&self, set: &CpuSet) -> bool {
        set.includes(&self.cpuset)
    }
}

impl Display for TopologyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} L#{}", self.object_type, self.logical_index)?;
        if let Some(os_index) = self.os_index {
            write!(f, " (P#{os_index})")?;
        }
        Ok(())
    }
}
