//! Hardware topology

pub mod builder;

use self::builder::{BuildError, TopologyBuilder};
use crate::{
    cpu::cpuset::CpuSet,
    object::{types::ObjectType, TopologyObject},
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::{cmp::Ordering, fmt::Write, iter::FusedIterator};

/// Read-only model of a compute node's hardware topology
///
/// A `Topology` is a tree of [`TopologyObject`]s, stored level by level. Every
/// level holds objects of a single [`ObjectType`], and the first level holds
/// the single [`ObjectType::Machine`] root object.
///
/// The API is broken down into sections:
///
/// - [Topology building](#topology-building)
/// - [Object levels, depths and types](#object-levels-depths-and-types)
/// - [Navigating the object tree](#navigating-the-object-tree)
/// - [CPU sets of entire topologies](#cpu-sets-of-entire-topologies)
/// - [Exporting topologies to synthetic](#exporting-topologies-to-synthetic)
///
/// Topologies are immutable once built, so they can be shared between
/// threads that place tasks concurrently.
#[derive(Clone, Debug, Eq, PartialEq)]
#[doc(alias = "hwloc_topology_t")]
pub struct Topology {
    /// Objects of each level, ordered by logical index
    levels: Vec<Vec<TopologyObject>>,

    /// CPUs that the job step is allowed to use
    allowed_cpuset: CpuSet,
}

/// # Topology building
impl Topology {
    /// Build a topology from a synthetic description
    ///
    /// This is a shortcut for [`TopologyBuilder::from_synthetic()`] followed by
    /// [`TopologyBuilder::build()`], see those for more information.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::{object::types::ObjectType, topology::Topology};
    ///
    /// let topology = Topology::from_synthetic("pack:2 core:4 pu:2")?;
    /// assert_eq!(topology.num_objects_with_type(ObjectType::PU), 16);
    /// # Ok::<(), taskbind::topology::builder::BuildError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// - [`BuildError::Synthetic`] if the description is invalid
    pub fn from_synthetic(description: &str) -> Result<Self, BuildError> {
        TopologyBuilder::from_synthetic(description)?.build()
    }

    /// Assemble a topology from its levels
    ///
    /// The caller is responsible for providing a well-formed tree.
    pub(crate) fn from_levels(levels: Vec<Vec<TopologyObject>>, allowed_cpuset: CpuSet) -> Self {
        debug_assert_eq!(levels.first().map(Vec::len), Some(1));
        Self {
            levels,
            allowed_cpuset,
        }
    }
}

/// # Object levels, depths and types
impl Topology {
    /// Number of levels in the topology, which is also the depth of PUs plus one
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::topology::Topology;
    ///
    /// let topology = Topology::from_synthetic("pack:2 core:4 pu:2")?;
    /// assert_eq!(topology.depth(), 4);
    /// # Ok::<(), taskbind::topology::builder::BuildError>(())
    /// ```
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Depth of objects of type `object_type`, if any
    ///
    /// Every type appears at most once in a topology.
    #[doc(alias = "hwloc_get_type_depth")]
    pub fn depth_for_type(&self, object_type: ObjectType) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level[0].object_type == object_type)
    }

    /// Type of objects at depth `depth`, if that depth exists
    #[doc(alias = "hwloc_get_depth_type")]
    pub fn type_at_depth(&self, depth: usize) -> Option<ObjectType> {
        self.levels.get(depth).map(|level| level[0].object_type)
    }

    /// Number of objects at depth `depth`
    ///
    /// Depths that do not exist have no objects.
    #[doc(alias = "hwloc_get_nbobjs_by_depth")]
    pub fn size_at_depth(&self, depth: usize) -> usize {
        self.levels.get(depth).map_or(0, Vec::len)
    }

    /// Objects at depth `depth`, ordered by logical index
    #[doc(alias = "hwloc_get_obj_by_depth")]
    pub fn objects_at_depth(
        &self,
        depth: usize,
    ) -> impl DoubleEndedIterator<Item = &TopologyObject> + Clone + ExactSizeIterator + FusedIterator
    {
        self.levels.get(depth).map_or(&[][..], Vec::as_slice).iter()
    }

    /// Objects of type `object_type`, ordered by logical index
    #[doc(alias = "hwloc_get_obj_by_type")]
    pub fn objects_with_type(
        &self,
        object_type: ObjectType,
    ) -> impl DoubleEndedIterator<Item = &TopologyObject> + Clone + ExactSizeIterator + FusedIterator
    {
        let depth = self.depth_for_type(object_type).unwrap_or(usize::MAX);
        self.objects_at_depth(depth)
    }

    /// Number of objects of type `object_type`
    #[doc(alias = "hwloc_get_nbobjs_by_type")]
    pub fn num_objects_with_type(&self, object_type: ObjectType) -> usize {
        self.objects_with_type(object_type).len()
    }

    /// Object of type `object_type` with logical index `idx`
    pub fn object_by_type(&self, object_type: ObjectType, idx: usize) -> Option<&TopologyObject> {
        self.objects_with_type(object_type).nth(idx)
    }

    /// Object at depth `depth` with logical index `idx`
    pub fn object_at_depth(&self, depth: usize, idx: usize) -> Option<&TopologyObject> {
        self.levels.get(depth)?.get(idx)
    }

    /// Compare the depth of two object types in this topology
    ///
    /// `Ordering::Less` means that objects of type `lhs` are found above
    /// objects of type `rhs`. When either type is absent from the topology,
    /// the static [`ObjectType`] order is used instead.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::cmp::Ordering;
    /// use taskbind::{object::types::ObjectType, topology::Topology};
    ///
    /// // Two NUMA nodes per package
    /// let topology = Topology::from_synthetic("pack:2 numa:2 core:2 pu:1")?;
    /// assert_eq!(
    ///     topology.compare_types(ObjectType::NUMANode, ObjectType::Package),
    ///     Ordering::Greater
    /// );
    /// # Ok::<(), taskbind::topology::builder::BuildError>(())
    /// ```
    #[doc(alias = "hwloc_compare_types")]
    pub fn compare_types(&self, lhs: ObjectType, rhs: ObjectType) -> Ordering {
        match (self.depth_for_type(lhs), self.depth_for_type(rhs)) {
            (Some(lhs_depth), Some(rhs_depth)) => lhs_depth.cmp(&rhs_depth),
            _ => lhs.cmp(&rhs),
        }
    }
}

/// # Navigating the object tree
impl Topology {
    /// Root object of the topology, of type [`ObjectType::Machine`]
    #[doc(alias = "hwloc_get_root_obj")]
    pub fn root_object(&self) -> &TopologyObject {
        &self.levels[0][0]
    }

    /// Parent of `object`, if it isn't the root
    pub fn parent(&self, object: &TopologyObject) -> Option<&TopologyObject> {
        let parent = object.parent?;
        self.object_at_depth(object.depth.checked_sub(1)?, parent)
    }

    /// Children of `object`, ordered by logical index
    pub fn children(
        &self,
        object: &TopologyObject,
    ) -> impl DoubleEndedIterator<Item = &TopologyObject> + Clone + ExactSizeIterator + FusedIterator
    {
        self.levels
            .get(object.depth + 1)
            .and_then(|level| level.get(object.children.clone()))
            .unwrap_or(&[])
            .iter()
    }

    /// Chain of parents of `object`, up to the root object
    pub fn ancestors<'topology>(
        &'topology self,
        object: &'topology TopologyObject,
    ) -> Ancestors<'topology> {
        Ancestors {
            topology: self,
            current: object,
        }
    }

    /// Ancestor of `object` at depth `depth`, if `object` is deeper
    pub fn ancestor_at_depth<'topology>(
        &'topology self,
        object: &'topology TopologyObject,
        depth: usize,
    ) -> Option<&'topology TopologyObject> {
        if depth > object.depth {
            return None;
        }
        std::iter::once(object)
            .chain(self.ancestors(object))
            .find(|ancestor| ancestor.depth == depth)
    }

    /// Truth that `object` is `subtree_root` or one of its descendants
    pub fn is_in_subtree(&self, object: &TopologyObject, subtree_root: &TopologyObject) -> bool {
        self.ancestor_at_depth(object, subtree_root.depth)
            .map_or(false, |ancestor| {
                ancestor.logical_index == subtree_root.logical_index
            })
    }

    /// The `idx`-th object of type `object_type` covered by `parent`
    ///
    /// Candidates are the objects of type `object_type` whose CPU set is
    /// included in the CPU set of `parent`, counted in logical order. This
    /// includes `parent` itself if it has the right type, and objects that sit
    /// above `parent` in the tree but span the same CPUs, like a NUMA node
    /// that holds a single package.
    ///
    /// Descendants of `parent` are found through the children of each level,
    /// without scanning the other objects of type `object_type`.
    #[doc(alias = "hwloc_get_obj_below_by_type")]
    #[doc(alias = "hwloc_get_obj_inside_cpuset_by_type")]
    pub fn object_below_by_type<'topology>(
        &'topology self,
        parent: &'topology TopologyObject,
        object_type: ObjectType,
        idx: usize,
    ) -> Option<&'topology TopologyObject> {
        let depth = self.depth_for_type(object_type)?;
        if depth <= parent.depth {
            // Only an ancestor spanning the same CPUs can be covered
            return self
                .ancestor_at_depth(parent, depth)
                .filter(|ancestor| idx == 0 && ancestor.is_inside_cpuset(parent.cpuset()));
        }

        // Descendants of an object form a contiguous range of each level
        let mut descendants = parent.logical_index..parent.logical_index + 1;
        for level in &self.levels[parent.depth..depth] {
            if descendants.is_empty() {
                return None;
            }
            let first = level.get(descendants.start)?;
            let last = level.get(descendants.end - 1)?;
            descendants = first.children.start..last.children.end;
        }
        self.levels[depth].get(descendants)?.get(idx)
    }

    /// Find an object via a parent->child chain specified by types and indices
    ///
    /// For example, if called with `&[(Package, 1), (Core, 2), (PU, 0)]`, this
    /// will return the first PU of the third core of the second package.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::{object::types::ObjectType, topology::Topology};
    ///
    /// let topology = Topology::from_synthetic("pack:2 core:4 pu:2")?;
    /// let pu = topology
    ///     .object_by_type_index_path(&[
    ///         (ObjectType::Package, 1),
    ///         (ObjectType::Core, 2),
    ///         (ObjectType::PU, 0),
    ///     ])
    ///     .unwrap();
    /// assert_eq!(pu.logical_index(), 12);
    /// # Ok::<(), taskbind::topology::builder::BuildError>(())
    /// ```
    pub fn object_by_type_index_path(
        &self,
        path: &[(ObjectType, usize)],
    ) -> Option<&TopologyObject> {
        let mut object = self.root_object();
        for &(ty, idx) in path {
            object = self.object_below_by_type(object, ty, idx)?;
        }
        Some(object)
    }
}

/// # CPU sets of entire topologies
impl Topology {
    /// Topology CPU set
    ///
    /// This is the CPU set of the root object, i.e. every CPU of the node.
    #[doc(alias = "hwloc_topology_get_topology_cpuset")]
    pub fn cpuset(&self) -> &CpuSet {
        &self.root_object().cpuset
    }

    /// Allowed CPU set
    ///
    /// CPUs of the node that the job step may use at all. This is always a
    /// non-empty subset of [`Topology::cpuset()`].
    #[doc(alias = "hwloc_topology_get_allowed_cpuset")]
    pub fn allowed_cpuset(&self) -> &CpuSet {
        &self.allowed_cpuset
    }
}

/// # Exporting topologies to synthetic
impl Topology {
    /// Export the topology as a synthetic description
    ///
    /// The result can be fed back to [`Topology::from_synthetic()`] to build an
    /// identical topology, minus the allowed CPU set.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::topology::Topology;
    ///
    /// let topology = Topology::from_synthetic("socket:2 core:4 pu:2")?;
    /// assert_eq!(topology.export_synthetic(), "pack:2 core:4 pu:2");
    /// # Ok::<(), taskbind::topology::builder::BuildError>(())
    /// ```
    #[doc(alias = "hwloc_topology_export_synthetic")]
    pub fn export_synthetic(&self) -> String {
        let mut result = String::new();
        let mut parent = self.root_object();
        while let Some(child) = self.children(parent).next() {
            if !result.is_empty() {
                result.push(' ');
            }
            write!(
                result,
                "{}:{}",
                builder::synthetic_name(child.object_type),
                parent.arity()
            )
            .expect("Writing to a String cannot fail");
            parent = child;
        }
        result
    }
}

/// Iterator over the ancestors of a [`TopologyObject`]
#[derive(Clone, Debug)]
pub struct Ancestors<'topology> {
    /// Topology the object belongs to
    topology: &'topology Topology,

    /// Last object yielded, or the starting object
    current: &'topology TopologyObject,
}
//
impl<'topology> Iterator for Ancestors<'topology> {
    type Item = &'topology TopologyObject;

    fn next(&mut self) -> Option<Self::Item> {
        self.current = self.topology.parent(self.current)?;
        Some(self.current)
    }
}
//
impl FusedIterator for Ancestors<'_> {}
