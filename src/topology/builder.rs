//! Building a topology
//!
//! Topologies are built from synthetic descriptions, which list the levels
//! of a symmetric machine from the top down, each with its arity. For example
//! `"numa:2 pack:1 l3:1 core:4 pu:2"` describes a machine with 2 NUMA nodes,
//! each holding one package with one L3 cache, four cores and two hardware
//! threads per core, for a total of 16 PUs.
//!
//! Recognized level names are (case-insensitive):
//!
//! - `group` or `board` for [`ObjectType::Group`]
//! - `numa`, `node` or `numanode` for [`ObjectType::NUMANode`]
//! - `pack`, `package` or `socket` for [`ObjectType::Package`]
//! - `l3` or `l3cache` for [`ObjectType::L3Cache`]
//! - `core` for [`ObjectType::Core`]
//! - `pu` for [`ObjectType::PU`]
//!
//! Levels other than NUMA nodes must follow the [`ObjectType`] order, NUMA
//! nodes may appear anywhere above cores. The last level must be `pu`.

use super::Topology;
use crate::{
    cpu::cpuset::{CpuSet, MAX_CPUS},
    object::{types::ObjectType, TopologyObject},
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use thiserror::Error;

/// Mechanism to build a [`Topology`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopologyBuilder {
    /// Type and arity of each level below the root
    levels: Vec<(ObjectType, usize)>,

    /// Allowed CPU set restriction, if any
    allowed_cpuset: Option<CpuSet>,
}

impl TopologyBuilder {
    /// Prepare a topology from a synthetic description
    ///
    /// See the [module-level documentation](self) for the description syntax.
    ///
    /// # Errors
    ///
    /// [`SyntheticError`] if the description is invalid, see its variants for
    /// more information.
    #[doc(alias = "hwloc_topology_set_synthetic")]
    pub fn from_synthetic(description: &str) -> Result<Self, SyntheticError> {
        let mut levels = Vec::<(ObjectType, usize)>::new();
        for token in description.split_whitespace() {
            let (name, count) = token
                .split_once(':')
                .ok_or_else(|| SyntheticError::BadCount(token.to_owned()))?;
            let ty = parse_type(name).ok_or_else(|| SyntheticError::UnknownType(name.to_owned()))?;
            let count = count
                .parse::<usize>()
                .ok()
                .filter(|&count| count > 0)
                .ok_or_else(|| SyntheticError::BadCount(token.to_owned()))?;

            if levels.iter().any(|&(other, _)| other == ty) {
                return Err(SyntheticError::Duplicate(ty));
            }
            if let Some(&(above, _)) = levels.last() {
                if above == ObjectType::PU {
                    return Err(SyntheticError::BadOrder { above, below: ty });
                }
            }
            let misplaced = if ty == ObjectType::NUMANode {
                levels
                    .iter()
                    .find(|&&(above, _)| above >= ObjectType::Core)
            } else {
                levels
                    .iter()
                    .filter(|&&(above, _)| above != ObjectType::NUMANode)
                    .find(|&&(above, _)| above >= ty)
            };
            if let Some(&(above, _)) = misplaced {
                return Err(SyntheticError::BadOrder { above, below: ty });
            }
            levels.push((ty, count));
        }

        match levels.last() {
            None => return Err(SyntheticError::Empty),
            Some(&(ty, _)) if ty != ObjectType::PU => return Err(SyntheticError::MissingPu),
            Some(_) => {}
        }
        let num_pus = levels
            .iter()
            .try_fold(1usize, |acc, &(_, count)| acc.checked_mul(count));
        if num_pus.map_or(true, |num_pus| num_pus > MAX_CPUS) {
            return Err(SyntheticError::TooManyPus);
        }

        Ok(Self {
            levels,
            allowed_cpuset: None,
        })
    }

    /// Restrict the CPUs that the job step is allowed to use
    ///
    /// By default, every CPU of the topology is allowed. CPUs outside of the
    /// topology are ignored.
    #[doc(alias = "hwloc_topology_restrict")]
    pub fn with_allowed_cpuset(mut self, allowed_cpuset: CpuSet) -> Self {
        self.allowed_cpuset = Some(allowed_cpuset);
        self
    }

    /// Load the topology with the previously specified parameters
    ///
    /// # Errors
    ///
    /// - [`BuildError::NoAllowedCpu`] if the allowed CPU set restriction does
    ///   not intersect the topology
    #[doc(alias = "hwloc_topology_load")]
    pub fn build(self) -> Result<Topology, BuildError> {
        let num_pus = self.levels.iter().map(|&(_, count)| count).product::<usize>();
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.push(vec![TopologyObject {
            object_type: ObjectType::Machine,
            depth: 0,
            logical_index: 0,
            os_index: Some(0),
            parent: None,
            children: 0..self.levels[0].1,
            cpuset: CpuSet::from_range(0..num_pus),
        }]);

        let mut level_size = 1;
        for (depth_minus_1, &(object_type, arity)) in self.levels.iter().enumerate() {
            level_size *= arity;
            let pus_per_object = num_pus / level_size;
            let child_arity = self.levels.get(depth_minus_1 + 1).map_or(0, |&(_, arity)| arity);
            let has_os_index = matches!(
                object_type,
                ObjectType::NUMANode | ObjectType::Package | ObjectType::Core | ObjectType::PU
            );
            levels.push(
                (0..level_size)
                    .map(|idx| TopologyObject {
                        object_type,
                        depth: depth_minus_1 + 1,
                        logical_index: idx,
                        os_index: has_os_index.then_some(idx),
                        parent: Some(idx / arity),
                        children: idx * child_arity..(idx + 1) * child_arity,
                        cpuset: CpuSet::from_range(
                            idx * pus_per_object..(idx + 1) * pus_per_object,
                        ),
                    })
                    .collect(),
            );
        }

        let full = levels[0][0].cpuset.clone();
        let allowed_cpuset = match self.allowed_cpuset {
            Some(allowed) => {
                let allowed = allowed & &full;
                if allowed.is_empty() {
                    return Err(BuildError::NoAllowedCpu);
                }
                allowed
            }
            None => full,
        };
        Ok(Topology::from_levels(levels, allowed_cpuset))
    }
}

/// Canonical synthetic name of an object type
pub(crate) fn synthetic_name(ty: ObjectType) -> &'static str {
    match ty {
        ObjectType::Machine => "machine",
        ObjectType::Group => "group",
        ObjectType::NUMANode => "numa",
        ObjectType::Package => "pack",
        ObjectType::L3Cache => "l3",
        ObjectType::Core => "core",
        ObjectType::PU => "pu",
    }
}

/// Decode a synthetic level name
fn parse_type(name: &str) -> Option<ObjectType> {
    let ty = match name.to_ascii_lowercase().as_str() {
        "group" | "board" => ObjectType::Group,
        "numa" | "node" | "numanode" => ObjectType::NUMANode,
        "pack" | "package" | "socket" => ObjectType::Package,
        "l3" | "l3cache" => ObjectType::L3Cache,
        "core" => ObjectType::Core,
        "pu" => ObjectType::PU,
        _ => return None,
    };
    Some(ty)
}

/// Invalid synthetic topology description
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum SyntheticError {
    /// The description does not contain any level
    #[error("synthetic description has no level")]
    Empty,

    /// A level name is not recognized
    #[error("unknown synthetic level type {0:?}")]
    UnknownType(String),

    /// A level is not of the form `type:count` with a nonzero count
    #[error("synthetic level {0:?} should be of the form type:count with count > 0")]
    BadCount(String),

    /// An object type appears at several levels
    #[error("object type {0} appears at several synthetic levels")]
    Duplicate(ObjectType),

    /// An object type appears below a type that it normally contains
    #[error("{below} objects can't be placed below {above} objects")]
    BadOrder {
        /// Level that comes first in the description
        above: ObjectType,

        /// Misplaced level
        below: ObjectType,
    },

    /// The description does not end with a PU level
    #[error("synthetic description must end with a pu level")]
    MissingPu,

    /// The description has more PUs than affinity masks can address
    #[error("synthetic description has more than {MAX_CPUS} PUs")]
    TooManyPus,
}

/// Failed to build a [`Topology`]
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum BuildError {
    /// The synthetic description is invalid
    #[error(transparent)]
    Synthetic(#[from] SyntheticError),

    /// The allowed CPU set restriction does not cover any CPU of the topology
    #[error("allowed cpuset does not intersect the topology")]
    NoAllowedCpu,
}
