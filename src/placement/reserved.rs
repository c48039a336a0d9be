//! Specialized PU reservation
//!
//! Steps with thread specialization leave some hardware threads to the
//! system. Those are taken from the end of the machine: the last thread of
//! every core goes first, starting from the last core of the last socket,
//! then the second to last thread of every core, and so on.

use crate::{cpu::cpuset::CpuSet, impl_bitmap_newtype, object::types::ObjectType, topology::Topology};
#[cfg(doc)]
use crate::bitmap::Bitmap;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

impl_bitmap_newtype!(
    /// [`Bitmap`] whose bits are set according to PU logical indices
    ///
    /// Unlike a [`CpuSet`], which refers to CPUs by operating system number,
    /// a `PuSet` refers to PUs by their position in the topology.
    PuSet
);

/// PUs that are withheld from task placement on a node
///
/// Computed once per node, then shared by the placement of every task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReservedPus {
    /// Logical indices of reserved PUs
    pus: PuSet,

    /// CPUs of reserved PUs
    cpuset: CpuSet,
}
//
impl ReservedPus {
    /// Reserve `count` hardware threads of `topology`
    ///
    /// `num_sockets` is the number of objects acting as sockets, see
    /// [`reserve_threads()`] for the selection order.
    pub fn new(topology: &Topology, count: usize, num_sockets: usize) -> Self {
        let num_pus = topology.num_objects_with_type(ObjectType::PU);
        let num_cores = topology.num_objects_with_type(ObjectType::Core);
        let pus = reserve_threads(count, num_pus, num_cores, num_sockets);
        let cpuset = pus
            .iter_set()
            .filter_map(|idx| topology.object_by_type(ObjectType::PU, idx))
            .fold(CpuSet::new(), |acc, pu| acc | pu.cpuset());
        if !pus.is_empty() {
            tracing::debug!(%pus, %cpuset, "reserved specialized threads");
        }
        Self { pus, cpuset }
    }

    /// Logical indices of the reserved PUs
    pub fn pus(&self) -> &PuSet {
        &self.pus
    }

    /// CPUs of the reserved PUs
    pub fn cpuset(&self) -> &CpuSet {
        &self.cpuset
    }

    /// Truth that no PU is reserved
    pub fn is_empty(&self) -> bool {
        self.pus.is_empty()
    }

    /// Truth that the PU with logical index `idx` is reserved
    pub fn contains(&self, idx: usize) -> bool {
        self.pus.is_set(idx)
    }
}

/// Pick `count` PUs to be reserved, by logical index
///
/// PUs are assumed to be laid out as `num_sockets` sockets of
/// `ceil(num_cores / num_sockets)` cores of `ceil(num_pus / num_cores)`
/// threads. Thread indices are iterated first, then core indices, then socket
/// indices, all in descending order. Positions that fall beyond the last PU
/// of an irregular machine are skipped without being counted.
///
/// # Examples
///
/// ```
/// use taskbind::placement::reserved::reserve_threads;
///
/// // 2 sockets x 2 cores x 2 threads: last threads of the last cores first
/// let reserved = reserve_threads(3, 8, 4, 2);
/// assert_eq!(format!("{reserved}"), "3,5,7");
/// ```
pub fn reserve_threads(count: usize, num_pus: usize, num_cores: usize, num_sockets: usize) -> PuSet {
    let mut reserved = PuSet::new();
    if count == 0 || num_pus == 0 || num_cores == 0 || num_sockets == 0 {
        return reserved;
    }
    let cores_per_socket = num_cores.div_ceil(num_sockets);
    let threads_per_core = num_pus.div_ceil(num_cores);
    let mut remaining = count;
    'threads: for thread in (0..threads_per_core).rev() {
        for core in (0..cores_per_socket).rev() {
            for socket in (0..num_sockets).rev() {
                if remaining == 0 {
                    break 'threads;
                }
                let idx = (socket * cores_per_socket + core) * threads_per_core + thread;
                if idx < num_pus {
                    reserved.set(idx);
                    remaining -= 1;
                }
            }
        }
    }
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn selection_order() {
        assert_eq!(reserve_threads(3, 8, 4, 2), PuSet::from_iter([7usize, 3, 5]));
        assert_eq!(reserve_threads(4, 8, 4, 2), PuSet::from_iter([1usize, 3, 5, 7]));
        assert_eq!(
            reserve_threads(5, 8, 4, 2),
            PuSet::from_iter([1usize, 3, 5, 6, 7])
        );
        assert_eq!(reserve_threads(0, 8, 4, 2), PuSet::new());
        assert_eq!(reserve_threads(2, 8, 4, 0), PuSet::new());
    }

    #[test]
    fn irregular_machine() {
        // 3 cores over 2 sockets are seen as 2 sockets x 2 cores
        let reserved = reserve_threads(2, 6, 3, 2);
        assert_eq!(reserved, PuSet::from_iter([3usize, 5]));
    }

    #[test]
    fn topology_cpus() {
        let topology = Topology::from_synthetic("pack:2 core:2 pu:2").unwrap();
        let reserved = ReservedPus::new(&topology, 2, 2);
        assert_eq!(reserved.pus(), &PuSet::from_iter([3usize, 7]));
        assert_eq!(reserved.cpuset(), &CpuSet::from_iter([3usize, 7]));
        assert!(reserved.contains(7));
        assert!(!reserved.contains(6));
        assert!(ReservedPus::new(&topology, 0, 2).is_empty());
    }

    proptest! {
        #[test]
        fn reserves_exactly_what_fits(
            count in 0usize..40,
            num_sockets in 1usize..4,
            cores_per_socket in 1usize..4,
            threads_per_core in 1usize..4,
        ) {
            let num_cores = num_sockets * cores_per_socket;
            let num_pus = num_cores * threads_per_core;
            let reserved = reserve_threads(count, num_pus, num_cores, num_sockets);
            prop_assert_eq!(reserved.weight(), count.min(num_pus));
            prop_assert!(reserved.last_set().map_or(true, |last| last < num_pus));
        }
    }
}
