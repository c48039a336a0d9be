//! Cyclic distribution engine
//!
//! Tasks are dealt round-robin across sockets: task 0 goes to the first
//! socket, task 1 to the second socket, and so on. Each socket keeps a pointer
//! to the next core to be used, and each core keeps a pointer to its next
//! hardware thread, so that objects are never handed out twice.
//!
//! At PU granularity, the core sub-distribution decides how the core pointer
//! moves. By default a core is used until its threads are exhausted. With
//! cyclic core distribution, the next task that lands on a socket starts on
//! the core after the one used by the previous task. With full-cyclic core
//! distribution, the core pointer moves after every PU.
//!
//! With full-cyclic socket distribution, the socket pointer moves after every
//! object instead of after every task.

use super::{
    policy::SubDistribution, Distributor, PlacementContext, PlacementError,
};
use crate::{
    cpu::cpuset::CpuSet,
    object::{types::ObjectType, TopologyObject},
};
use arrayvec::ArrayVec;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Chain of (type, index) pairs leading from the root to an object
type IndexPath = ArrayVec<(ObjectType, usize), 3>;

/// Cyclic distribution state
#[derive(Clone, Debug)]
pub(crate) struct CyclicDistributor<'a> {
    /// Node-wide placement parameters
    ctx: PlacementContext<'a>,

    /// Number of objects acting as sockets
    num_sockets: usize,

    /// Number of cores per socket, rounded up
    cores_per_socket: usize,

    /// Number of threads per core, rounded up
    threads_per_core: usize,

    /// Number of objects that each task gets
    units_per_task: usize,

    /// Number of passes through the sockets after which a task is given up
    max_passes: usize,

    /// Next task to be placed
    task: usize,

    /// Socket where the search for the next object starts
    socket: usize,

    /// Next core of each socket
    next_core: Vec<usize>,

    /// Core that each socket moves to once the current task is placed
    pending_core: Vec<Option<usize>>,

    /// Next thread of each core, indexed by `socket * cores_per_socket + core`
    next_thread: Vec<usize>,

    /// Truth that the first object of the first socket is missing
    first_missing: bool,
}
//
impl<'a> CyclicDistributor<'a> {
    /// Prepare to distribute tasks cyclically
    pub(crate) fn new(ctx: PlacementContext<'a>) -> Self {
        let topology = ctx.topology;
        let num_sockets = topology.num_objects_with_type(ctx.socket_type);
        let num_cores = topology.num_objects_with_type(ObjectType::Core);
        let num_pus = topology.num_objects_with_type(ObjectType::PU);
        let cores_per_socket = if num_sockets == 0 {
            0
        } else {
            num_cores.div_ceil(num_sockets)
        };
        let threads_per_core = if num_cores == 0 {
            1
        } else {
            num_pus.div_ceil(num_cores).max(1)
        };
        let units_per_task = ctx.units_per_task();
        Self {
            ctx,
            num_sockets,
            cores_per_socket,
            threads_per_core,
            units_per_task,
            max_passes: (units_per_task + 1) * threads_per_core,
            task: 0,
            socket: 0,
            next_core: vec![0; num_sockets],
            pending_core: vec![None; num_sockets],
            next_thread: vec![0; num_sockets * cores_per_socket],
            first_missing: false,
        }
    }

    /// Truth that tasks are bound to individual PUs
    fn pu_granularity(&self) -> bool {
        self.ctx.granularity.object_type == ObjectType::PU
    }

    /// Error to be reported when the topology cannot be walked
    fn enumeration_failed(&self) -> PlacementError {
        PlacementError::EnumerationFailed {
            socket_type: self.ctx.socket_type,
            object_type: self.ctx.granularity.object_type,
        }
    }

    /// Try to take the next PU of the current socket
    ///
    /// Returns `None` if the PU under the thread pointer cannot be used. The
    /// pointers are moved either way, so repeated calls make progress.
    fn take_pu(&mut self) -> Option<&'a TopologyObject> {
        let topology = self.ctx.topology;
        let socket = self.socket;
        let core = self.next_core[socket];
        let mut path = IndexPath::new();
        path.push((self.ctx.socket_type, socket));
        path.push((ObjectType::Core, core));
        let Some(core_obj) = topology.object_by_type_index_path(&path) else {
            self.first_missing |= socket == 0 && core == 0;
            self.skip_core();
            return None;
        };
        if !self.ctx.usable(core_obj) {
            self.skip_core();
            return None;
        }

        let slot = socket * self.cores_per_socket + core;
        let thread = self.next_thread[slot];
        path.push((ObjectType::PU, thread));
        let Some(pu) = topology.object_by_type_index_path(&path) else {
            self.first_missing |= socket == 0 && core == 0 && thread == 0;
            self.skip_core();
            return None;
        };
        self.next_thread[slot] += 1;
        self.ctx.usable(pu).then_some(pu)
    }

    /// Move the current socket to its next core, or move to the next socket
    /// once every core was visited
    fn skip_core(&mut self) {
        let core = &mut self.next_core[self.socket];
        *core += 1;
        if *core >= self.cores_per_socket {
            *core = 0;
            self.socket += 1;
        }
    }

    /// Try to take the next object of the current socket at core or coarser
    /// granularity
    fn take_object(&mut self) -> Option<&'a TopologyObject> {
        let topology = self.ctx.topology;
        let socket = self.socket;
        let idx = self.next_core[socket];
        let mut path = IndexPath::new();
        path.push((self.ctx.socket_type, socket));
        path.push((self.ctx.granularity.object_type, idx));
        let Some(object) = topology.object_by_type_index_path(&path) else {
            self.first_missing |= socket == 0 && idx == 0;
            self.socket += 1;
            return None;
        };
        self.next_core[socket] += 1;
        self.ctx.usable(object).then_some(object)
    }

    /// Move the pointers after the `units`-th object of a task was taken
    ///
    /// Nothing moves after the last object of a task.
    fn after_unit(&mut self, units: usize) {
        if units >= self.units_per_task {
            return;
        }
        let socket = self.socket;
        if self.pu_granularity() {
            let next = (self.next_core[socket] + 1) % self.cores_per_socket;
            match self.ctx.distribution.core {
                Some(SubDistribution::Cyclic) => self.pending_core[socket] = Some(next),
                Some(SubDistribution::FullCyclic) => self.next_core[socket] = next,
                Some(SubDistribution::Block) | None => {}
            }
        }
        if self.ctx.distribution.socket == Some(SubDistribution::FullCyclic) {
            self.socket += 1;
        }
    }

    /// Move the pointers after a task was placed
    fn after_task(&mut self) {
        for (core, pending) in self.next_core.iter_mut().zip(&mut self.pending_core) {
            if let Some(next) = pending.take() {
                *core = next;
            }
        }
        self.socket += 1;
        self.task += 1;
    }
}
//
impl Distributor for CyclicDistributor<'_> {
    fn next_task(&mut self) -> Result<CpuSet, PlacementError> {
        let task = self.task;
        let pu_granularity = self.pu_granularity();
        if self.num_sockets == 0 || (pu_granularity && self.cores_per_socket == 0) {
            return Err(self.enumeration_failed());
        }

        let mut cpuset = CpuSet::new();
        let mut units = 0;
        let mut passes = 0;
        if self.socket >= self.num_sockets {
            self.socket = 0;
        }
        while units < self.units_per_task {
            if self.socket >= self.num_sockets {
                self.socket = 0;
                passes += 1;
                if passes > self.max_passes {
                    if self.first_missing {
                        return Err(self.enumeration_failed());
                    }
                    return Err(PlacementError::LoopExhausted {
                        task,
                        passes,
                        distribution: self.ctx.distribution,
                        partial: cpuset,
                    });
                }
            }
            let unit = if pu_granularity {
                self.take_pu()
            } else {
                self.take_object()
            };
            if let Some(object) = unit {
                self.ctx.add_object_cpuset(object, &mut cpuset);
                units += 1;
                self.after_unit(units);
            }
        }
        self.after_task();

        let cpuset = self.ctx.finish(cpuset);
        explain!(
            self.ctx.verbose,
            task,
            %cpuset,
            distribution = %self.ctx.distribution,
            "cyclic placement"
        );
        Ok(cpuset)
    }
}
