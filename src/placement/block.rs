//! Block distribution engine
//!
//! Consecutive tasks get consecutive objects. There are two flavors:
//!
//! - At PU granularity, unless block core distribution was requested, cores
//!   are consumed one hardware thread at a time. Each task starts on the core
//!   after the one where the previous task started.
//! - Otherwise, each task gets the objects whose position matches its task
//!   number.

use super::{policy::SubDistribution, Distributor, PlacementContext, PlacementError};
use crate::{
    cpu::cpuset::CpuSet,
    object::{types::ObjectType, TopologyObject},
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Truth that the core-by-core flavor of block distribution applies
pub(crate) fn uses_core_walk(ctx: &PlacementContext<'_>) -> bool {
    ctx.granularity.object_type == ObjectType::PU
        && ctx.distribution.core != Some(SubDistribution::Block)
}

/// Block distribution that walks cores, taking one hardware thread at a time
#[derive(Clone, Debug)]
pub(crate) struct CoreBlockDistributor<'a> {
    /// Node-wide placement parameters
    ctx: PlacementContext<'a>,

    /// Cores of the node
    cores: Vec<&'a TopologyObject>,

    /// Number of PUs that each task gets
    units_per_task: usize,

    /// Next task to be placed
    task: usize,

    /// Core where the search for the next PU starts
    core: usize,

    /// Next thread of each core
    next_thread: Vec<usize>,
}
//
impl<'a> CoreBlockDistributor<'a> {
    /// Prepare to distribute tasks core by core
    pub(crate) fn new(ctx: PlacementContext<'a>) -> Self {
        let cores = ctx
            .topology
            .objects_with_type(ObjectType::Core)
            .collect::<Vec<_>>();
        let units_per_task = ctx.units_per_task();
        let next_thread = vec![0; cores.len()];
        Self {
            ctx,
            cores,
            units_per_task,
            task: 0,
            core: 0,
            next_thread,
        }
    }

    /// Try to take the next PU of the current core
    fn take_pu(&mut self) -> Option<&'a TopologyObject> {
        let core = self.cores[self.core];
        if !self.ctx.usable(core) {
            self.core += 1;
            return None;
        }
        let thread = self.next_thread[self.core];
        let Some(pu) = self
            .ctx
            .topology
            .object_below_by_type(core, ObjectType::PU, thread)
        else {
            self.core += 1;
            return None;
        };
        self.next_thread[self.core] += 1;
        self.ctx.usable(pu).then_some(pu)
    }
}
//
impl Distributor for CoreBlockDistributor<'_> {
    fn next_task(&mut self) -> Result<CpuSet, PlacementError> {
        let task = self.task;
        let num_cores = self.cores.len();
        if num_cores == 0 {
            return Err(PlacementError::EnumerationFailed {
                socket_type: self.ctx.socket_type,
                object_type: ObjectType::PU,
            });
        }

        let max_passes = self.units_per_task + 1;
        let full_cyclic = self.ctx.distribution.core == Some(SubDistribution::FullCyclic);
        let mut cpuset = CpuSet::new();
        let mut units = 0;
        let mut passes = 0;
        if self.core >= num_cores {
            self.core = 0;
        }
        while units < self.units_per_task {
            if self.core >= num_cores {
                self.core = 0;
                passes += 1;
                if passes > max_passes {
                    return Err(PlacementError::LoopExhausted {
                        task,
                        passes,
                        distribution: self.ctx.distribution,
                        partial: cpuset,
                    });
                }
            }
            if let Some(pu) = self.take_pu() {
                self.ctx.add_object_cpuset(pu, &mut cpuset);
                units += 1;
                if full_cyclic && units < self.units_per_task {
                    self.core += 1;
                }
            }
        }
        self.core += 1;
        self.task += 1;

        let cpuset = self.ctx.finish(cpuset);
        explain!(self.ctx.verbose, task, %cpuset, "block placement over cores");
        Ok(cpuset)
    }
}

/// Block distribution by object position
///
/// At core or PU granularity, task `k` gets objects `k * cpus_per_task` to
/// `(k + 1) * cpus_per_task - 1`. At coarser granularities, task `k` gets
/// object `k`. Reserved PUs do not count as positions.
#[derive(Clone, Debug)]
pub(crate) struct PositionalBlock<'a> {
    /// Node-wide placement parameters
    ctx: PlacementContext<'a>,

    /// Next task to be placed
    task: usize,
}
//
impl<'a> PositionalBlock<'a> {
    /// Prepare to distribute tasks by position
    pub(crate) fn new(ctx: PlacementContext<'a>) -> Self {
        Self { ctx, task: 0 }
    }

    /// CPUs of task `task`
    ///
    /// A position where no CPU is usable yields every usable CPU of the node,
    /// so that the task still runs somewhere.
    pub(crate) fn task_cpuset(&self, task: usize) -> CpuSet {
        let ctx = &self.ctx;
        let units = ctx.units_per_task();
        let first = task * units;
        let skip_reserved = ctx.granularity.object_type == ObjectType::PU;
        let mut cpuset = CpuSet::new();
        ctx.topology
            .objects_with_type(ctx.granularity.object_type)
            .take(ctx.granularity.num_objects)
            .filter(|object| !(skip_reserved && ctx.reserved.contains(object.logical_index())))
            .skip(first)
            .take(units)
            .for_each(|object| ctx.add_object_cpuset(object, &mut cpuset));
        let cpuset = ctx.finish(cpuset);
        if cpuset.is_empty() {
            let allowed = ctx.topology.allowed_cpuset();
            let mut fallback = ctx.finish(allowed.clone());
            if fallback.is_empty() {
                fallback = allowed.clone();
            }
            tracing::warn!(
                task,
                first,
                cpuset = %fallback,
                "no usable CPU at this block position, using every usable CPU"
            );
            return fallback;
        }
        explain!(
            ctx.verbose,
            task,
            %cpuset,
            first,
            last = first + units - 1,
            "block placement"
        );
        cpuset
    }
}
//
impl Distributor for PositionalBlock<'_> {
    fn next_task(&mut self) -> Result<CpuSet, PlacementError> {
        let cpuset = self.task_cpuset(self.task);
        self.task += 1;
        Ok(cpuset)
    }
}
