//! Node-level task placement

use super::{
    block::{self, CoreBlockDistributor, PositionalBlock},
    cyclic::CyclicDistributor,
    explicit::{BindKind, ExplicitDecoder},
    granularity::{self, Granularity, NodeShape},
    policy::{CpuBindType, DistributionEngine, PlacementFlags, StepLayout},
    reserved::ReservedPus,
    validate, Distributor, PlacementContext, PlacementError, TaskAffinity, TaskAffinityError,
    UnboundReason,
};
use crate::{
    cpu::binding::{self, ProcessId},
    object::types::ObjectType,
    topology::Topology,
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// How the tasks of a node are placed
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
enum PlacementMode {
    /// Tasks are left unbound
    Unbound(UnboundReason),

    /// Tasks follow an explicit bind list
    Explicit(BindKind),

    /// Tasks are placed by a distribution engine
    Distributed(DistributionEngine),
}

/// Task placement planner for one job step on one node
///
/// Everything that does not depend on the task, like the binding granularity
/// and the reserved PUs, is computed once when the planner is created. The
/// planner can then compute the [`TaskAffinity`] of any task, and install it
/// on the task's process.
///
/// # Examples
///
/// ```
/// use taskbind::{
///     cpu::cpuset::CpuSet,
///     placement::{policy::{PlacementFlags, StepLayout}, NodePlanner, TaskAffinity},
///     topology::Topology,
/// };
///
/// let topology = Topology::from_synthetic("pack:2 core:4 pu:1")?;
/// let planner = NodePlanner::new(&topology, StepLayout::new(4, 1), PlacementFlags::empty());
///
/// // Tasks are dealt round-robin across packages
/// assert_eq!(
///     planner.task_affinity(1)?,
///     TaskAffinity::Distributed(CpuSet::from(4))
/// );
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct NodePlanner<'topology> {
    /// Topology of the node
    topology: &'topology Topology,

    /// Shape of the job step on the node
    layout: StepLayout,

    /// Object counts of the node
    shape: NodeShape,

    /// Selected binding granularity
    granularity: Granularity,

    /// Object type that task CPU sets are widened to
    requested_type: ObjectType,

    /// PUs that are withheld from the tasks
    reserved: ReservedPus,

    /// How tasks are placed
    mode: PlacementMode,

    /// Truth that explanations should be logged at the INFO level
    verbose: bool,
}

/// # Planning
impl<'topology> NodePlanner<'topology> {
    /// Plan the placement of the tasks of `layout` on `topology`
    ///
    /// If no binding object is suitable, tasks are left unbound and a warning
    /// is logged.
    pub fn new(topology: &'topology Topology, layout: StepLayout, flags: PlacementFlags) -> Self {
        let bind = layout.cpu_bind_type;
        let verbose = bind.contains(CpuBindType::VERBOSE) || flags.contains(PlacementFlags::VERBOSE);
        let shape = NodeShape::new(topology, flags);
        let num_reserved = layout.core_spec.reserved_threads();
        let reserved = ReservedPus::new(topology, num_reserved, shape.num_sockets);
        let granularity = Granularity::select(&shape, &layout, num_reserved);
        let requested_type = granularity::requested_type(bind, &shape);
        let required_pus = layout.required_pus();

        let explicit = BindKind::from_bind_type(bind);
        let mode = if explicit == Some(BindKind::None) {
            PlacementMode::Unbound(UnboundReason::NoneRequested)
        } else if granularity.object_type == ObjectType::Machine {
            tracing::warn!(
                required_pus,
                num_pus = shape.num_pus,
                "not enough CPUs to bind tasks, task affinity disabled"
            );
            PlacementMode::Unbound(UnboundReason::MachineGranularity)
        } else if granularity.is_core_or_finer(topology) && granularity.num_objects < required_pus {
            tracing::warn!(
                granularity = %granularity.object_type,
                available = granularity.num_objects,
                required_pus,
                "not enough binding objects, task affinity disabled"
            );
            PlacementMode::Unbound(UnboundReason::NotEnoughObjects {
                object_type: granularity.object_type,
                available: granularity.num_objects,
                required: required_pus,
            })
        } else if let Some(kind) = explicit {
            PlacementMode::Explicit(kind)
        } else {
            PlacementMode::Distributed(layout.distribution.engine(flags))
        };
        explain!(
            verbose,
            granularity = %granularity.object_type,
            objects = granularity.num_objects,
            requested = %requested_type,
            distribution = %layout.distribution,
            ?mode,
            "task placement planned"
        );

        Self {
            topology,
            layout,
            shape,
            granularity,
            requested_type,
            reserved,
            mode,
            verbose,
        }
    }

    /// Selected binding granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Object type that task CPU sets are widened to
    pub fn requested_type(&self) -> ObjectType {
        self.requested_type
    }

    /// Object counts of the node
    pub fn shape(&self) -> &NodeShape {
        &self.shape
    }

    /// PUs that are withheld from the tasks
    pub fn reserved(&self) -> &ReservedPus {
        &self.reserved
    }

    /// Distribution engine that places the tasks, if any
    ///
    /// Tasks that are left unbound or follow an explicit bind list do not
    /// go through a distribution engine.
    pub fn engine(&self) -> Option<DistributionEngine> {
        match self.mode {
            PlacementMode::Distributed(engine) => Some(engine),
            PlacementMode::Unbound(_) | PlacementMode::Explicit(_) => None,
        }
    }

    /// Node-wide parameters of the distribution engines
    pub(crate) fn context(&self) -> PlacementContext<'_> {
        PlacementContext {
            topology: self.topology,
            granularity: self.granularity,
            requested_type: self.requested_type,
            socket_type: self.shape.socket_type,
            cpus_per_task: self.layout.effective_cpus_per_task(),
            reserved: &self.reserved,
            distribution: self.layout.distribution,
            verbose: self.verbose,
        }
    }

    /// Set up the distribution engine for a fresh pass over the tasks
    fn distributor(&self, engine: DistributionEngine) -> Box<dyn Distributor + '_> {
        let ctx = self.context();
        match engine {
            DistributionEngine::Cyclic => Box::new(CyclicDistributor::new(ctx)),
            DistributionEngine::Block if block::uses_core_walk(&ctx) => {
                Box::new(CoreBlockDistributor::new(ctx))
            }
            DistributionEngine::Block => Box::new(PositionalBlock::new(ctx)),
        }
    }
}

/// # Computing task affinities
impl NodePlanner<'_> {
    /// Compute the CPU affinity of task `task`
    ///
    /// Distribution engines replay the placement of tasks `0..task` before
    /// placing `task`, so placing every task of a node this way has
    /// quadratic complexity. Use [`NodePlanner::task_affinities()`] for that.
    ///
    /// # Errors
    ///
    /// - [`Placement`] if the distribution engine failed
    /// - [`BindString`] if the explicit bind list could not be decoded
    ///
    /// [`BindString`]: TaskAffinityError::BindString
    /// [`Placement`]: TaskAffinityError::Placement
    pub fn task_affinity(&self, task: usize) -> Result<TaskAffinity, TaskAffinityError> {
        match self.mode {
            PlacementMode::Unbound(reason) => Ok(TaskAffinity::Unbound(reason)),
            PlacementMode::Explicit(kind) => self.explicit_affinity(kind, task),
            PlacementMode::Distributed(engine) => {
                let mut distributor = self.distributor(engine);
                for _ in 0..task {
                    distributor.next_task().map_err(|e| self.node_failure(e))?;
                }
                let cpuset = distributor.next_task().map_err(|e| self.node_failure(e))?;
                Ok(TaskAffinity::Distributed(cpuset))
            }
        }
    }

    /// Compute the CPU affinity of every task of the node
    ///
    /// This is equivalent to calling [`NodePlanner::task_affinity()`] for
    /// every task, but only walks the topology once.
    ///
    /// # Errors
    ///
    /// A [`PlacementError`] aborts the placement of every task. Other errors
    /// are reported per task.
    pub fn task_affinities(
        &self,
    ) -> Result<Vec<Result<TaskAffinity, TaskAffinityError>>, PlacementError> {
        self.first_affinities(self.layout.node_tasks)
    }

    /// Compute the CPU affinity of tasks `0..num_tasks`
    fn first_affinities(
        &self,
        num_tasks: usize,
    ) -> Result<Vec<Result<TaskAffinity, TaskAffinityError>>, PlacementError> {
        match self.mode {
            PlacementMode::Unbound(reason) => {
                Ok(vec![Ok(TaskAffinity::Unbound(reason)); num_tasks])
            }
            PlacementMode::Explicit(kind) => Ok((0..num_tasks)
                .map(|task| self.explicit_affinity(kind, task))
                .collect()),
            PlacementMode::Distributed(engine) => {
                let mut distributor = self.distributor(engine);
                (0..num_tasks)
                    .map(|_| {
                        let cpuset = distributor.next_task().map_err(|e| self.node_failure(e))?;
                        Ok(Ok(TaskAffinity::Distributed(cpuset)))
                    })
                    .collect()
            }
        }
    }

    /// Decode and validate the explicit binding of task `task`
    fn explicit_affinity(
        &self,
        kind: BindKind,
        task: usize,
    ) -> Result<TaskAffinity, TaskAffinityError> {
        let decoder = ExplicitDecoder::new(
            self.context(),
            kind,
            &self.layout,
            self.shape.threads_per_core(),
        );
        let mask = decoder.task_cpuset(task).map_err(|source| {
            tracing::error!(task, %source, "invalid bind string");
            TaskAffinityError::BindString { task, source }
        })?;
        let (cpuset, validation) = validate::validate_mask(&mask, self.topology.allowed_cpuset());
        Ok(TaskAffinity::Explicit { cpuset, validation })
    }

    /// Log a node-wide placement failure
    fn node_failure(&self, error: PlacementError) -> PlacementError {
        tracing::error!(
            %error,
            granularity = %self.granularity.object_type,
            "task placement failed for the whole node"
        );
        error
    }
}

/// # Installing task affinities
impl NodePlanner<'_> {
    /// Compute the CPU affinity of task `task` and install it on process `pid`
    ///
    /// Unbound tasks are left untouched.
    ///
    /// # Errors
    ///
    /// - [`Placement`] and [`BindString`] if the affinity could not be
    ///   computed, see [`NodePlanner::task_affinity()`]
    /// - [`Binding`] if the operating system refused the affinity
    ///
    /// [`Binding`]: TaskAffinityError::Binding
    /// [`BindString`]: TaskAffinityError::BindString
    /// [`Placement`]: TaskAffinityError::Placement
    pub fn bind_task(
        &self,
        task: usize,
        pid: ProcessId,
    ) -> Result<TaskAffinity, TaskAffinityError> {
        let affinity = self.task_affinity(task)?;
        self.install(task, pid, affinity)
    }

    /// Compute and install the CPU affinity of several tasks
    ///
    /// `pids[k]` is the process of task `k`. The outcome of each task is
    /// reported separately.
    ///
    /// # Errors
    ///
    /// A [`PlacementError`] aborts the placement of every task, and no
    /// affinity is installed.
    pub fn bind_tasks(
        &self,
        pids: &[ProcessId],
    ) -> Result<Vec<Result<TaskAffinity, TaskAffinityError>>, PlacementError> {
        let affinities = self.first_affinities(pids.len())?;
        Ok(affinities
            .into_iter()
            .zip(pids)
            .enumerate()
            .map(|(task, (affinity, &pid))| {
                affinity.and_then(|affinity| self.install(task, pid, affinity))
            })
            .collect())
    }

    /// Install a task affinity, then read it back
    fn install(
        &self,
        task: usize,
        pid: ProcessId,
        affinity: TaskAffinity,
    ) -> Result<TaskAffinity, TaskAffinityError> {
        let Some(cpuset) = affinity.cpuset() else {
            return Ok(affinity);
        };
        if let Err(source) = binding::bind_process_cpu(pid, cpuset) {
            tracing::error!(task, pid, %cpuset, %source, "failed to set task CPU affinity");
            return Err(TaskAffinityError::Binding {
                task,
                cpuset: cpuset.clone(),
                source,
            });
        }
        match binding::process_cpu_binding(pid) {
            Ok(actual) => explain!(self.verbose, task, pid, cpuset = %actual, "task CPU affinity set"),
            Err(error) => tracing::debug!(task, pid, %error, "could not read back task CPU affinity"),
        }
        Ok(affinity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use crate::{
        cpu::cpuset::CpuSet,
        placement::{
            policy::{
                CoreSpecialization, NodeDistribution, SubDistribution, TaskDistribution,
            },
            MaskValidation,
        },
        strategies::{layout_with_tasks, topology},
        topology::builder::TopologyBuilder,
    };
    use proptest::prelude::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(NodePlanner<'static>: Clone, Send, Sync);

    #[test]
    fn unbound_modes() {
        let topology = Topology::from_synthetic("pack:2 core:4 pu:2").unwrap();

        let none = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::NONE | CpuBindType::MASK, Some("0x1"));
        let planner = NodePlanner::new(&topology, none, PlacementFlags::empty());
        assert_eq!(
            planner.task_affinity(1),
            Ok(TaskAffinity::Unbound(UnboundReason::NoneRequested))
        );
        assert_eq!(planner.engine(), None);

        let too_many = StepLayout::new(17, 1);
        let planner = NodePlanner::new(&topology, too_many, PlacementFlags::empty());
        assert_eq!(planner.granularity().object_type, ObjectType::Machine);
        assert_eq!(
            planner.task_affinities(),
            Ok(vec![
                Ok(TaskAffinity::Unbound(UnboundReason::MachineGranularity));
                17
            ])
        );

        let forced_cores = StepLayout::new(6, 2).with_cpu_bind(CpuBindType::TO_CORES, None);
        let planner = NodePlanner::new(&topology, forced_cores, PlacementFlags::empty());
        assert_eq!(
            planner.task_affinity(0),
            Ok(TaskAffinity::Unbound(UnboundReason::NotEnoughObjects {
                object_type: ObjectType::Core,
                available: 8,
                required: 12,
            }))
        );
    }

    #[test]
    fn batch_steps() {
        let topology = Topology::from_synthetic("pack:2 core:4 pu:1").unwrap();
        let planner = NodePlanner::new(&topology, StepLayout::batch(4), PlacementFlags::empty());
        assert_eq!(planner.granularity().object_type, ObjectType::Core);
        assert_eq!(
            planner.task_affinity(0),
            Ok(TaskAffinity::Distributed(CpuSet::from_range(0..4)))
        );
    }

    #[test]
    fn engine_dispatch() {
        let topology = Topology::from_synthetic("pack:2 core:4 pu:1").unwrap();
        let block = StepLayout::new(4, 1).with_distribution(
            TaskDistribution::new(NodeDistribution::Block).with_socket(SubDistribution::Block),
        );
        let planner = NodePlanner::new(&topology, block, PlacementFlags::empty());
        assert_eq!(planner.engine(), Some(DistributionEngine::Block));
        assert_eq!(
            planner.task_affinity(1),
            Ok(TaskAffinity::Distributed(CpuSet::from(1)))
        );

        let planner = NodePlanner::new(
            &topology,
            StepLayout::new(4, 1),
            PlacementFlags::DEFAULT_DIST_BLOCK,
        );
        assert_eq!(planner.engine(), Some(DistributionEngine::Block));

        let planner = NodePlanner::new(&topology, StepLayout::new(4, 1), PlacementFlags::empty());
        assert_eq!(planner.engine(), Some(DistributionEngine::Cyclic));
        assert_eq!(
            planner.task_affinity(1),
            Ok(TaskAffinity::Distributed(CpuSet::from(4)))
        );
    }

    #[test]
    fn explicit_masks_are_validated() {
        let topology = TopologyBuilder::from_synthetic("pack:1 core:8 pu:1")
            .unwrap()
            .with_allowed_cpuset(CpuSet::from_range(0..4))
            .build()
            .unwrap();
        let layout = StepLayout::new(3, 1).with_cpu_bind(CpuBindType::MASK, Some("0x3,0xff,0x30,0xq"));
        let planner = NodePlanner::new(&topology, layout, PlacementFlags::empty());
        let affinities = planner.task_affinities().unwrap();
        assert_eq!(
            affinities,
            vec![
                Ok(TaskAffinity::Explicit {
                    cpuset: CpuSet::from_range(0..2),
                    validation: MaskValidation::Kept,
                }),
                Ok(TaskAffinity::Explicit {
                    cpuset: CpuSet::from_range(0..4),
                    validation: MaskValidation::Clamped,
                }),
                Ok(TaskAffinity::Explicit {
                    cpuset: CpuSet::from_range(0..4),
                    validation: MaskValidation::Replaced,
                }),
            ]
        );
        assert!(matches!(
            planner.task_affinity(3),
            Err(TaskAffinityError::BindString { task: 3, .. })
        ));
    }

    #[test]
    fn node_wide_failures() {
        let topology = Topology::from_synthetic("pack:2 pu:4").unwrap();
        let planner = NodePlanner::new(&topology, StepLayout::new(2, 1), PlacementFlags::empty());
        let expected = PlacementError::EnumerationFailed {
            socket_type: ObjectType::Package,
            object_type: ObjectType::PU,
        };
        assert_eq!(planner.task_affinities(), Err(expected.clone()));
        let error = planner.task_affinity(1).unwrap_err();
        assert!(error.is_node_fatal());
        assert_eq!(error, TaskAffinityError::Placement(expected.clone()));
        assert_eq!(planner.bind_tasks(&[0, 0]), Err(expected));
    }

    #[test]
    fn reserved_threads_stay_free() {
        let topology = Topology::from_synthetic("pack:2 core:2 pu:2").unwrap();
        let layout = StepLayout::new(2, 2)
            .with_core_spec(CoreSpecialization::Threads(2))
            .with_cpu_bind(CpuBindType::TO_CORES, None);
        let planner = NodePlanner::new(&topology, layout, PlacementFlags::empty());
        assert_eq!(planner.reserved().cpuset(), &CpuSet::from_iter([3usize, 7]));
        for affinity in planner.task_affinities().unwrap() {
            let cpuset = affinity.unwrap().cpuset().cloned().unwrap();
            assert!(!cpuset.intersects(planner.reserved().cpuset()));
        }
    }

    proptest! {
        #[test]
        fn batch_matches_replay((topology, (layout, flags)) in topology().prop_flat_map(|topology| {
            let num_pus = topology.num_objects_with_type(ObjectType::PU);
            (Just(topology), layout_with_tasks(1..=num_pus.min(6)))
        })) {
            let planner = NodePlanner::new(&topology, layout, flags);
            match planner.task_affinities() {
                Ok(affinities) => {
                    for (task, affinity) in affinities.into_iter().enumerate() {
                        prop_assert_eq!(planner.task_affinity(task), affinity);
                    }
                }
                Err(error) => {
                    let expected = Err(TaskAffinityError::Placement(error));
                    prop_assert!(
                        (0..planner.layout.node_tasks).any(|task| planner.task_affinity(task) == expected)
                    );
                }
            }
        }
    }
}
