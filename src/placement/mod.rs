//! Task placement
//!
//! This is where the CPUs of each task of a job step are chosen. The entry
//! point is [`NodePlanner`], which is set up once per node and job step, then
//! computes the [`TaskAffinity`] of every task and optionally installs it.
//!
//! Placement goes through the following stages:
//!
//! - A [binding granularity](granularity) is selected, which is the kind of
//!   topology object that tasks are bound to.
//! - Some hardware threads may be [reserved](reserved) for system use.
//! - Each task gets CPUs either from an [explicit bind string](explicit), or
//!   from the [cyclic](cyclic) or [block](block) distribution engine.
//! - Explicit masks are [validated](validate) against the allowed CPUs.

/// Log a placement explanation
///
/// Explanations are emitted at the INFO level when the user asked for
/// verbose binding reports, and at the DEBUG level otherwise.
macro_rules! explain {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod block;
pub mod cyclic;
pub mod explicit;
pub mod granularity;
pub mod planner;
pub mod policy;
pub mod reserved;
pub mod validate;

pub use self::{planner::NodePlanner, validate::MaskValidation};

use self::{
    explicit::BindStringError,
    granularity::Granularity,
    policy::TaskDistribution,
    reserved::ReservedPus,
};
use crate::{
    cpu::{binding::CpuBindingError, cpuset::CpuSet},
    object::{types::ObjectType, TopologyObject},
    topology::Topology,
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::cmp::Ordering;
use thiserror::Error;

/// Outcome of placing one task
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TaskAffinity {
    /// The task is not bound and may run on any allowed CPU
    Unbound(UnboundReason),

    /// The task was bound by a distribution engine
    Distributed(CpuSet),

    /// The task was bound according to an explicit bind string
    Explicit {
        /// CPUs that the task is bound to
        cpuset: CpuSet,

        /// How the decoded mask was adjusted to fit the allowed CPUs
        validation: MaskValidation,
    },
}
//
impl TaskAffinity {
    /// CPUs that the task should be bound to, if any
    pub fn cpuset(&self) -> Option<&CpuSet> {
        match self {
            Self::Unbound(_) => None,
            Self::Distributed(cpuset) | Self::Explicit { cpuset, .. } => Some(cpuset),
        }
    }
}

/// Reason why tasks are left unbound
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum UnboundReason {
    /// The user explicitly asked for no binding
    NoneRequested,

    /// The only suitable granularity is the whole machine
    MachineGranularity,

    /// Not enough objects to give every required CPU its own object
    NotEnoughObjects {
        /// Type of the selected binding objects
        object_type: ObjectType,

        /// Number of such objects on the node
        available: usize,

        /// Number of CPUs that the tasks need
        required: usize,
    },
}

/// Node-wide task placement failure
///
/// When this happens, no other task of the node can be placed either.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum PlacementError {
    /// The first object of the first socket could not be found
    #[error("failed to enumerate {object_type} objects of {socket_type} #0")]
    EnumerationFailed {
        /// Type of objects acting as sockets
        socket_type: ObjectType,

        /// Type of objects that tasks are bound to
        object_type: ObjectType,
    },

    /// The distribution engine went through the node too many times without
    /// finding enough CPUs for a task
    #[error(
        "no room for task {task} after {passes} passes of {distribution} distribution, \
         partial CPU set was {partial}"
    )]
    LoopExhausted {
        /// Task that could not be placed
        task: usize,

        /// Number of passes through the node
        passes: usize,

        /// Requested distribution
        distribution: TaskDistribution,

        /// CPUs that had been gathered for the task so far
        partial: CpuSet,
    },
}

/// Failure to place or bind one task
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TaskAffinityError {
    /// Node-wide placement failure
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// The explicit bind string could not be decoded for this task
    #[error("invalid bind string for task {task}")]
    BindString {
        /// Task whose field was being decoded
        task: usize,

        /// What went wrong
        #[source]
        source: BindStringError,
    },

    /// The operating system refused to install the task's affinity
    #[error("failed to bind task {task} to CPUs {cpuset}")]
    Binding {
        /// Task that was being bound
        task: usize,

        /// CPUs that the task should have been bound to
        cpuset: CpuSet,

        /// What went wrong
        #[source]
        source: CpuBindingError,
    },
}
//
impl TaskAffinityError {
    /// Truth that this error prevents the placement of every task of the node
    pub fn is_node_fatal(&self) -> bool {
        matches!(self, Self::Placement(_))
    }
}

/// Source of CPU sets for consecutive tasks of a node
///
/// Each call to `next_task()` returns the CPUs of the next task, starting
/// with task 0. Implementations keep their traversal state between calls, so
/// placing a whole node costs a single traversal.
pub(crate) trait Distributor {
    /// Compute the CPU set of the next task
    fn next_task(&mut self) -> Result<CpuSet, PlacementError>;
}

/// Node-wide state shared by the distribution engines
#[derive(Clone, Debug)]
pub(crate) struct PlacementContext<'a> {
    /// Topology of the node
    pub(crate) topology: &'a Topology,

    /// Selected binding granularity
    pub(crate) granularity: Granularity,

    /// Object type that task CPU sets are widened to
    pub(crate) requested_type: ObjectType,

    /// Object type acting as sockets
    pub(crate) socket_type: ObjectType,

    /// Number of CPUs of each task
    pub(crate) cpus_per_task: usize,

    /// Reserved PUs
    pub(crate) reserved: &'a ReservedPus,

    /// Requested distribution
    pub(crate) distribution: TaskDistribution,

    /// Truth that explanations should be logged at the INFO level
    pub(crate) verbose: bool,
}
//
impl PlacementContext<'_> {
    /// Number of objects that each task gets
    ///
    /// Tasks get one object per CPU at core or PU granularity, and a single
    /// object at coarser granularities.
    pub(crate) fn units_per_task(&self) -> usize {
        if self.granularity.is_core_or_finer(self.topology) {
            self.cpus_per_task.max(1)
        } else {
            1
        }
    }

    /// Truth that `object` has CPUs that tasks may use
    ///
    /// Objects with no allowed CPU are unusable, and so are objects whose
    /// allowed CPUs are all reserved.
    pub(crate) fn usable(&self, object: &TopologyObject) -> bool {
        let mut available = object.cpuset() & self.topology.allowed_cpuset();
        available -= self.reserved.cpuset();
        !available.is_empty()
    }

    /// Add the allowed CPUs of `object` to `cpuset`
    ///
    /// If the requested object type is coarser than the granularity, the
    /// enclosing object of the requested type is added instead.
    pub(crate) fn add_object_cpuset(&self, object: &TopologyObject, cpuset: &mut CpuSet) {
        let topology = self.topology;
        let mut target = object;
        if topology.compare_types(object.object_type(), self.requested_type) == Ordering::Greater {
            if let Some(ancestor) = topology.ancestors(object).find(|ancestor| {
                topology.compare_types(ancestor.object_type(), self.requested_type)
                    != Ordering::Greater
            }) {
                target = ancestor;
            }
        }
        *cpuset |= target.cpuset() & topology.allowed_cpuset();
    }

    /// Remove reserved CPUs from the final CPU set of a task
    pub(crate) fn finish(&self, mut cpuset: CpuSet) -> CpuSet {
        cpuset -= self.reserved.cpuset();
        cpuset
    }
}
