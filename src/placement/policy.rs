//! Placement policies
//!
//! This module holds the description of what a job step asks for: how many
//! tasks run on the node and how many CPUs each of them needs
//! ([`StepLayout`]), how tasks should be spread across the machine
//! ([`TaskDistribution`]), which binding the user requested
//! ([`CpuBindType`]) and node-wide configuration ([`PlacementFlags`]).

use bitflags::bitflags;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::fmt::{self, Display};

bitflags! {
    /// Requested CPU binding
    ///
    /// These flags combine an explicit binding kind (at most one of `NONE`,
    /// `RANK`, `MASK`, `MAP`, `LDMASK`, `LDRANK` and `LDMAP`), an optional
    /// binding target (`TO_THREADS`, `TO_CORES`, `TO_SOCKETS`, `TO_LDOMS`,
    /// `TO_BOARDS`) and the `VERBOSE` reporting flag.
    ///
    /// If several explicit kinds are set, the first one in the above list
    /// wins.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    #[doc(alias = "cpu_bind_type_t")]
    pub struct CpuBindType: u32 {
        /// Explicitly request no binding at all
        const NONE = 1 << 0;

        /// Bind each task to the CPU matching its node-local rank
        const RANK = 1 << 1;

        /// Bind each task to a user-provided hexadecimal CPU mask
        const MASK = 1 << 2;

        /// Bind each task to a user-provided CPU number
        const MAP = 1 << 3;

        /// Bind each task to the locality domains of a user-provided
        /// hexadecimal mask
        const LDMASK = 1 << 4;

        /// Bind each task to the locality domain matching its node-local rank
        const LDRANK = 1 << 5;

        /// Bind each task to a user-provided locality domain number
        const LDMAP = 1 << 6;

        /// Bind tasks to hardware threads
        const TO_THREADS = 1 << 7;

        /// Bind tasks to whole cores
        const TO_CORES = 1 << 8;

        /// Bind tasks to whole sockets
        const TO_SOCKETS = 1 << 9;

        /// Bind tasks to whole locality domains
        const TO_LDOMS = 1 << 10;

        /// Bind tasks to whole boards
        const TO_BOARDS = 1 << 11;

        /// Report placement decisions at the INFO level
        const VERBOSE = 1 << 12;
    }
}
//
impl CpuBindType {
    /// Truth that an explicit binding kind was requested
    pub fn is_explicit(self) -> bool {
        self.intersects(
            Self::NONE
                | Self::RANK
                | Self::MASK
                | Self::MAP
                | Self::LDMASK
                | Self::LDRANK
                | Self::LDMAP,
        )
    }

    /// Truth that an explicit locality domain binding kind was requested
    pub fn is_ldom_mode(self) -> bool {
        self.intersects(Self::LDMASK | Self::LDRANK | Self::LDMAP)
    }
}

/// Distribution of tasks across nodes and sockets
///
/// Only the distribution within the node matters for placement, but the
/// first level decides which distribution engine is used when no socket
/// level distribution is specified.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum NodeDistribution {
    /// Consecutive tasks go to the same node
    Block,

    /// Consecutive tasks go to different nodes
    Cyclic,

    /// Tasks are distributed in blocks of a given size
    Plane,

    /// Tasks are placed according to a user-provided host list
    Arbitrary,

    /// No distribution was specified
    Unknown,
}

/// Distribution of tasks across the sockets or cores of a node
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum SubDistribution {
    /// Fill one socket/core before moving to the next one
    Block,

    /// Move to the next socket/core for each task
    Cyclic,

    /// Move to the next socket/core for each CPU of each task
    FullCyclic,
}

/// Requested task distribution policy
///
/// Displayed in the `node:socket:core` form of the `--distribution` option,
/// e.g. `block:cyclic:fcyclic`.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct TaskDistribution {
    /// Distribution across nodes
    pub node: NodeDistribution,

    /// Distribution across sockets, if specified
    pub socket: Option<SubDistribution>,

    /// Distribution across cores, if specified
    pub core: Option<SubDistribution>,
}
//
impl TaskDistribution {
    /// Distribution with only the node level specified
    pub fn new(node: NodeDistribution) -> Self {
        Self {
            node,
            socket: None,
            core: None,
        }
    }

    /// Specify the distribution across sockets
    pub fn with_socket(mut self, socket: SubDistribution) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Specify the distribution across cores
    pub fn with_core(mut self, core: SubDistribution) -> Self {
        self.core = Some(core);
        self
    }

    /// Distribution engine that handles this policy
    ///
    /// Block distribution within sockets and plane distribution use the block
    /// engine. Plain node-level policies use the block engine if
    /// [`PlacementFlags::DEFAULT_DIST_BLOCK`] is set, and the cyclic engine
    /// otherwise. Everything else uses the cyclic engine.
    pub fn engine(self, flags: PlacementFlags) -> DistributionEngine {
        let default = if flags.contains(PlacementFlags::DEFAULT_DIST_BLOCK) {
            DistributionEngine::Block
        } else {
            DistributionEngine::Cyclic
        };
        match (self.node, self.socket) {
            (NodeDistribution::Plane, _) => DistributionEngine::Block,
            (NodeDistribution::Arbitrary | NodeDistribution::Unknown, _) => default,
            (_, Some(SubDistribution::Block)) => DistributionEngine::Block,
            (_, None) => default,
            (_, Some(_)) => DistributionEngine::Cyclic,
        }
    }
}
//
impl Default for TaskDistribution {
    fn default() -> Self {
        Self::new(NodeDistribution::Unknown)
    }
}
//
impl Display for TaskDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = match self.node {
            NodeDistribution::Block => "block",
            NodeDistribution::Cyclic => "cyclic",
            NodeDistribution::Plane => "plane",
            NodeDistribution::Arbitrary => "arbitrary",
            NodeDistribution::Unknown => "unknown",
        };
        let sub = |sub: SubDistribution| match sub {
            SubDistribution::Block => "block",
            SubDistribution::Cyclic => "cyclic",
            SubDistribution::FullCyclic => "fcyclic",
        };
        f.write_str(node)?;
        match (self.socket, self.core) {
            (None, None) => Ok(()),
            (Some(socket), None) => write!(f, ":{}", sub(socket)),
            (socket, Some(core)) => write!(
                f,
                ":{}:{}",
                socket.map_or("*", sub),
                sub(core)
            ),
        }
    }
}

/// Algorithm used to distribute tasks over the objects of a node
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum DistributionEngine {
    /// Tasks get consecutive objects
    Block,

    /// Tasks are spread round-robin across sockets
    Cyclic,
}

bitflags! {
    /// Node-wide placement configuration
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    pub struct PlacementFlags: u32 {
        /// Treat L3 caches as sockets
        ///
        /// Useful on machines where a package holds several L3 domains that
        /// should be treated as separate sockets.
        const L3CACHE_AS_SOCKET = 1 << 0;

        /// Use block distribution when the user did not request a socket-level
        /// distribution
        const DEFAULT_DIST_BLOCK = 1 << 1;

        /// Report placement decisions at the INFO level for every step
        const VERBOSE = 1 << 2;
    }
}

/// Core specialization of a job step
///
/// Specialized cores and threads are withheld from the job for system use.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum CoreSpecialization {
    /// No specialization
    #[default]
    None,

    /// This many cores are specialized
    ///
    /// Specialized cores are already removed from the allowed CPU set, so
    /// placement does not need to handle them.
    Cores(usize),

    /// This many hardware threads are specialized
    Threads(usize),
}
//
impl CoreSpecialization {
    /// Number of PUs that placement must withhold
    pub fn reserved_threads(self) -> usize {
        match self {
            Self::Threads(count) => count,
            Self::None | Self::Cores(_) => 0,
        }
    }
}

/// Shape of a job step on the local node
///
/// # Examples
///
/// ```
/// use taskbind::placement::policy::{
///     CpuBindType, NodeDistribution, StepLayout, SubDistribution, TaskDistribution,
/// };
///
/// let layout = StepLayout::new(4, 2)
///     .with_distribution(
///         TaskDistribution::new(NodeDistribution::Block).with_socket(SubDistribution::Cyclic),
///     )
///     .with_cpu_bind(CpuBindType::TO_CORES, None);
/// assert_eq!(layout.required_pus(), 8);
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StepLayout {
    /// Number of tasks of the step on this node
    pub node_tasks: usize,

    /// Number of CPUs that each task needs
    pub cpus_per_task: usize,

    /// Number of CPUs allocated to the step on this node
    pub cpus: usize,

    /// Truth that this is a batch step, which uses all allocated CPUs
    pub batch: bool,

    /// Core specialization
    pub core_spec: CoreSpecialization,

    /// Requested task distribution
    pub distribution: TaskDistribution,

    /// Requested CPU binding
    pub cpu_bind_type: CpuBindType,

    /// Comma-separated list of masks, CPUs or domains for explicit binding
    pub cpu_bind: Option<String>,
}
//
impl StepLayout {
    /// Layout of `node_tasks` tasks with `cpus_per_task` CPUs each
    ///
    /// The number of allocated CPUs defaults to the number of CPUs that the
    /// tasks need.
    pub fn new(node_tasks: usize, cpus_per_task: usize) -> Self {
        Self {
            node_tasks,
            cpus_per_task,
            cpus: node_tasks * cpus_per_task,
            batch: false,
            core_spec: CoreSpecialization::None,
            distribution: TaskDistribution::default(),
            cpu_bind_type: CpuBindType::empty(),
            cpu_bind: None,
        }
    }

    /// Layout of a batch step using `cpus` CPUs
    pub fn batch(cpus: usize) -> Self {
        Self {
            batch: true,
            ..Self::new(1, cpus)
        }
    }

    /// Set the number of allocated CPUs
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    /// Set the core specialization
    pub fn with_core_spec(mut self, core_spec: CoreSpecialization) -> Self {
        self.core_spec = core_spec;
        self
    }

    /// Set the task distribution
    pub fn with_distribution(mut self, distribution: TaskDistribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Set the requested CPU binding and the associated bind list
    pub fn with_cpu_bind(mut self, cpu_bind_type: CpuBindType, cpu_bind: Option<&str>) -> Self {
        self.cpu_bind_type = cpu_bind_type;
        self.cpu_bind = cpu_bind.map(str::to_owned);
        self
    }

    /// Number of PUs that the tasks need in total
    ///
    /// Batch steps need all allocated CPUs.
    pub fn required_pus(&self) -> usize {
        if self.batch {
            self.cpus
        } else {
            self.node_tasks * self.cpus_per_task
        }
    }

    /// Number of CPUs that each task gets
    ///
    /// The single task of a batch step gets all allocated CPUs.
    pub fn effective_cpus_per_task(&self) -> usize {
        if self.batch {
            self.cpus
        } else {
            self.cpus_per_task
        }
    }
}
