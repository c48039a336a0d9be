//! Topology-aware CPU affinity for the tasks of a parallel job step
//!
//! When a job step launches several tasks on a compute node, each task should
//! usually run on its own set of CPUs, chosen according to the hardware
//! topology of the node and to the user's binding and distribution requests.
//! This crate computes those CPU sets and installs them as the CPU affinity
//! of the task processes.
//!
//! # Usage
//!
//! - Describe the node with a [`Topology`], e.g. from a synthetic description
//!   like `"pack:2 core:8 pu:2"`.
//! - Describe the job step with a [`StepLayout`]: number of tasks, CPUs per
//!   task, requested [distribution](placement::policy::TaskDistribution) and
//!   [binding](placement::policy::CpuBindType).
//! - Set up a [`NodePlanner`], which selects the binding granularity and
//!   reserves specialized threads once for the whole node.
//! - Ask the planner for the [`TaskAffinity`] of each task, or let it bind
//!   task processes directly with [`NodePlanner::bind_tasks()`].
//!
//! ```
//! use taskbind::{
//!     placement::{
//!         policy::{NodeDistribution, PlacementFlags, SubDistribution, TaskDistribution},
//!         TaskAffinity,
//!     },
//!     CpuSet, NodePlanner, StepLayout, Topology,
//! };
//!
//! let topology = Topology::from_synthetic("pack:2 core:4 pu:2")?;
//! let layout = StepLayout::new(4, 2).with_distribution(
//!     TaskDistribution::new(NodeDistribution::Block).with_socket(SubDistribution::Block),
//! );
//! let planner = NodePlanner::new(&topology, layout, PlacementFlags::empty());
//! for (task, affinity) in planner.task_affinities()?.into_iter().enumerate() {
//!     // Each task gets two whole cores
//!     let first_pu = 4 * task;
//!     assert_eq!(
//!         affinity?,
//!         TaskAffinity::Distributed(CpuSet::from_range(first_pu..first_pu + 4))
//!     );
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Placement decisions are reported through [`tracing`] events. They are
//! emitted at the DEBUG level, or at the INFO level when verbose binding
//! reports were requested.

pub mod bitmap;
pub mod cpu;
pub mod errors;
pub mod object;
pub mod placement;
#[cfg(test)]
pub(crate) mod strategies;
pub mod topology;

pub use self::{
    cpu::{binding::ProcessId, cpuset::CpuSet},
    placement::{policy::StepLayout, NodePlanner, TaskAffinity},
    topology::Topology,
};
