//! CPU binding
//!
//! Installing the CPU set computed for a task as the CPU affinity of its
//! process, and reading it back.
//!
//! Most operating systems only allow Rust code to manipulate the CPU affinity
//! of whole processes or individual threads through OS-specific APIs. This
//! module wraps the Linux `sched_setaffinity()` and `sched_getaffinity()`
//! system calls, and reports [`CpuBindingError::Unsupported`] elsewhere.

use super::cpuset::{CpuSet, MAX_CPUS};
use crate::errors::RawOsError;
#[cfg(target_os = "linux")]
use crate::errors;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
#[cfg(target_os = "linux")]
use std::ffi::c_int;
use thiserror::Error;

/// Process identifier
///
/// The special value 0 designates the calling thread.
pub type ProcessId = libc::pid_t;

/// Bind a process, identified by its `pid`, on the given CPUs
///
/// # Errors
///
/// - [`BadObject`] if the process does not exist
/// - [`PermissionDenied`] if the caller may not change the binding of this
///   process
/// - [`BadCpuSet`] if the process cannot be bound to these CPUs, which
///   happens when `set` is empty or contains no CPU of the machine
/// - [`CpuOutOfRange`] if `set` contains a CPU number that does not fit in an
///   affinity mask
/// - [`Unsupported`] on operating systems other than Linux
///
/// [`BadCpuSet`]: CpuBindingError::BadCpuSet
/// [`BadObject`]: CpuBindingError::BadObject
/// [`CpuOutOfRange`]: CpuBindingError::CpuOutOfRange
/// [`PermissionDenied`]: CpuBindingError::PermissionDenied
/// [`Unsupported`]: CpuBindingError::Unsupported
#[doc(alias = "sched_setaffinity")]
pub fn bind_process_cpu(pid: ProcessId, set: &CpuSet) -> Result<(), CpuBindingError> {
    if let Some(cpu) = set.last_set().filter(|&cpu| cpu >= MAX_CPUS) {
        return Err(CpuBindingError::CpuOutOfRange { cpu });
    }
    #[cfg(target_os = "linux")]
    {
        let raw = linux::to_raw(set);
        // SAFETY: - raw is a valid cpu_set_t that outlives the call
        //         - The size passed along is that of raw
        //         - PID cannot be validated (think TOCTOU), but the kernel
        //           reports unknown processes through errno
        call_affinity("sched_setaffinity", pid, Some(set), || unsafe {
            libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &raw)
        })
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        Err(CpuBindingError::Unsupported)
    }
}

/// Get the current CPU binding of a process, identified by its `pid`
///
/// # Errors
///
/// - [`BadObject`] if the process does not exist
/// - [`PermissionDenied`] if the caller may not query the binding of this
///   process
/// - [`Unsupported`] on operating systems other than Linux
///
/// [`BadObject`]: CpuBindingError::BadObject
/// [`PermissionDenied`]: CpuBindingError::PermissionDenied
/// [`Unsupported`]: CpuBindingError::Unsupported
#[doc(alias = "sched_getaffinity")]
pub fn process_cpu_binding(pid: ProcessId) -> Result<CpuSet, CpuBindingError> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: cpu_set_t is a plain bitmask, for which all-zeroes is valid
        let mut raw: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        // SAFETY: - raw is an exclusively borrowed cpu_set_t
        //         - The size passed along is that of raw, so the kernel
        //           only writes within its bounds
        //         - PID cannot be validated (think TOCTOU), but the kernel
        //           reports unknown processes through errno
        call_affinity("sched_getaffinity", pid, None, || unsafe {
            libc::sched_getaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &mut raw)
        })?;
        Ok(linux::from_raw(&raw))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        Err(CpuBindingError::Unsupported)
    }
}

/// Errors that can occur when binding processes to CPU sets
#[derive(Clone, Debug, Error, Eq, Hash, PartialEq)]
pub enum CpuBindingError {
    /// The target process does not exist
    #[error("process {0} does not exist")]
    BadObject(ProcessId),

    /// The caller is not allowed to query or change the binding of this
    /// process
    #[error("not allowed to manipulate the CPU binding of process {0}")]
    PermissionDenied(ProcessId),

    /// Cannot bind the target process to the requested CPU set
    #[error("cannot bind process {0} to CPUs {1}")]
    BadCpuSet(ProcessId, CpuSet),

    /// The CPU set contains a CPU that does not fit in an affinity mask
    #[error("CPU {cpu} is beyond the affinity mask limit of {} CPUs", MAX_CPUS)]
    CpuOutOfRange {
        /// Offending CPU number
        cpu: usize,
    },

    /// CPU binding is not supported on this operating system
    #[error("CPU binding is not supported on this platform")]
    Unsupported,

    /// Unexpected system call error
    #[error(transparent)]
    Unexpected(#[from] RawOsError),
}

/// Call an affinity system call, translate known errors into higher-level
/// `CpuBindingError`s
#[cfg(target_os = "linux")]
fn call_affinity(
    api: &'static str,
    pid: ProcessId,
    cpuset: Option<&CpuSet>,
    call: impl FnOnce() -> c_int,
) -> Result<(), CpuBindingError> {
    match errors::call_libc_int(api, call) {
        Ok(_) => Ok(()),
        Err(raw_err) => match (raw_err.errno.map(|errno| errno.0), cpuset) {
            (Some(libc::ESRCH), _) => Err(CpuBindingError::BadObject(pid)),
            (Some(libc::EPERM), _) => Err(CpuBindingError::PermissionDenied(pid)),
            (Some(libc::EINVAL), Some(cpuset)) => {
                Err(CpuBindingError::BadCpuSet(pid, cpuset.clone()))
            }
            _ => Err(CpuBindingError::Unexpected(raw_err)),
        },
    }
}

/// Conversions between [`CpuSet`] and `cpu_set_t`
#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    /// Convert a CPU set into a `cpu_set_t`
    ///
    /// CPUs beyond [`MAX_CPUS`] must have been rejected beforehand.
    pub(super) fn to_raw(set: &CpuSet) -> libc::cpu_set_t {
        // SAFETY: cpu_set_t is a plain bitmask, for which all-zeroes is valid
        let mut raw: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for cpu in set.iter_set().take_while(|&cpu| cpu < MAX_CPUS) {
            // SAFETY: cpu is within the bounds of cpu_set_t
            unsafe { libc::CPU_SET(cpu, &mut raw) };
        }
        raw
    }

    /// Convert a `cpu_set_t` into a CPU set
    pub(super) fn from_raw(raw: &libc::cpu_set_t) -> CpuSet {
        // SAFETY: every index is within the bounds of cpu_set_t
        (0..MAX_CPUS)
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, raw) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use static_assertions::assert_impl_all;

    assert_impl_all!(CpuBindingError: Clone, std::error::Error, Send, Sync);

    #[test]
    fn out_of_range() {
        let set = CpuSet::from(MAX_CPUS);
        assert_eq!(
            bind_process_cpu(0, &set),
            Err(CpuBindingError::CpuOutOfRange { cpu: MAX_CPUS })
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn raw_conversions() {
        let set = CpuSet::from_iter([0usize, 3, 64, MAX_CPUS - 1]);
        assert_eq!(linux::from_raw(&linux::to_raw(&set)), set);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn bind_self() {
        let current = process_cpu_binding(0).unwrap();
        assert!(!current.is_empty());
        bind_process_cpu(0, &current).unwrap();
        assert_eq!(process_cpu_binding(0).unwrap(), current);

        assert_eq!(
            bind_process_cpu(0, &CpuSet::new()),
            Err(CpuBindingError::BadCpuSet(0, CpuSet::new()))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_process() {
        assert_eq!(
            process_cpu_binding(ProcessId::MAX),
            Err(CpuBindingError::BadObject(ProcessId::MAX))
        );
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn unsupported() {
        assert_eq!(process_cpu_binding(0), Err(CpuBindingError::Unsupported));
        assert_eq!(
            bind_process_cpu(0, &CpuSet::from(0)),
            Err(CpuBindingError::Unsupported)
        );
    }
}
