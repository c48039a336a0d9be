//! CPU sets
//!
//! These specialized bitmaps represent sets of logical CPU cores, as exposed by
//! the underlying operating system. The logical cores may map into either
//! full-blown hardware CPU cores or SMT threads thereof, depending on the
//! hardware and operating system configuration.
//!
//! They are the currency of task placement: topology objects expose the set
//! of CPUs below them as a [`CpuSet`], and every task affinity produced by
//! this crate is a [`CpuSet`].

#[cfg(doc)]
use crate::bitmap::Bitmap;
use crate::impl_bitmap_newtype;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Highest number of CPUs that an affinity mask can address
///
/// This matches the width of the glibc `cpu_set_t` (`CPU_SETSIZE`), which
/// is what the affinity syscalls accept.
pub const MAX_CPUS: usize = 1024;

/// # Affinity mask helpers
//
// --- Implementation details ---
//
// This goes before the main impl_bitmap_newtype macro so that it appears before
// the bitmap API reexport in rustdoc.
impl CpuSet {
    /// Truth that every CPU in this set can be addressed by an affinity mask
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::cpu::cpuset::{CpuSet, MAX_CPUS};
    ///
    /// assert!(CpuSet::from_range(0..MAX_CPUS).fits_affinity_mask());
    /// assert!(!CpuSet::from(MAX_CPUS).fits_affinity_mask());
    /// ```
    pub fn fits_affinity_mask(&self) -> bool {
        self.last_set().map_or(true, |last| last < MAX_CPUS)
    }
}

impl_bitmap_newtype!(
    /// [`Bitmap`] whose bits are set according to CPU physical OS indexes
    ///
    /// A `CpuSet` represents a set of logical CPU cores, as exposed by the
    /// underlying operating system. These logical cores may map into either
    /// complete hardware CPU cores or SMT threads thereof
    /// (aka "hyper-threads") depending on the underlying hardware and OS
    /// configuration.
    #[doc(alias = "cpu_set_t")]
    CpuSet
);
