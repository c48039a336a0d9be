//! Validation of explicit masks
//!
//! Bind strings are written by users who may not know which CPUs the job step
//! was actually given. Masks are therefore clamped to the allowed CPUs before
//! being installed.

use crate::cpu::cpuset::CpuSet;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// How a mask was adjusted by [`validate_mask()`]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum MaskValidation {
    /// Every CPU of the mask is allowed
    Kept,

    /// Some CPUs of the mask were not allowed and were discarded
    Clamped,

    /// No CPU of the mask was allowed, so the mask was replaced by the full
    /// allowed CPU set
    Replaced,
}

/// Clamp `mask` to the `allowed` CPUs
///
/// CPUs of the mask that are allowed are kept and the others are discarded.
/// If no CPU of the mask is allowed, every allowed CPU is used instead.
///
/// # Examples
///
/// ```
/// use taskbind::{
///     cpu::cpuset::CpuSet,
///     placement::{validate::validate_mask, MaskValidation},
/// };
///
/// let allowed = CpuSet::from_range(0..4);
/// let (cpuset, validation) = validate_mask(&CpuSet::from_range(2..6), &allowed);
/// assert_eq!(cpuset, CpuSet::from_range(2..4));
/// assert_eq!(validation, MaskValidation::Clamped);
/// ```
pub fn validate_mask(mask: &CpuSet, allowed: &CpuSet) -> (CpuSet, MaskValidation) {
    let kept = mask & allowed;
    if kept.is_empty() {
        if !mask.is_empty() {
            tracing::warn!(%mask, %allowed, "no CPU of the mask is allowed, using all allowed CPUs");
        }
        (allowed.clone(), MaskValidation::Replaced)
    } else if kept == *mask {
        (kept, MaskValidation::Kept)
    } else {
        tracing::warn!(%mask, cpuset = %kept, "mask clamped to the allowed CPUs");
        (kept, MaskValidation::Clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn outcomes() {
        let allowed = CpuSet::from_range(4..8);
        assert_eq!(
            validate_mask(&CpuSet::from_range(4..6), &allowed),
            (CpuSet::from_range(4..6), MaskValidation::Kept)
        );
        assert_eq!(
            validate_mask(&CpuSet::from_range(0..6), &allowed),
            (CpuSet::from_range(4..6), MaskValidation::Clamped)
        );
        assert_eq!(
            validate_mask(&CpuSet::from_range(0..4), &allowed),
            (allowed.clone(), MaskValidation::Replaced)
        );
        assert_eq!(
            validate_mask(&CpuSet::new(), &allowed),
            (allowed, MaskValidation::Replaced)
        );
    }

    proptest! {
        #[test]
        fn clamping(mask: CpuSet, allowed: CpuSet) {
            prop_assume!(!allowed.is_empty());
            let (cpuset, validation) = validate_mask(&mask, &allowed);
            prop_assert!(allowed.includes(&cpuset));
            prop_assert!(!cpuset.is_empty());
            match validation {
                MaskValidation::Kept => prop_assert_eq!(&cpuset, &mask),
                MaskValidation::Clamped => {
                    prop_assert_eq!(&cpuset, &(&mask & &allowed));
                    prop_assert!(cpuset != mask);
                }
                MaskValidation::Replaced => {
                    prop_assert!(!mask.intersects(&allowed));
                    prop_assert_eq!(&cpuset, &allowed);
                }
            }
        }
    }
}
