//! Implementation of bitmap newtypes ([`CpuSet`] and [`PuSet`])

#[cfg(doc)]
use crate::{cpu::cpuset::CpuSet, placement::reserved::PuSet};

/// Implement a specialized bitmap
///
/// Declares `pub struct $newtype(Bitmap)` with the provided attributes, and
/// re-exports the [`Bitmap`] API and operators on it.
///
/// [`Bitmap`]: crate::bitmap::Bitmap
#[macro_export]
#[doc(hidden)]
macro_rules! impl_bitmap_newtype {
    (
        $(#[$attr:meta])*
        $newtype:ident
    ) => {
        $crate::impl_bitmap_newtype!(
            $(#[$attr])*
            { $newtype => bitmap_newtype }
        );
    };
    (
        $(#[$attr:meta])*
        { $newtype:ident => $mod_name:ident }
    ) => {
        #[allow(unused_imports)]
        mod $mod_name {
            use super::*;
            use $crate::bitmap::{Bitmap, Iter, ParseBitmapError};
            use derive_more::{AsMut, AsRef, From, Into};
            #[cfg(test)]
            use similar_asserts::assert_eq;
            use std::{
                borrow::{Borrow, BorrowMut},
                fmt::{self, Debug, Display, Formatter},
                ops::{
                    BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign,
                    RangeBounds, Sub, SubAssign,
                },
                str::FromStr,
            };

            $(#[$attr])*
            #[derive(
                AsMut,
                AsRef,
                Clone,
                Default,
                Eq,
                From,
                Hash,
                Into,
                Ord,
                PartialEq,
                PartialOrd,
            )]
            pub struct $newtype(Bitmap);

            /// # Re-export of the Bitmap API
            ///
            /// Only documentation headers are repeated here, you will find most of
            /// the documentation attached to identically named `Bitmap` methods.
            impl $newtype {
                /// Creates an empty bitmap
                ///
                /// See [`Bitmap::new`](crate::bitmap::Bitmap::new).
                pub fn new() -> Self {
                    Self(Bitmap::new())
                }

                /// Creates a new bitmap with the given range of indices set
                ///
                /// See [`Bitmap::from_range`](crate::bitmap::Bitmap::from_range).
                pub fn from_range(range: impl RangeBounds<usize>) -> Self {
                    Self(Bitmap::from_range(range))
                }

                /// Clear all indices
                ///
                /// See [`Bitmap::clear`](crate::bitmap::Bitmap::clear).
                pub fn clear(&mut self) {
                    self.0.clear()
                }

                /// Clear all indices except for `idx`, which is set
                ///
                /// See [`Bitmap::set_only`](crate::bitmap::Bitmap::set_only).
                pub fn set_only(&mut self, idx: usize) {
                    self.0.set_only(idx)
                }

                /// Set index `idx`
                ///
                /// See [`Bitmap::set`](crate::bitmap::Bitmap::set).
                pub fn set(&mut self, idx: usize) {
                    self.0.set(idx)
                }

                /// Set indices covered by `range`
                ///
                /// See [`Bitmap::set_range`](crate::bitmap::Bitmap::set_range).
                pub fn set_range(&mut self, range: impl RangeBounds<usize>) {
                    self.0.set_range(range)
                }

                /// Clear index `idx`
                ///
                /// See [`Bitmap::unset`](crate::bitmap::Bitmap::unset).
                pub fn unset(&mut self, idx: usize) {
                    self.0.unset(idx)
                }

                /// Clear indices covered by `range`
                ///
                /// See [`Bitmap::unset_range`](crate::bitmap::Bitmap::unset_range).
                pub fn unset_range(&mut self, range: impl RangeBounds<usize>) {
                    self.0.unset_range(range)
                }

                /// Check if index `idx` is set
                ///
                /// See [`Bitmap::is_set`](crate::bitmap::Bitmap::is_set).
                pub fn is_set(&self, idx: usize) -> bool {
                    self.0.is_set(idx)
                }

                /// Check if all indices are unset
                ///
                /// See [`Bitmap::is_empty`](crate::bitmap::Bitmap::is_empty).
                pub fn is_empty(&self) -> bool {
                    self.0.is_empty()
                }

                /// Check the first set index, if any
                ///
                /// See [`Bitmap::first_set`](crate::bitmap::Bitmap::first_set).
                pub fn first_set(&self) -> Option<usize> {
                    self.0.first_set()
                }

                /// Iterate over set indices
                ///
                /// See [`Bitmap::iter_set`](crate::bitmap::Bitmap::iter_set).
                pub fn iter_set(&self) -> Iter<'_> {
                    self.0.iter_set()
                }

                /// Check the last set index, if any
                ///
                /// See [`Bitmap::last_set`](crate::bitmap::Bitmap::last_set).
                pub fn last_set(&self) -> Option<usize> {
                    self.0.last_set()
                }

                /// The number of indices that are set in the bitmap
                ///
                /// See [`Bitmap::weight`](crate::bitmap::Bitmap::weight).
                pub fn weight(&self) -> usize {
                    self.0.weight()
                }

                /// Truth that `self` and `rhs` have some set indices in common
                ///
                /// See [`Bitmap::intersects`](crate::bitmap::Bitmap::intersects).
                pub fn intersects(&self, rhs: &Self) -> bool {
                    self.0.intersects(&rhs.0)
                }

                /// Truth that the indices set in `inner` are a subset of those set in `self`
                ///
                /// See [`Bitmap::includes`](crate::bitmap::Bitmap::includes).
                pub fn includes(&self, inner: &Self) -> bool {
                    self.0.includes(&inner.0)
                }

                /// Render as a hexadecimal mask
                ///
                /// See [`Bitmap::to_hex_string`](crate::bitmap::Bitmap::to_hex_string).
                pub fn to_hex_string(&self) -> String {
                    self.0.to_hex_string()
                }

                /// Parse a hexadecimal mask
                ///
                /// See [`Bitmap::from_hex_str`](crate::bitmap::Bitmap::from_hex_str).
                pub fn from_hex_str(s: &str) -> Result<Self, ParseBitmapError> {
                    Bitmap::from_hex_str(s).map(Self)
                }
            }

            #[cfg(any(test, feature = "proptest"))]
            impl proptest::prelude::Arbitrary for $newtype {
                type Parameters = <Bitmap as proptest::prelude::Arbitrary>::Parameters;
                type Strategy = proptest::strategy::Map<
                    <Bitmap as proptest::prelude::Arbitrary>::Strategy,
                    fn(Bitmap) -> Self,
                >;

                fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
                    use proptest::prelude::*;
                    <Bitmap as Arbitrary>::arbitrary_with(args).prop_map(Self as fn(Bitmap) -> Self)
                }
            }

            impl<B: Borrow<$newtype>> BitAnd<B> for &$newtype {
                type Output = $newtype;

                fn bitand(self, rhs: B) -> $newtype {
                    $newtype(&self.0 & &rhs.borrow().0)
                }
            }

            impl<B: Borrow<Self>> BitAnd<B> for $newtype {
                type Output = Self;

                fn bitand(self, rhs: B) -> Self {
                    &self & rhs
                }
            }

            impl<B: Borrow<Self>> BitAndAssign<B> for $newtype {
                fn bitand_assign(&mut self, rhs: B) {
                    self.0 &= &rhs.borrow().0
                }
            }

            impl<B: Borrow<$newtype>> BitOr<B> for &$newtype {
                type Output = $newtype;

                fn bitor(self, rhs: B) -> $newtype {
                    $newtype(&self.0 | &rhs.borrow().0)
                }
            }

            impl<B: Borrow<Self>> BitOr<B> for $newtype {
                type Output = Self;

                fn bitor(self, rhs: B) -> Self {
                    &self | rhs
                }
            }

            impl<B: Borrow<Self>> BitOrAssign<B> for $newtype {
                fn bitor_assign(&mut self, rhs: B) {
                    self.0 |= &rhs.borrow().0
                }
            }

            impl<B: Borrow<$newtype>> BitXor<B> for &$newtype {
                type Output = $newtype;

                fn bitxor(self, rhs: B) -> $newtype {
                    $newtype(&self.0 ^ &rhs.borrow().0)
                }
            }

            impl<B: Borrow<Self>> BitXor<B> for $newtype {
                type Output = Self;

                fn bitxor(self, rhs: B) -> Self {
                    &self ^ rhs
                }
            }

            impl<B: Borrow<Self>> BitXorAssign<B> for $newtype {
                fn bitxor_assign(&mut self, rhs: B) {
                    self.0 ^= &rhs.borrow().0
                }
            }

            impl Borrow<Bitmap> for $newtype {
                fn borrow(&self) -> &Bitmap {
                    &self.0
                }
            }

            impl BorrowMut<Bitmap> for $newtype {
                fn borrow_mut(&mut self) -> &mut Bitmap {
                    &mut self.0
                }
            }

            impl Debug for $newtype {
                fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:?})", stringify!($newtype), &self.0)
                }
            }

            impl Display for $newtype {
                fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                    Display::fmt(&self.0, f)
                }
            }

            impl<BI: Borrow<usize>> Extend<BI> for $newtype {
                fn extend<T: IntoIterator<Item = BI>>(&mut self, iter: T) {
                    self.0.extend(iter)
                }
            }

            impl From<usize> for $newtype {
                fn from(value: usize) -> Self {
                    Self(Bitmap::from(value))
                }
            }

            impl<BI: Borrow<usize>> FromIterator<BI> for $newtype {
                fn from_iter<I: IntoIterator<Item = BI>>(iter: I) -> Self {
                    Self(Bitmap::from_iter(iter))
                }
            }

            impl FromStr for $newtype {
                type Err = ParseBitmapError;

                fn from_str(s: &str) -> Result<Self, ParseBitmapError> {
                    s.parse().map(Self)
                }
            }

            impl<'bitmap> IntoIterator for &'bitmap $newtype {
                type Item = usize;
                type IntoIter = Iter<'bitmap>;

                fn into_iter(self) -> Self::IntoIter {
                    self.0.iter_set()
                }
            }

            impl<B: Borrow<$newtype>> Sub<B> for &$newtype {
                type Output = $newtype;

                fn sub(self, rhs: B) -> $newtype {
                    $newtype(&self.0 - &rhs.borrow().0)
                }
            }

            impl<B: Borrow<Self>> Sub<B> for $newtype {
                type Output = Self;

                fn sub(self, rhs: B) -> Self {
                    &self - rhs
                }
            }

            impl<B: Borrow<Self>> SubAssign<B> for $newtype {
                fn sub_assign(&mut self, rhs: B) {
                    self.0 -= &rhs.borrow().0
                }
            }

        }
        pub use $mod_name::$newtype;
    };
}
