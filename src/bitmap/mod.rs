//! Facilities for manipulating bitmaps
//!
//! # Bitmaps
//!
//! Affinity placement extensively uses bitmaps to model sets of CPUs that
//! tasks can be bound to, and sets of logical processing unit indices that are
//! withheld from task placement.
//!
//! This module provides the untyped [`Bitmap`] container. Placement APIs do
//! not directly accept or emit bitmaps, however. Instead they use specialized
//! variants of [`Bitmap`] called [`CpuSet`] and [`PuSet`].
//!
//! These types are trivial wrappers around [`Bitmap`] that have basically the
//! same API, but provide improved type safety: you cannot use a [`PuSet`]
//! (which holds topology-logical PU indices) where a [`CpuSet`] (which holds
//! operating system CPU numbers) is expected.
//!
//! # Textual representations
//!
//! Bitmaps are displayed in the list format used by `taskset -c`, cpuset
//! cgroups and hwloc, e.g. `0-3,8,10-11`, and can be parsed back from it.
//!
//! They can also be rendered as and parsed from hexadecimal masks (`0x1f`),
//! where the rightmost digit covers indices 0 to 3, the next one indices 4 to
//! 7, and so on. This is the format of user-provided CPU binding masks.
//!
//! [`CpuSet`]: crate::cpu::cpuset::CpuSet
//! [`PuSet`]: crate::placement::reserved::PuSet

pub(crate) mod newtypes;

use bitvec::{order::Lsb0, slice::IterOnes, vec::BitVec};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter, Write},
    iter::FusedIterator,
    ops::{
        BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Bound, RangeBounds, Sub,
        SubAssign,
    },
    str::FromStr,
};
use thiserror::Error;

/// Bit storage of a [`Bitmap`]
type Bits = BitVec<u64, Lsb0>;

/// Lowercase hexadecimal digits, by value
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// A finite set of indices
///
/// Bits are stored in a [`BitVec`]. Storage grows on demand to accommodate the largest set index, and the
/// bitmap never carries trailing unset bits, so two bitmaps with the same
/// indices set always compare equal and hash identically.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct Bitmap {
    /// Bits of the set, least significant index first, ending with the
    /// highest set index
    bits: Bits,
}

impl Bitmap {
    // === Constructors ===

    /// Creates an empty `Bitmap`
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let empty = Bitmap::new();
    /// assert!(empty.is_empty());
    /// ```
    pub fn new() -> Self {
        Self { bits: Bits::new() }
    }

    /// Creates a new `Bitmap` with the given range of indices set
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap = Bitmap::from_range(12..=34);
    /// assert_eq!(format!("{bitmap}"), "12-34");
    /// ```
    ///
    /// # Panics
    ///
    /// If `range` has no upper bound, since bitmaps are finite.
    pub fn from_range(range: impl RangeBounds<usize>) -> Self {
        let mut bitmap = Self::new();
        bitmap.set_range(range);
        bitmap
    }

    // === Getters and setters ===

    /// Clear all indices
    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Clear all indices except for `idx`, which is set
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let mut bitmap = Bitmap::from_range(12..=34);
    /// bitmap.set_only(42);
    /// assert_eq!(format!("{bitmap}"), "42");
    /// ```
    pub fn set_only(&mut self, idx: usize) {
        self.clear();
        self.set(idx);
    }

    /// Set index `idx`
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let mut bitmap = Bitmap::from_range(12..=34);
    /// bitmap.set(42);
    /// assert_eq!(format!("{bitmap}"), "12-34,42");
    /// ```
    pub fn set(&mut self, idx: usize) {
        if idx >= self.bits.len() {
            self.bits.resize(idx + 1, false);
        }
        self.bits.set(idx, true);
    }

    /// Set indices covered by `range`
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let mut bitmap = Bitmap::from_range(12..=56);
    /// bitmap.set_range(34..=78);
    /// assert_eq!(format!("{bitmap}"), "12-78");
    /// ```
    ///
    /// # Panics
    ///
    /// If `range` has no upper bound, since bitmaps are finite.
    pub fn set_range(&mut self, range: impl RangeBounds<usize>) {
        let Some((start, end)) = Self::resolve_range(range) else {
            return;
        };
        if end > self.bits.len() {
            self.bits.resize(end, false);
        }
        self.bits[start..end].fill(true);
    }

    /// Clear index `idx`
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let mut bitmap = Bitmap::from_range(12..=34);
    /// bitmap.unset(24);
    /// assert_eq!(format!("{bitmap}"), "12-23,25-34");
    /// ```
    pub fn unset(&mut self, idx: usize) {
        if idx < self.bits.len() {
            self.bits.set(idx, false);
            self.normalize();
        }
    }

    /// Clear indices covered by `range`
    ///
    /// An unbounded range clears every index from its start onwards.
    pub fn unset_range(&mut self, range: impl RangeBounds<usize>) {
        let len = self.bits.len();
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => len,
        }
        .min(len);
        if start < end {
            self.bits[start..end].fill(false);
            self.normalize();
        }
    }

    /// Check if index `idx` is set
    pub fn is_set(&self, idx: usize) -> bool {
        self.bits.get(idx).is_some_and(|bit| *bit)
    }

    /// Check if all indices are unset
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Check the first set index, if any
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap = Bitmap::from_range(12..=34);
    /// assert_eq!(bitmap.first_set(), Some(12));
    /// ```
    pub fn first_set(&self) -> Option<usize> {
        self.bits.first_one()
    }

    /// Iterate over set indices, in increasing order
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap = Bitmap::from_range(12..=21);
    /// let indices = bitmap.iter_set().collect::<Vec<_>>();
    /// assert_eq!(indices, (12..=21).collect::<Vec<_>>());
    /// ```
    pub fn iter_set(&self) -> Iter<'_> {
        Iter(self.bits.iter_ones())
    }

    /// Check the last set index, if any
    pub fn last_set(&self) -> Option<usize> {
        self.bits.last_one()
    }

    /// The number of indices that are set in the bitmap
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// assert_eq!(Bitmap::new().weight(), 0);
    /// assert_eq!(Bitmap::from_range(12..34).weight(), 22);
    /// ```
    pub fn weight(&self) -> usize {
        self.bits.count_ones()
    }

    // === Set operations ===

    /// Truth that `self` and `rhs` have some set indices in common
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap1 = Bitmap::from_range(12..=34);
    /// let bitmap2 = Bitmap::from_range(56..=78);
    /// assert!(!bitmap1.intersects(&bitmap2));
    ///
    /// let bitmap3 = Bitmap::from_range(34..=56);
    /// assert!(bitmap1.intersects(&bitmap3));
    /// assert!(bitmap2.intersects(&bitmap3));
    /// ```
    pub fn intersects(&self, rhs: &Self) -> bool {
        let len = self.bits.len().min(rhs.bits.len());
        self.bits[..len].iter_ones().any(|idx| rhs.bits[idx])
    }

    /// Truth that the indices set in `inner` are a subset of those set in `self`
    ///
    /// The empty bitmap is considered included in any other bitmap.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap1 = Bitmap::from_range(12..=78);
    /// let bitmap2 = Bitmap::from_range(34..=56);
    /// assert!(bitmap1.includes(&bitmap2));
    /// assert!(!bitmap2.includes(&bitmap1));
    /// ```
    pub fn includes(&self, inner: &Self) -> bool {
        inner.bits.len() <= self.bits.len()
            && inner.bits.iter_ones().all(|idx| self.bits[idx])
    }

    // === Hexadecimal masks ===

    /// Render the bitmap as a hexadecimal mask with a `0x` prefix
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// assert_eq!(Bitmap::new().to_hex_string(), "0x0");
    /// assert_eq!(Bitmap::from_range(0..=4).to_hex_string(), "0x1f");
    /// ```
    pub fn to_hex_string(&self) -> String {
        let mut result = String::from("0x");
        if self.is_empty() {
            result.push('0');
            return result;
        }
        result.extend(self.bits.chunks(4).rev().map(|digit| {
            let value = digit.iter_ones().fold(0, |value, bit| value | (1 << bit));
            char::from(HEX_DIGITS[value])
        }));
        result
    }

    /// Parse a hexadecimal mask, with or without a `0x` prefix
    ///
    /// The rightmost digit covers indices 0 to 3, the digit to its left covers
    /// indices 4 to 7, and so on.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::bitmap::Bitmap;
    ///
    /// let bitmap = Bitmap::from_hex_str("0x30f")?;
    /// assert_eq!(format!("{bitmap}"), "0-3,8-9");
    /// assert_eq!(Bitmap::from_hex_str("30f")?, bitmap);
    /// # Ok::<(), taskbind::bitmap::ParseBitmapError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// - [`ParseBitmapError::Empty`] if there are no digits
    /// - [`ParseBitmapError::InvalidHexDigit`] if a character is not an
    ///   hexadecimal digit
    pub fn from_hex_str(s: &str) -> Result<Self, ParseBitmapError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(ParseBitmapError::Empty);
        }
        let mut bitmap = Self::new();
        for (position, digit) in digits.chars().rev().enumerate() {
            let value = digit
                .to_digit(16)
                .ok_or(ParseBitmapError::InvalidHexDigit(digit))?;
            for bit in (0..4).filter(|bit| value & (1 << bit) != 0) {
                bitmap.set(position * 4 + bit);
            }
        }
        Ok(bitmap)
    }

    // === Implementation details ===

    /// Convert a range into half-open bounds, or `None` if it's empty
    ///
    /// # Panics
    ///
    /// If the range has no upper bound
    fn resolve_range(range: impl RangeBounds<usize>) -> Option<(usize, usize)> {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.checked_add(1)?,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.checked_add(1).expect("Bitmap index overflow"),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => panic!("Bitmaps are finite, ranges must have an upper bound"),
        };
        (start < end).then_some((start, end))
    }

    /// Drop trailing unset bits
    fn normalize(&mut self) {
        let len = self.bits.last_one().map_or(0, |last| last + 1);
        self.bits.truncate(len);
    }

    /// Apply a bitwise binary operation to bit vectors of equal length
    fn combine(&self, rhs: &Self, op: impl FnOnce(&mut Bits, Bits)) -> Self {
        let len = self.bits.len().max(rhs.bits.len());
        let mut lhs = self.bits.clone();
        lhs.resize(len, false);
        let mut rhs = rhs.bits.clone();
        rhs.resize(len, false);
        op(&mut lhs, rhs);
        let mut result = Self { bits: lhs };
        result.normalize();
        result
    }
}

impl<B: Borrow<Bitmap>> BitAnd<B> for &Bitmap {
    type Output = Bitmap;

    fn bitand(self, rhs: B) -> Bitmap {
        self.combine(rhs.borrow(), |lhs, rhs| *lhs &= rhs)
    }
}

impl<B: Borrow<Self>> BitAnd<B> for Bitmap {
    type Output = Self;

    fn bitand(self, rhs: B) -> Self {
        &self & rhs
    }
}

impl<B: Borrow<Self>> BitAndAssign<B> for Bitmap {
    fn bitand_assign(&mut self, rhs: B) {
        *self = &*self & rhs;
    }
}

impl<B: Borrow<Bitmap>> BitOr<B> for &Bitmap {
    type Output = Bitmap;

    fn bitor(self, rhs: B) -> Bitmap {
        self.combine(rhs.borrow(), |lhs, rhs| *lhs |= rhs)
    }
}

impl<B: Borrow<Self>> BitOr<B> for Bitmap {
    type Output = Self;

    fn bitor(self, rhs: B) -> Self {
        &self | rhs
    }
}

impl<B: Borrow<Self>> BitOrAssign<B> for Bitmap {
    fn bitor_assign(&mut self, rhs: B) {
        *self = &*self | rhs;
    }
}

impl<B: Borrow<Bitmap>> BitXor<B> for &Bitmap {
    type Output = Bitmap;

    fn bitxor(self, rhs: B) -> Bitmap {
        self.combine(rhs.borrow(), |lhs, rhs| *lhs ^= rhs)
    }
}

impl<B: Borrow<Self>> BitXor<B> for Bitmap {
    type Output = Self;

    fn bitxor(self, rhs: B) -> Self {
        &self ^ rhs
    }
}

impl<B: Borrow<Self>> BitXorAssign<B> for Bitmap {
    fn bitxor_assign(&mut self, rhs: B) {
        *self = &*self ^ rhs;
    }
}

impl Debug for Bitmap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl Display for Bitmap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        let mut indices = self.iter_set().peekable();
        while let Some(first) = indices.next() {
            let mut last = first;
            while indices.peek() == Some(&(last + 1)) {
                last += 1;
                indices.next();
            }
            if !s.is_empty() {
                s.push(',');
            }
            if first == last {
                write!(s, "{first}")?;
            } else {
                write!(s, "{first}-{last}")?;
            }
        }
        f.pad(&s)
    }
}

impl<BI: Borrow<usize>> Extend<BI> for Bitmap {
    fn extend<T: IntoIterator<Item = BI>>(&mut self, iter: T) {
        for i in iter {
            self.set(*i.borrow());
        }
    }
}

impl From<usize> for Bitmap {
    fn from(value: usize) -> Self {
        let mut result = Self::new();
        result.set(value);
        result
    }
}

impl<BI: Borrow<usize>> FromIterator<BI> for Bitmap {
    fn from_iter<I: IntoIterator<Item = BI>>(iter: I) -> Self {
        let mut bitmap = Self::new();
        bitmap.extend(iter);
        bitmap
    }
}

impl FromStr for Bitmap {
    type Err = ParseBitmapError;

    /// Parse the list format, e.g. `0-3,8,10-11`
    ///
    /// The empty string is parsed as the empty bitmap.
    fn from_str(s: &str) -> Result<Self, ParseBitmapError> {
        let mut bitmap = Self::new();
        let s = s.trim();
        if s.is_empty() {
            return Ok(bitmap);
        }
        let parse_index = |item: &str| {
            item.trim()
                .parse::<usize>()
                .map_err(|_| ParseBitmapError::InvalidListItem(item.to_owned()))
        };
        for item in s.split(',') {
            match item.split_once('-') {
                Some((first, last)) => {
                    let (first, last) = (parse_index(first)?, parse_index(last)?);
                    if first > last {
                        return Err(ParseBitmapError::InvalidListItem(item.to_owned()));
                    }
                    bitmap.set_range(first..=last);
                }
                None => bitmap.set(parse_index(item)?),
            }
        }
        Ok(bitmap)
    }
}

impl<'bitmap> IntoIterator for &'bitmap Bitmap {
    type Item = usize;
    type IntoIter = Iter<'bitmap>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_set()
    }
}

impl Ord for Bitmap {
    /// Bitmaps are ordered by their highest set index first
    fn cmp(&self, other: &Self) -> Ordering {
        fn from_top(bitmap: &Bitmap) -> impl Iterator<Item = bool> + '_ {
            bitmap.bits.iter().rev().map(|bit| *bit)
        }
        self.bits
            .len()
            .cmp(&other.bits.len())
            .then_with(|| from_top(self).cmp(from_top(other)))
    }
}

impl PartialOrd for Bitmap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<B: Borrow<Bitmap>> Sub<B> for &Bitmap {
    type Output = Bitmap;

    fn sub(self, rhs: B) -> Bitmap {
        self.combine(rhs.borrow(), |lhs, rhs| *lhs &= !rhs)
    }
}

impl<B: Borrow<Self>> Sub<B> for Bitmap {
    type Output = Self;

    fn sub(self, rhs: B) -> Self {
        &self - rhs
    }
}

impl<B: Borrow<Self>> SubAssign<B> for Bitmap {
    fn sub_assign(&mut self, rhs: B) {
        *self = &*self - rhs;
    }
}

#[cfg(any(test, feature = "proptest"))]
impl proptest::prelude::Arbitrary for Bitmap {
    type Parameters = ();
    type Strategy = proptest::strategy::Map<
        proptest::collection::BTreeSetStrategy<std::ops::Range<usize>>,
        fn(std::collections::BTreeSet<usize>) -> Self,
    >;

    fn arbitrary_with((): ()) -> Self::Strategy {
        use proptest::prelude::*;
        let from_set = |set: std::collections::BTreeSet<usize>| -> Self { set.into_iter().collect() };
        prop::collection::btree_set(0..256usize, 0..32)
            .prop_map(from_set as fn(std::collections::BTreeSet<usize>) -> Self)
    }
}

/// Iterator over set [`Bitmap`] indices
#[derive(Clone, Debug)]
pub struct Iter<'bitmap>(IterOnes<'bitmap, u64, Lsb0>);

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<usize> {
        self.0.next_back()
    }
}

impl FusedIterator for Iter<'_> {}

/// Error while parsing a textual bitmap representation
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum ParseBitmapError {
    /// A hexadecimal mask has no digits
    #[error("hexadecimal mask has no digits")]
    Empty,

    /// A hexadecimal mask contains a character that is not a hex digit
    #[error("{0:?} is not an hexadecimal digit")]
    InvalidHexDigit(char),

    /// An item of a bitmap list is neither an index nor an index range
    #[error("{0:?} is not a valid bitmap list item")]
    InvalidListItem(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use proptest::prelude::*;
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::{collections::BTreeSet, hash::Hash};

    assert_impl_all!(Bitmap:
        BitAnd<Bitmap>, BitAnd<&'static Bitmap>,
        BitAndAssign<Bitmap>, BitOr<Bitmap>, BitOrAssign<Bitmap>,
        BitXor<Bitmap>, Clone, Debug, Default, Display, Extend<usize>,
        From<usize>, FromIterator<usize>, FromStr, Hash, Ord, Send,
        Sub<Bitmap>, SubAssign<Bitmap>, Sync
    );
    assert_not_impl_any!(Bitmap: Copy);

    #[test]
    fn empty() {
        let empty = Bitmap::new();
        assert!(empty.is_empty());
        assert_eq!(empty.weight(), 0);
        assert_eq!(empty.first_set(), None);
        assert_eq!(empty.last_set(), None);
        assert_eq!(empty.iter_set().count(), 0);
        assert_eq!(format!("{empty}"), "");
        assert_eq!(empty.to_hex_string(), "0x0");
        assert_eq!(empty, Bitmap::default());
    }

    #[test]
    fn list_display() {
        let bitmap = [0, 1, 2, 3, 8, 10, 11, 64, 65, 200]
            .into_iter()
            .collect::<Bitmap>();
        assert_eq!(format!("{bitmap}"), "0-3,8,10-11,64-65,200");
        assert_eq!(format!("{bitmap:?}"), "0-3,8,10-11,64-65,200");
        assert_eq!(bitmap.first_set(), Some(0));
        assert_eq!(bitmap.last_set(), Some(200));
        assert_eq!(bitmap.weight(), 10);
    }

    #[test]
    fn list_parsing() {
        let bitmap = "0-3, 8,10-11".parse::<Bitmap>().unwrap();
        assert_eq!(bitmap, Bitmap::from_iter([0usize, 1, 2, 3, 8, 10, 11]));
        assert_eq!("".parse::<Bitmap>().unwrap(), Bitmap::new());
        assert_eq!(
            "3-1".parse::<Bitmap>(),
            Err(ParseBitmapError::InvalidListItem("3-1".to_owned()))
        );
        assert_eq!(
            "1,x".parse::<Bitmap>(),
            Err(ParseBitmapError::InvalidListItem("x".to_owned()))
        );
    }

    #[test]
    fn hex_masks() {
        let bitmap = Bitmap::from_hex_str("0x1").unwrap();
        assert_eq!(bitmap, Bitmap::from(0));
        let bitmap = Bitmap::from_hex_str("F0").unwrap();
        assert_eq!(format!("{bitmap}"), "4-7");
        let wide = Bitmap::from_hex_str("0x10000000000000001").unwrap();
        assert_eq!(format!("{wide}"), "0,64");
        assert_eq!(wide.to_hex_string(), "0x10000000000000001");
        assert_eq!(Bitmap::from_hex_str("0x"), Err(ParseBitmapError::Empty));
        assert_eq!(
            Bitmap::from_hex_str("0x1g"),
            Err(ParseBitmapError::InvalidHexDigit('g'))
        );
    }

    #[test]
    fn ordering() {
        let low = Bitmap::from_range(0..4);
        assert!(low < Bitmap::from(4));
        assert!(Bitmap::new() < low);
        assert!(Bitmap::from_iter([1usize, 4]) > Bitmap::from_iter([0usize, 4]));
        assert_eq!(low.cmp(&Bitmap::from_range(0..4)), Ordering::Equal);
    }

    #[test]
    fn range_ops() {
        let mut bitmap = Bitmap::from_range(60..70);
        assert_eq!(format!("{bitmap}"), "60-69");
        bitmap.unset_range(62..=66);
        assert_eq!(format!("{bitmap}"), "60-61,67-69");
        bitmap.unset_range(61..);
        assert_eq!(format!("{bitmap}"), "60");
        bitmap.unset(60);
        assert!(bitmap.is_empty());
        assert_eq!(bitmap, Bitmap::new());

        // Clearing the top indices leaves no trace
        let trimmed = Bitmap::from_range(0..100) - Bitmap::from_range(50..100);
        assert_eq!(trimmed, Bitmap::from_range(0..50));
        assert_eq!(trimmed.to_hex_string(), "0x3ffffffffffff");
    }

    /// Generate a set of indices alongside the matching bitmap
    fn index_set() -> impl Strategy<Value = BTreeSet<usize>> {
        prop::collection::btree_set(0..300usize, 0..40)
    }

    proptest! {
        #[test]
        fn set_ops(lhs in index_set(), rhs in index_set()) {
            let lhs_bitmap = lhs.iter().collect::<Bitmap>();
            let rhs_bitmap = rhs.iter().collect::<Bitmap>();
            let expect = |set: BTreeSet<usize>| set.into_iter().collect::<Bitmap>();

            prop_assert_eq!(&lhs_bitmap & &rhs_bitmap, expect(&lhs & &rhs));
            prop_assert_eq!(&lhs_bitmap | &rhs_bitmap, expect(&lhs | &rhs));
            prop_assert_eq!(&lhs_bitmap ^ &rhs_bitmap, expect(&lhs ^ &rhs));
            prop_assert_eq!(&lhs_bitmap - &rhs_bitmap, expect(&lhs - &rhs));
            prop_assert_eq!(lhs_bitmap.intersects(&rhs_bitmap), !lhs.is_disjoint(&rhs));
            prop_assert_eq!(lhs_bitmap.includes(&rhs_bitmap), rhs.is_subset(&lhs));
            prop_assert_eq!(lhs_bitmap.weight(), lhs.len());
            prop_assert_eq!(lhs_bitmap.iter_set().collect::<BTreeSet<_>>(), lhs.clone());
            prop_assert_eq!(lhs_bitmap.last_set(), lhs.last().copied());
        }

        #[test]
        fn textual_forms(bitmap: Bitmap) {
            prop_assert_eq!(&bitmap.to_string().parse::<Bitmap>().unwrap(), &bitmap);
            prop_assert_eq!(&Bitmap::from_hex_str(&bitmap.to_hex_string()).unwrap(), &bitmap);
        }
    }
}
