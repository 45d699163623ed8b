//! Provides `OneLevelPrioBitmap` and `TwoLevelPrioBitmap`, bit array
//! structures supporting fast "lowest set bit" scans.
//!
//! The kernel uses them for ready-queue occupancy (the lowest set bit is the
//! most urgent non-empty queue), the free list of the notification pool, and
//! the per-process sets of send targets and pending notification sources.
use core::fmt;

use super::Init;

type Word = usize;

/// The number of bits in a machine word.
pub const WORD_LEN: usize = core::mem::size_of::<Word>() * 8;

/// The number of `Word`-sized groups needed to hold `len` bits.
pub const fn bitmap_groups(len: usize) -> usize {
    (len + WORD_LEN - 1) / WORD_LEN
}

/// Trait for the bitmap types in this module.
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Init + Send + Sync + Clone + Copy + fmt::Debug + 'static {
    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the first set bit at or after `start`.
    fn find_set_from(&self, start: usize) -> Option<usize>;

    /// Get the position of the first set bit.
    fn find_set(&self) -> Option<usize> {
        self.find_set_from(0)
    }

    /// Get a flag indicating whether no bits are set.
    fn is_empty(&self) -> bool {
        self.find_set().is_none()
    }

    /// Enumerate the set bits in ascending order.
    fn iter_set(&self) -> SetBits<'_, Self> {
        SetBits {
            bitmap: self,
            next: 0,
        }
    }

    /// Count the set bits.
    fn count(&self) -> usize {
        self.iter_set().count()
    }
}

/// Iterator returned by [`PrioBitmap::iter_set`].
pub struct SetBits<'a, T: ?Sized> {
    bitmap: &'a T,
    next: usize,
}

impl<T: PrioBitmap> Iterator for SetBits<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let i = self.bitmap.find_set_from(self.next)?;
        self.next = i + 1;
        Some(i)
    }
}

/// Stores `LEN` (≤ [`WORD_LEN`]) entries in a single word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OneLevelPrioBitmap<const LEN: usize> {
    bits: Word,
}

impl<const LEN: usize> OneLevelPrioBitmap<LEN> {
    const LEN_OK: () = assert!(LEN <= WORD_LEN, "too many bits for one level");
}

impl<const LEN: usize> Init for OneLevelPrioBitmap<LEN> {
    #[allow(clippy::let_unit_value)]
    const INIT: Self = {
        let () = Self::LEN_OK;
        Self { bits: 0 }
    };
}

impl<const LEN: usize> fmt::Debug for OneLevelPrioBitmap<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter_set()).finish()
    }
}

impl<const LEN: usize> PrioBitmap for OneLevelPrioBitmap<LEN> {
    fn get(&self, i: usize) -> bool {
        assert!(i < LEN);
        self.bits & (1 << i) != 0
    }

    fn clear(&mut self, i: usize) {
        assert!(i < LEN);
        self.bits &= !(1 << i);
    }

    fn set(&mut self, i: usize) {
        assert!(i < LEN);
        self.bits |= 1 << i;
    }

    fn find_set_from(&self, start: usize) -> Option<usize> {
        if start >= LEN {
            return None;
        }
        let masked = self.bits & (!0 << start);
        if masked == 0 {
            None
        } else {
            Some(masked.trailing_zeros() as usize)
        }
    }
}

/// Stores `WORD_LEN * GROUPS` entries. `GROUPS` must not exceed [`WORD_LEN`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TwoLevelPrioBitmap<const GROUPS: usize> {
    // Invariant: `first.get(i) == (second[i] != 0)`
    first: OneLevelPrioBitmap<WORD_LEN>,
    second: [Word; GROUPS],
}

impl<const GROUPS: usize> TwoLevelPrioBitmap<GROUPS> {
    const GROUPS_OK: () = assert!(GROUPS <= WORD_LEN, "too many groups");
}

impl<const GROUPS: usize> Init for TwoLevelPrioBitmap<GROUPS> {
    #[allow(clippy::let_unit_value)]
    const INIT: Self = {
        let () = Self::GROUPS_OK;
        Self {
            first: Init::INIT,
            second: [0; GROUPS],
        }
    };
}

impl<const GROUPS: usize> fmt::Debug for TwoLevelPrioBitmap<GROUPS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter_set()).finish()
    }
}

impl<const GROUPS: usize> PrioBitmap for TwoLevelPrioBitmap<GROUPS> {
    fn get(&self, i: usize) -> bool {
        self.second[i / WORD_LEN] & (1 << (i % WORD_LEN)) != 0
    }

    fn clear(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group &= !(1 << (i % WORD_LEN));
        if *group == 0 {
            self.first.clear(i / WORD_LEN);
        }
    }

    fn set(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group |= 1 << (i % WORD_LEN);
        self.first.set(i / WORD_LEN);
    }

    fn find_set_from(&self, start: usize) -> Option<usize> {
        let group_i = start / WORD_LEN;
        if group_i >= GROUPS {
            return None;
        }

        // The rest of the group containing `start`
        let masked = self.second[group_i] & (!0 << (start % WORD_LEN));
        if masked != 0 {
            return Some(masked.trailing_zeros() as usize + group_i * WORD_LEN);
        }

        // The following non-empty group
        self.first.find_set_from(group_i + 1).map(|group_i| {
            let group = self.second[group_i];
            debug_assert_ne!(group, 0);
            group.trailing_zeros() as usize + group_i * WORD_LEN
        })
    }
}
