// SPDX-License-Identifier: CEPL-1.0
//! Linear bump allocator over one owned, fixed-size buffer.
//!
//! Blocks are never freed individually; the whole arena is reset at once.
//! Allocation hands back an [`ArenaBlock`] (offset + length) which is later
//! turned into a byte slice, so several blocks can be carved out before any
//! of them is borrowed.

use bytemuck::Pod;
use thiserror::Error;

pub const DEFAULT_ALIGN: usize = 8;

// Base alignment of the backing storage; typed slices may not ask for more.
const BASE_ALIGN: usize = std::mem::align_of::<u128>();

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    #[error("zero-sized arena allocation")]
    ZeroSize,
    #[error("alignment {0} is not a power of two or exceeds the arena base alignment")]
    BadAlign(usize),
    #[error("arena exhausted: requested {requested} bytes with {remaining} remaining")]
    Exhausted { requested: usize, remaining: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaBlock {
    offset: usize,
    len: usize,
}

impl ArenaBlock {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct Arena {
    storage: Box<[u128]>,
    total_size: usize,
    prev_offset: usize,
    curr_offset: usize,
}

impl Arena {
    pub fn new(total_size: usize) -> Self {
        let words = total_size.div_ceil(std::mem::size_of::<u128>());
        Self {
            storage: vec![0u128; words].into_boxed_slice(),
            total_size,
            prev_offset: 0,
            curr_offset: 0,
        }
    }

    pub fn alloc(&mut self, size: usize) -> Result<ArenaBlock, ArenaError> {
        self.alloc_aligned(size, DEFAULT_ALIGN)
    }

    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<ArenaBlock, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSize);
        }
        if !align.is_power_of_two() || align > BASE_ALIGN {
            return Err(ArenaError::BadAlign(align));
        }

        let aligned = (self.curr_offset + (align - 1)) & !(align - 1);
        let end = aligned
            .checked_add(size)
            .filter(|&end| end <= self.total_size)
            .ok_or(ArenaError::Exhausted {
                requested: size,
                remaining: self.remaining(),
            })?;

        self.prev_offset = self.curr_offset;
        self.curr_offset = end;
        Ok(ArenaBlock {
            offset: aligned,
            len: size,
        })
    }

    /// Carve a zeroed slice of `count` plain-old-data values.
    pub fn alloc_slice<T: Pod>(&mut self, count: usize) -> Result<&mut [T], ArenaError> {
        let size = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(ArenaError::Exhausted {
                requested: usize::MAX,
                remaining: self.remaining(),
            })?;
        let block = self.alloc_aligned(size, std::mem::align_of::<T>())?;
        let bytes = self.bytes_mut(block);
        bytes.fill(0);
        bytemuck::try_cast_slice_mut(bytes)
            .map_err(|_| ArenaError::BadAlign(std::mem::align_of::<T>()))
    }

    pub fn bytes(&self, block: ArenaBlock) -> &[u8] {
        let all: &[u8] = bytemuck::cast_slice(&self.storage);
        &all[block.offset..block.offset + block.len]
    }

    pub fn bytes_mut(&mut self, block: ArenaBlock) -> &mut [u8] {
        let all: &mut [u8] = bytemuck::cast_slice_mut(&mut self.storage);
        &mut all[block.offset..block.offset + block.len]
    }

    /// Drop every block at once. Outstanding [`ArenaBlock`]s become stale.
    pub fn reset(&mut self) {
        self.prev_offset = 0;
        self.curr_offset = 0;
    }

    pub fn used(&self) -> usize {
        self.curr_offset
    }

    pub fn remaining(&self) -> usize {
        self.total_size - self.curr_offset
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Offset the arena sat at before the most recent allocation.
    pub fn prev_offset(&self) -> usize {
        self.prev_offset
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("total_size", &self.total_size)
            .field("used", &self.curr_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn aligns_to_eight_by_default() {
        let mut arena = Arena::new(64);
        let a = arena.alloc(3).unwrap();
        let b = arena.alloc(5).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert_eq!(arena.used(), 13);
        assert_eq!(arena.remaining(), 51);
        assert_eq!(arena.prev_offset(), 3);
    }

    #[test]
    fn rejects_zero_size_and_bad_alignment() {
        let mut arena = Arena::new(64);
        assert_eq!(arena.alloc(0), Err(ArenaError::ZeroSize));
        assert_eq!(arena.alloc_aligned(4, 3), Err(ArenaError::BadAlign(3)));
        assert_eq!(arena.alloc_aligned(4, 4096), Err(ArenaError::BadAlign(4096)));
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn exhaustion_leaves_cursor_untouched() {
        let mut arena = Arena::new(16);
        arena.alloc(12).unwrap();
        let err = arena.alloc(8).unwrap_err();
        assert_eq!(
            err,
            ArenaError::Exhausted {
                requested: 8,
                remaining: 4
            }
        );
        assert_eq!(arena.used(), 12);
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut arena = Arena::new(32);
        arena.alloc(32).unwrap();
        assert_eq!(arena.remaining(), 0);
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.alloc(32).unwrap().offset(), 0);
    }

    #[test]
    fn blocks_do_not_alias() {
        let mut arena = Arena::new(64);
        let a = arena.alloc(8).unwrap();
        let b = arena.alloc(8).unwrap();
        arena.bytes_mut(a).fill(0xAA);
        arena.bytes_mut(b).fill(0x55);
        assert!(arena.bytes(a).iter().all(|&x| x == 0xAA));
        assert!(arena.bytes(b).iter().all(|&x| x == 0x55));
    }

    #[test]
    fn typed_slices_are_zeroed_after_reset() {
        let mut arena = Arena::new(256);
        arena.alloc_slice::<u32>(16).unwrap().fill(7);
        arena.reset();
        let s = arena.alloc_slice::<u32>(16).unwrap();
        assert!(s.iter().all(|&x| x == 0));
        s[3] = 9;
        assert_eq!(s.len(), 16);
    }

    proptest! {
        #[test]
        fn offsets_are_aligned_and_increasing(sizes in proptest::collection::vec(1usize..64, 1..40)) {
            let mut arena = Arena::new(4096);
            let mut last_end = 0;
            for size in sizes {
                let block = arena.alloc(size).unwrap();
                prop_assert_eq!(block.offset() % DEFAULT_ALIGN, 0);
                prop_assert!(block.offset() >= last_end);
                last_end = block.offset() + block.len();
                prop_assert_eq!(arena.used(), last_end);
            }
        }
    }
}
