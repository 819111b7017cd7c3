//! # Heap Allocator
//!
//! Best-fit allocator over an abstract byte range, used for GPU buffer space.
//!
//! Free space is tracked twice: by address (for coalescing on release) and
//! by `(size, address)` (for best-fit lookup). Both indices are ordered maps,
//! so allocate and release are O(log n) in the number of free blocks.

use std::collections::{BTreeMap, BTreeSet};

/// A `[begin, end)` byte range handed out by the [`HeapAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapBlock {
    /// First byte of the block.
    pub begin: u64,
    /// One past the last byte of the block.
    pub end: u64,
}

impl HeapBlock {
    /// Creates a new block.
    #[inline]
    #[must_use]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Returns the block size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        self.end - self.begin
    }

    /// Checks if the block is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.end <= self.begin
    }

    /// Checks if two blocks share at least one byte.
    #[inline]
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Best-fit heap allocator with alignment support.
///
/// # Example
///
/// ```rust,ignore
/// let mut heap = HeapAllocator::new(1024 * 1024);
///
/// let block = heap.allocate(64 * 1024, 16)?;
/// assert_eq!(block.begin % 16, 0);
///
/// heap.release(block);
/// assert!(heap.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    /// Total managed size in bytes.
    size: u64,
    /// Free blocks keyed by begin address, value is the end address.
    free_by_address: BTreeMap<u64, u64>,
    /// Free blocks ordered by size, then address.
    free_by_size: BTreeSet<(u64, u64)>,
    /// Bytes currently handed out.
    used: u64,
}

impl HeapAllocator {
    /// Creates an allocator managing `size` bytes, all of them free.
    #[must_use]
    pub fn new(size: u64) -> Self {
        let mut heap = Self {
            size,
            free_by_address: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            used: 0,
        };
        heap.insert_free(0, size);
        heap
    }

    /// Returns the managed size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of bytes currently handed out.
    #[inline]
    #[must_use]
    pub const fn used_space(&self) -> u64 {
        self.used
    }

    /// Returns the number of free bytes (possibly fragmented).
    #[inline]
    #[must_use]
    pub const fn free_space(&self) -> u64 {
        self.size - self.used
    }

    /// Checks if nothing is allocated.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Checks if every byte is allocated.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.used == self.size
    }

    /// Returns the number of disjoint free blocks.
    #[inline]
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free_by_address.len()
    }

    /// Returns the size of the largest free block.
    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.free_by_size.iter().next_back().map_or(0, |&(size, _)| size)
    }

    /// Returns the end of the highest allocated byte.
    ///
    /// This is the amount of backing storage that must exist for every live
    /// block to be addressable.
    #[must_use]
    pub fn one_past_highest_used_address(&self) -> u64 {
        match self.free_by_address.iter().next_back() {
            Some((&begin, &end)) if end == self.size => begin,
            _ => self.size,
        }
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// Picks the smallest free block that can hold the aligned request; ties
    /// go to the lowest address. Padding in front of the aligned start and
    /// the tail behind the allocation both stay free.
    ///
    /// # Returns
    ///
    /// The allocated block, or None if no free block is large enough, the
    /// size is zero, or the alignment is not a power of two.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<HeapBlock> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let mut chosen = None;
        for &(block_size, begin) in self.free_by_size.range((size, 0)..) {
            let aligned = align_up(begin, alignment);
            let end = begin + block_size;
            if aligned.checked_add(size).is_some_and(|alloc_end| alloc_end <= end) {
                chosen = Some((begin, end, aligned));
                break;
            }
        }

        let (begin, end, aligned) = chosen?;
        self.remove_free(begin, end);
        if aligned > begin {
            self.insert_free(begin, aligned);
        }
        if aligned + size < end {
            self.insert_free(aligned + size, end);
        }

        self.used += size;
        Some(HeapBlock::new(aligned, aligned + size))
    }

    /// Releases a block, merging it with free neighbours.
    ///
    /// Releasing a block that overlaps free space (double free, or a block
    /// this allocator never handed out) is ignored and logged.
    pub fn release(&mut self, block: HeapBlock) {
        if block.is_empty() {
            return;
        }
        if block.end > self.size || self.overlaps_free(block) {
            debug_assert!(false, "release of a block that is not allocated: {block:?}");
            tracing::warn!(
                begin = block.begin,
                end = block.end,
                "ignoring release of a block that is not allocated"
            );
            return;
        }

        let mut begin = block.begin;
        let mut end = block.end;

        let previous = self
            .free_by_address
            .range(..begin)
            .next_back()
            .map(|(&b, &e)| (b, e));
        if let Some((prev_begin, prev_end)) = previous {
            if prev_end == begin {
                self.remove_free(prev_begin, prev_end);
                begin = prev_begin;
            }
        }

        let next = self.free_by_address.get(&end).copied();
        if let Some(next_end) = next {
            self.remove_free(end, next_end);
            end = next_end;
        }

        self.insert_free(begin, end);
        self.used -= block.size();
    }

    /// Grows the managed range to `new_size` bytes.
    ///
    /// # Returns
    ///
    /// `false` if `new_size` is smaller than the current size (shrinking is
    /// not supported).
    pub fn resize(&mut self, new_size: u64) -> bool {
        if new_size < self.size {
            return false;
        }
        if new_size == self.size {
            return true;
        }

        let old_size = self.size;
        self.size = new_size;

        let tail = self
            .free_by_address
            .iter()
            .next_back()
            .map(|(&b, &e)| (b, e));
        match tail {
            Some((begin, end)) if end == old_size => {
                self.remove_free(begin, end);
                self.insert_free(begin, new_size);
            }
            _ => self.insert_free(old_size, new_size),
        }
        true
    }

    /// Frees every block at once.
    pub fn clear(&mut self) {
        self.free_by_address.clear();
        self.free_by_size.clear();
        self.used = 0;
        self.insert_free(0, self.size);
    }

    fn overlaps_free(&self, block: HeapBlock) -> bool {
        let before = self.free_by_address.range(..=block.begin).next_back();
        if let Some((&begin, &end)) = before {
            if HeapBlock::new(begin, end).overlaps(block) {
                return true;
            }
        }
        self.free_by_address
            .range(block.begin..block.end)
            .next()
            .is_some()
    }

    fn insert_free(&mut self, begin: u64, end: u64) {
        if end > begin {
            self.free_by_address.insert(begin, end);
            self.free_by_size.insert((end - begin, begin));
        }
    }

    fn remove_free(&mut self, begin: u64, end: u64) {
        self.free_by_address.remove(&begin);
        self.free_by_size.remove(&(end - begin, begin));
    }
}

#[inline]
const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_release_roundtrip() {
        let mut heap = HeapAllocator::new(1024);
        let block = heap.allocate(100, 1).unwrap();
        assert_eq!(block, HeapBlock::new(0, 100));
        assert_eq!(heap.used_space(), 100);

        heap.release(block);
        assert!(heap.is_empty());
        assert_eq!(heap.free_block_count(), 1);
        assert_eq!(heap.largest_free_block(), 1024);
    }

    #[test]
    fn test_alignment_respected() {
        let mut heap = HeapAllocator::new(1024);
        let _ = heap.allocate(3, 1).unwrap();
        let aligned = heap.allocate(64, 64).unwrap();
        assert_eq!(aligned.begin % 64, 0);
        assert_eq!(aligned.begin, 64);
        // Padding [3, 64) stays available.
        let small = heap.allocate(10, 1).unwrap();
        assert_eq!(small.begin, 3);
    }

    #[test]
    fn test_best_fit_prefers_smallest_hole() {
        let mut heap = HeapAllocator::new(1000);
        let a = heap.allocate(100, 1).unwrap();
        let _b = heap.allocate(10, 1).unwrap();
        let c = heap.allocate(30, 1).unwrap();
        let _d = heap.allocate(10, 1).unwrap();
        heap.release(a);
        heap.release(c);

        // Holes: [0,100) and [110,140) and the tail. 25 bytes fit best in the 30-byte hole.
        let fit = heap.allocate(25, 1).unwrap();
        assert_eq!(fit.begin, 110);
    }

    #[test]
    fn test_coalesce_both_neighbours() {
        let mut heap = HeapAllocator::new(300);
        let a = heap.allocate(100, 1).unwrap();
        let b = heap.allocate(100, 1).unwrap();
        let c = heap.allocate(100, 1).unwrap();
        assert!(heap.is_full());

        heap.release(a);
        heap.release(c);
        assert_eq!(heap.free_block_count(), 2);
        heap.release(b);
        assert_eq!(heap.free_block_count(), 1);
        assert_eq!(heap.largest_free_block(), 300);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut heap = HeapAllocator::new(128);
        assert!(heap.allocate(128, 16).is_some());
        assert!(heap.allocate(1, 1).is_none());
        assert!(heap.allocate(0, 1).is_none());
    }

    #[test]
    fn test_invalid_alignment_rejected() {
        let mut heap = HeapAllocator::new(128);
        assert!(heap.allocate(16, 3).is_none());
    }

    #[test]
    fn test_resize_extends_tail() {
        let mut heap = HeapAllocator::new(100);
        let block = heap.allocate(60, 1).unwrap();
        assert!(heap.resize(200));
        assert_eq!(heap.largest_free_block(), 140);
        assert!(!heap.resize(50));
        heap.release(block);
        assert_eq!(heap.free_block_count(), 1);
    }

    #[test]
    fn test_high_water_mark() {
        let mut heap = HeapAllocator::new(1000);
        assert_eq!(heap.one_past_highest_used_address(), 0);
        let a = heap.allocate(100, 1).unwrap();
        let b = heap.allocate(100, 1).unwrap();
        assert_eq!(heap.one_past_highest_used_address(), 200);
        heap.release(b);
        assert_eq!(heap.one_past_highest_used_address(), 100);
        heap.release(a);
        assert_eq!(heap.one_past_highest_used_address(), 0);
    }
}
