//! # Thread-Local Frame Arenas
//!
//! One bump arena per worker for transient per-frame allocations.

use bumpalo::Bump;
use crossbeam_utils::CachePadded;

/// A single worker's bump arena.
///
/// Allocations are fast (just bump a pointer). Memory is released all at
/// once when the owning [`ThreadLocalAllocator`] is rewound.
///
/// # Thread Safety
///
/// The arena is `Send` but not `Sync`: exactly one job may use it at a time,
/// which is guaranteed by handing out `&mut WorkerArena` per worker slot.
pub struct WorkerArena {
    /// Backing bump allocator.
    bump: Bump,
    /// Largest number of bytes seen at any rewind.
    high_water: usize,
}

impl WorkerArena {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bump: Bump::with_capacity(capacity),
            high_water: 0,
        }
    }

    /// Returns the bump allocator for this frame.
    #[inline]
    #[must_use]
    pub fn bump(&self) -> &Bump {
        &self.bump
    }

    /// Returns the bytes currently held by the arena's chunks.
    #[inline]
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Returns the largest footprint observed at a rewind.
    #[inline]
    #[must_use]
    pub const fn high_water_bytes(&self) -> usize {
        self.high_water
    }

    fn rewind(&mut self) {
        self.high_water = self.high_water.max(self.bump.allocated_bytes());
        self.bump.reset();
    }
}

/// One arena per worker thread, rewound once per frame.
///
/// Slots are cache-line padded so neighbouring workers never share a line.
/// Rewinding takes `&mut self`: as long as any job still borrows an arena the
/// rewind cannot be called, which makes "rewind after all jobs completed" a
/// compile-time property instead of a runtime convention.
///
/// # Example
///
/// ```rust,ignore
/// let mut arenas = ThreadLocalAllocator::new(8, 256 * 1024);
///
/// arenas.slots_mut().par_iter_mut().for_each(|slot| {
///     let scratch = bumpalo::collections::Vec::<u32>::with_capacity_in(128, slot.bump());
/// });
///
/// // Frame boundary: every job is done, release everything at once.
/// arenas.rewind();
/// ```
pub struct ThreadLocalAllocator {
    /// Per-worker arenas, indexed by worker id.
    slots: Vec<CachePadded<WorkerArena>>,
    /// Initial capacity of each arena.
    capacity_per_worker: usize,
    /// Number of rewinds so far.
    frame_index: u64,
}

impl ThreadLocalAllocator {
    /// Creates one arena per worker.
    ///
    /// # Arguments
    ///
    /// * `worker_count` - Number of workers (at least one arena is always created)
    /// * `capacity_per_worker` - Initial capacity of each arena in bytes
    #[must_use]
    pub fn new(worker_count: usize, capacity_per_worker: usize) -> Self {
        let slots = (0..worker_count.max(1))
            .map(|_| CachePadded::new(WorkerArena::with_capacity(capacity_per_worker)))
            .collect();

        Self {
            slots,
            capacity_per_worker,
            frame_index: 0,
        }
    }

    /// Returns the number of worker arenas.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the initial capacity of each arena.
    #[inline]
    #[must_use]
    pub const fn capacity_per_worker(&self) -> usize {
        self.capacity_per_worker
    }

    /// Returns the arena of one worker.
    #[inline]
    #[must_use]
    pub fn slot(&self, worker: usize) -> Option<&WorkerArena> {
        self.slots.get(worker).map(|slot| &**slot)
    }

    /// Returns the first worker's arena, used by the job that fans work out.
    ///
    /// Taking `&mut self` keeps the per-worker jobs from running while the
    /// returned arena is borrowed.
    #[inline]
    pub fn primary(&mut self) -> &WorkerArena {
        &self.slots[0]
    }

    /// Returns all worker arenas for per-worker job partitioning.
    #[inline]
    pub fn slots_mut(&mut self) -> &mut [CachePadded<WorkerArena>] {
        &mut self.slots
    }

    /// Rewinds every arena, invalidating all allocations of the frame.
    ///
    /// This is the frame boundary: call it exactly once per frame.
    pub fn rewind(&mut self) {
        for slot in &mut self.slots {
            slot.rewind();
        }
        self.frame_index += 1;
        tracing::trace!(frame = self.frame_index, "worker arenas rewound");
    }

    /// Returns the number of frames rewound so far.
    #[inline]
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Returns the bytes held by all arenas right now.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.slots.iter().map(|slot| slot.allocated_bytes()).sum()
    }

    /// Returns the sum of the per-worker high-water marks.
    #[must_use]
    pub fn high_water_bytes(&self) -> usize {
        self.slots.iter().map(|slot| slot.high_water_bytes()).sum()
    }
}

impl std::fmt::Debug for ThreadLocalAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLocalAllocator")
            .field("workers", &self.slots.len())
            .field("capacity_per_worker", &self.capacity_per_worker)
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}
