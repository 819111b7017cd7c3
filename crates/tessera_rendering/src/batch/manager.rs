//! The sparse GPU heap: batch allocation over one growable buffer.

use rayon::prelude::*;

use super::buffer::{BufferHandle, GpuBuffer};
use super::{BUFFER_HEADER_SIZE, CHUNK_SIZE};
use crate::archetype::GraphicsArchetypeRegistry;
use crate::config::RenderConfig;
use crate::culling::Aabb;
use crate::error::RenderResult;
use tessera_core::{HeapAllocator, HeapBlock, Stash};

/// One fixed-size GPU allocation holding part of an archetype's objects.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Byte range inside the GPU buffer.
    pub block: HeapBlock,
    /// Owning archetype.
    pub archetype: u32,
    /// Slot inside the archetype's batch list.
    pub slot: u32,
    /// Objects currently stored, refreshed with the bounds.
    pub object_count: u32,
    /// Buffer generation the batch is bound to.
    pub bound_buffer: u64,
    /// World bounds of every object in the batch.
    pub bounds: Aabb,
    /// World bounds of each 128-object chunk.
    pub chunk_bounds: Vec<Aabb>,
}

/// A buffer growth performed by [`BatchManager::reconcile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferGrowth {
    /// Size before growing.
    pub old_size: u64,
    /// Size after growing.
    pub new_size: u64,
    /// Number of times the size was doubled (the last step may be capped).
    pub doublings: u32,
}

/// What one reconcile pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Batches allocated.
    pub created: usize,
    /// Batches released.
    pub removed: usize,
    /// Batches that could not be allocated; retried next pass.
    pub failed_allocations: usize,
    /// Whether persistent usage hit the maximum buffer size.
    pub hard_cap_exceeded: bool,
    /// Buffer growth, if any.
    pub growth: Option<BufferGrowth>,
    /// New handle every batch was rebound to, at most one per pass.
    pub rebind: Option<BufferHandle>,
}

/// Owns the GPU buffer and the batches allocated inside it.
///
/// The heap spans the maximum buffer size; the buffer itself only grows
/// once the highest allocated byte no longer fits.
///
/// # Example
///
/// ```rust,ignore
/// let mut batches = BatchManager::new(&config, Box::new(HostBuffer::new(config.initial_buffer_size)))?;
/// let report = batches.reconcile(&mut registry);
/// if let Some(handle) = report.rebind {
///     backend.rebind(handle);
/// }
/// ```
pub struct BatchManager {
    heap: HeapAllocator,
    batches: Vec<Option<Batch>>,
    free_indices: Vec<u32>,
    buffer: Box<dyn GpuBuffer>,
    batch_byte_budget: u64,
    batch_alignment: u64,
    max_buffer_size: u64,
    rebinds: u64,
}

impl BatchManager {
    /// Creates a manager around a buffer, growing it to the initial size.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot reach `initial_buffer_size`.
    pub fn new(config: &RenderConfig, mut buffer: Box<dyn GpuBuffer>) -> RenderResult<Self> {
        if buffer.size() < config.initial_buffer_size {
            buffer.resize(config.initial_buffer_size)?;
        }

        let mut heap = HeapAllocator::new(config.max_buffer_size);
        // The header lives at offset zero for the whole lifetime of the heap.
        let header = heap.allocate(BUFFER_HEADER_SIZE, config.batch_alignment);
        debug_assert_eq!(header, Some(HeapBlock::new(0, BUFFER_HEADER_SIZE)));

        Ok(Self {
            heap,
            batches: Vec::new(),
            free_indices: Vec::new(),
            buffer,
            batch_byte_budget: config.batch_byte_budget,
            batch_alignment: config.batch_alignment,
            max_buffer_size: config.max_buffer_size,
            rebinds: 0,
        })
    }

    /// Returns the GPU buffer.
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> &dyn GpuBuffer {
        self.buffer.as_ref()
    }

    /// Returns the GPU buffer mutably.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut dyn GpuBuffer {
        self.buffer.as_mut()
    }

    /// Returns the current buffer handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// Returns the heap allocator.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &HeapAllocator {
        &self.heap
    }

    /// Returns the number of rebinds so far.
    #[inline]
    #[must_use]
    pub const fn rebind_count(&self) -> u64 {
        self.rebinds
    }

    /// Returns the bytes of each batch.
    #[inline]
    #[must_use]
    pub const fn batch_byte_budget(&self) -> u64 {
        self.batch_byte_budget
    }

    /// Returns a batch by index.
    #[inline]
    #[must_use]
    pub fn batch(&self, index: u32) -> Option<&Batch> {
        self.batches.get(index as usize).and_then(Option::as_ref)
    }

    /// Returns every batch slot; None marks a released index.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[Option<Batch>] {
        &self.batches
    }

    /// Iterates over live batches with their indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Batch)> {
        self.batches
            .iter()
            .enumerate()
            .filter_map(|(index, batch)| batch.as_ref().map(|batch| (index as u32, batch)))
    }

    /// Returns the number of live batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len() - self.free_indices.len()
    }

    /// Checks if a batch lies inside the current buffer.
    #[inline]
    #[must_use]
    pub fn is_resident(&self, batch: &Batch) -> bool {
        batch.block.end <= self.buffer.size()
    }

    /// Brings every archetype's batch count in line with its object count.
    ///
    /// Surplus batches of all archetypes are released first, always from the
    /// end of the archetype's list, then missing batches are allocated.
    /// Failed allocations are logged and retried on the next pass.
    #[tracing::instrument(skip_all, name = "batch_reconcile")]
    pub fn reconcile(&mut self, registry: &mut GraphicsArchetypeRegistry) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for archetype in registry.archetypes_mut() {
            let expected = archetype.expected_batches();
            while archetype.batches().len() > expected {
                let Some(index) = archetype.batches_mut().pop() else {
                    break;
                };
                self.release_batch(index);
                report.removed += 1;
            }
        }

        for (archetype_index, archetype) in registry.archetypes_mut().iter_mut().enumerate() {
            let expected = archetype.expected_batches();
            while archetype.batches().len() < expected {
                let Some(block) = self.heap.allocate(self.batch_byte_budget, self.batch_alignment)
                else {
                    report.failed_allocations += expected - archetype.batches().len();
                    break;
                };
                #[allow(clippy::cast_possible_truncation)]
                let batch = Batch {
                    block,
                    archetype: archetype_index as u32,
                    slot: archetype.batches().len() as u32,
                    object_count: 0,
                    bound_buffer: self.buffer.handle().id,
                    bounds: Aabb::EMPTY,
                    chunk_bounds: Vec::new(),
                };
                let index = self.insert_batch(batch);
                archetype.batches_mut().push(index);
                report.created += 1;
            }
        }

        if report.failed_allocations > 0 {
            report.hard_cap_exceeded =
                self.heap.used_space() + self.batch_byte_budget > self.heap.size();
            if report.hard_cap_exceeded {
                tracing::error!(
                    failed = report.failed_allocations,
                    max_buffer_size = self.max_buffer_size,
                    "gpu buffer hard cap reached, excess objects are not uploaded"
                );
            } else {
                tracing::warn!(
                    failed = report.failed_allocations,
                    largest_free = self.heap.largest_free_block(),
                    "batch allocation failed, retrying next frame"
                );
            }
        }

        let needed = self.heap.one_past_highest_used_address();
        if needed > self.buffer.size() {
            report.growth = self.grow_to_fit(needed);
            if report.growth.is_some() {
                report.rebind = Some(self.rebind_all());
            }
        }

        if report.created > 0 || report.removed > 0 {
            tracing::debug!(
                created = report.created,
                removed = report.removed,
                live = self.batch_count(),
                "batches reconciled"
            );
        }
        report
    }

    /// Recomputes batch and chunk bounds from per-object world bounds.
    ///
    /// Runs in parallel over batches; call it inside the worker pool.
    pub fn refresh_bounds(&mut self, registry: &GraphicsArchetypeRegistry, world_bounds: &Stash<Aabb>) {
        self.batches
            .par_iter_mut()
            .filter_map(Option::as_mut)
            .for_each(|batch| {
                let objects = registry
                    .archetype(batch.archetype)
                    .map_or(&[][..], |archetype| archetype.batch_objects(batch.slot as usize));

                batch.object_count = u32::try_from(objects.len()).unwrap_or(u32::MAX);
                batch.chunk_bounds.clear();
                batch.bounds = Aabb::EMPTY;
                for chunk in objects.chunks(CHUNK_SIZE) {
                    let bounds = chunk
                        .iter()
                        .filter_map(|&id| world_bounds.get(id))
                        .fold(Aabb::EMPTY, |acc, aabb| acc.union(aabb));
                    batch.bounds = batch.bounds.union(&bounds);
                    batch.chunk_bounds.push(bounds);
                }
            });
    }

    fn grow_to_fit(&mut self, needed: u64) -> Option<BufferGrowth> {
        let old_size = self.buffer.size();
        let mut new_size = old_size.max(1);
        let mut doublings = 0;
        while new_size < needed && new_size < self.max_buffer_size {
            new_size = new_size.saturating_mul(2).min(self.max_buffer_size);
            doublings += 1;
        }

        match self.buffer.resize(new_size) {
            Ok(()) => {
                tracing::info!(old_size, new_size, doublings, "gpu buffer grown");
                Some(BufferGrowth {
                    old_size,
                    new_size,
                    doublings,
                })
            }
            Err(err) => {
                tracing::error!(
                    %err,
                    needed,
                    "gpu buffer growth failed, batches past the end are not uploaded"
                );
                None
            }
        }
    }

    fn rebind_all(&mut self) -> BufferHandle {
        let handle = self.buffer.handle();
        for batch in self.batches.iter_mut().flatten() {
            batch.bound_buffer = handle.id;
        }
        self.rebinds += 1;
        handle
    }

    fn insert_batch(&mut self, batch: Batch) -> u32 {
        if let Some(index) = self.free_indices.pop() {
            self.batches[index as usize] = Some(batch);
            index
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let index = self.batches.len() as u32;
            self.batches.push(Some(batch));
            index
        }
    }

    fn release_batch(&mut self, index: u32) {
        if let Some(batch) = self.batches.get_mut(index as usize).and_then(Option::take) {
            self.heap.release(batch.block);
            self.free_indices.push(index);
        }
    }
}

impl std::fmt::Debug for BatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("batches", &self.batch_count())
            .field("used_bytes", &self.heap.used_space())
            .field("buffer", &self.buffer.handle())
            .finish_non_exhaustive()
    }
}
