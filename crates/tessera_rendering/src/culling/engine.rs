//! The culling engine: per-batch, per-chunk and per-object visibility.
//!
//! Batches are split into contiguous ranges, one per worker. Each worker
//! tests its batches against every split and appends one
//! [`BatchVisibilityItem`] per chunk with at least one visible object.
//! Concatenating the worker outputs in worker order keeps the result
//! ordered by batch index, then chunk.

use crossbeam_utils::CachePadded;
use glam::Vec3;
use rayon::prelude::*;

use super::frustum::{classify_aabb, Aabb, IntersectResult};
use super::request::{CullingRequest, MAX_SPLITS};
use super::splits::CullingSetup;
use crate::archetype::GraphicsArchetypeRegistry;
use crate::batch::{Batch, BatchManager, CHUNK_SIZE};
use crate::error::RenderResult;
use tessera_core::{ObjectId, Stash, ThreadLocalAllocator};

/// Visibility of one 128-object chunk of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchVisibilityItem {
    /// Index of the batch in the batch manager.
    pub batch_index: u32,
    /// Index of the chunk's first object inside the batch.
    pub chunk_start: u32,
    /// One bit per object of the chunk.
    pub visible: [u64; 2],
    /// Splits each object is visible in, one bit per split.
    pub split_masks: [u8; CHUNK_SIZE],
}

impl BatchVisibilityItem {
    /// Creates an item with nothing visible.
    #[must_use]
    pub const fn new(batch_index: u32, chunk_start: u32) -> Self {
        Self {
            batch_index,
            chunk_start,
            visible: [0; 2],
            split_masks: [0; CHUNK_SIZE],
        }
    }

    /// Marks an object visible in the splits of `mask`.
    #[inline]
    pub fn set(&mut self, lane: usize, mask: u8) {
        self.visible[lane >> 6] |= 1 << (lane & 63);
        self.split_masks[lane] = mask;
    }

    /// Checks if an object of the chunk is visible.
    #[inline]
    #[must_use]
    pub const fn is_visible(&self, lane: usize) -> bool {
        self.visible[lane >> 6] & (1 << (lane & 63)) != 0
    }

    /// Returns the number of visible objects.
    #[inline]
    #[must_use]
    pub const fn visible_count(&self) -> u32 {
        self.visible[0].count_ones() + self.visible[1].count_ones()
    }

    /// Checks if no object is visible.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.visible[0] == 0 && self.visible[1] == 0
    }

    /// Iterates over visible lanes, lowest first.
    pub fn lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.visible.iter().enumerate().flat_map(|(word_index, &word)| {
            BitIter(word).map(move |bit| word_index * 64 + bit)
        })
    }
}

/// Iterates over the set bits of a word, lowest first.
#[derive(Clone, Copy, Debug)]
pub struct BitIter(pub u64);

impl Iterator for BitIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

/// Counters of one culling pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CullingStats {
    /// Batches tested.
    pub batches_tested: u32,
    /// Batches outside every split.
    pub batches_outside: u32,
    /// Batches inside every split.
    pub batches_inside: u32,
    /// Batches needing chunk tests in at least one split.
    pub batches_partial: u32,
    /// Chunks tested against their bounds.
    pub chunks_tested: u32,
    /// Objects that reached the per-object stage.
    pub objects_tested: u32,
    /// Objects visible in at least one split.
    pub visible_objects: u32,
    /// Objects removed by the receiver sphere test.
    pub sphere_culled: u32,
}

impl CullingStats {
    /// Adds another worker's counters.
    pub fn merge(&mut self, other: &Self) {
        self.batches_tested += other.batches_tested;
        self.batches_outside += other.batches_outside;
        self.batches_inside += other.batches_inside;
        self.batches_partial += other.batches_partial;
        self.chunks_tested += other.chunks_tested;
        self.objects_tested += other.objects_tested;
        self.visible_objects += other.visible_objects;
        self.sphere_culled += other.sphere_culled;
    }
}

#[derive(Debug, Default)]
struct CullingWorker {
    items: Vec<BatchVisibilityItem>,
    stats: CullingStats,
}

/// Per-split classification of a batch or chunk.
type SplitClasses = [IntersectResult; MAX_SPLITS];

/// Runs culling requests against the resident batches.
#[derive(Debug, Default)]
pub struct CullingEngine {
    setup: CullingSetup,
    batch_list: Vec<u32>,
    workers: Vec<CachePadded<CullingWorker>>,
    items: Vec<BatchVisibilityItem>,
    stats: CullingStats,
}

impl CullingEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the items of the last request.
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[BatchVisibilityItem] {
        &self.items
    }

    /// Returns the counters of the last request.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> CullingStats {
        self.stats
    }

    /// Returns the setup of the last request.
    #[inline]
    #[must_use]
    pub const fn setup(&self) -> &CullingSetup {
        &self.setup
    }

    /// Culls every resident batch against a request.
    ///
    /// Runs one job per arena slot; call it inside the worker pool.
    ///
    /// # Errors
    ///
    /// Fails if the request has no splits or more than eight.
    #[tracing::instrument(skip_all, name = "culling")]
    pub fn cull(
        &mut self,
        request: &CullingRequest,
        batches: &BatchManager,
        registry: &GraphicsArchetypeRegistry,
        world_bounds: &Stash<Aabb>,
        arenas: &mut ThreadLocalAllocator,
    ) -> RenderResult<&[BatchVisibilityItem]> {
        self.setup.build(request)?;

        self.batch_list.clear();
        self.batch_list.extend(
            batches
                .iter()
                .filter(|(_, batch)| batch.object_count > 0 && batches.is_resident(batch))
                .map(|(index, _)| index),
        );

        let slots = arenas.slots_mut();
        self.workers.resize_with(slots.len(), Default::default);
        let per_worker = self.batch_list.len().div_ceil(slots.len().max(1)).max(1);

        let setup = &self.setup;
        let batch_list = &self.batch_list;
        slots
            .par_iter_mut()
            .zip(self.workers.par_iter_mut())
            .enumerate()
            .for_each(|(worker_index, (arena, worker))| {
                worker.items.clear();
                worker.stats = CullingStats::default();

                let start = (worker_index * per_worker).min(batch_list.len());
                let end = (start + per_worker).min(batch_list.len());
                if start == end {
                    return;
                }

                let bump = arena.bump();
                let mut scratch = ChunkScratch {
                    lanes: bumpalo::collections::Vec::with_capacity_in(CHUNK_SIZE, bump),
                    bounds: bumpalo::collections::Vec::with_capacity_in(CHUNK_SIZE, bump),
                };
                for &batch_index in &batch_list[start..end] {
                    let Some(batch) = batches.batch(batch_index) else {
                        continue;
                    };
                    let objects = registry
                        .archetype(batch.archetype)
                        .map_or(&[][..], |archetype| archetype.batch_objects(batch.slot as usize));
                    cull_batch(
                        setup,
                        batch_index,
                        batch,
                        objects,
                        world_bounds,
                        &mut scratch,
                        worker,
                    );
                }
            });

        self.items.clear();
        self.stats = CullingStats::default();
        for worker in &self.workers {
            self.items.extend_from_slice(&worker.items);
            self.stats.merge(&worker.stats);
        }

        tracing::debug!(
            batches = self.stats.batches_tested,
            items = self.items.len(),
            visible = self.stats.visible_objects,
            "culling finished"
        );
        Ok(&self.items)
    }
}

/// Per-chunk scratch gathered in the worker's arena.
struct ChunkScratch<'bump> {
    lanes: bumpalo::collections::Vec<'bump, u8>,
    bounds: bumpalo::collections::Vec<'bump, Aabb>,
}

fn classify_all(setup: &CullingSetup, aabb: &Aabb, classes: &mut SplitClasses) {
    let (center, extents) = setup.tested_box(aabb);
    for (split, class) in classes.iter_mut().enumerate().take(setup.split_count()) {
        if *class == IntersectResult::Partial {
            *class = classify_aabb(setup.packets(split), center, extents);
        }
    }
}

fn cull_batch(
    setup: &CullingSetup,
    batch_index: u32,
    batch: &Batch,
    objects: &[ObjectId],
    world_bounds: &Stash<Aabb>,
    scratch: &mut ChunkScratch<'_>,
    worker: &mut CullingWorker,
) {
    let split_count = setup.split_count();
    worker.stats.batches_tested += 1;

    // Partial means "not decided yet" before a test and "straddling" after.
    let mut batch_classes: SplitClasses = [IntersectResult::Outside; MAX_SPLITS];
    batch_classes[..split_count].fill(IntersectResult::Partial);
    classify_all(setup, &batch.bounds, &mut batch_classes);

    let active = &batch_classes[..split_count];
    if active.iter().all(|&class| class == IntersectResult::Outside) {
        worker.stats.batches_outside += 1;
        return;
    }
    if active.iter().all(|&class| class == IntersectResult::Inside) {
        worker.stats.batches_inside += 1;
    } else {
        worker.stats.batches_partial += 1;
    }

    for (chunk_index, chunk) in objects.chunks(CHUNK_SIZE).enumerate() {
        let mut classes = batch_classes;
        if active.contains(&IntersectResult::Partial) {
            if let Some(chunk_bounds) = batch.chunk_bounds.get(chunk_index) {
                worker.stats.chunks_tested += 1;
                classify_all(setup, chunk_bounds, &mut classes);
                if classes[..split_count]
                    .iter()
                    .all(|&class| class == IntersectResult::Outside)
                {
                    continue;
                }
            }
        }

        scratch.lanes.clear();
        scratch.bounds.clear();
        for (lane, &id) in chunk.iter().enumerate() {
            if let (Some(aabb), Ok(lane)) = (world_bounds.get(id), u8::try_from(lane)) {
                scratch.lanes.push(lane);
                scratch.bounds.push(*aabb);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut item = BatchVisibilityItem::new(batch_index, (chunk_index * CHUNK_SIZE) as u32);
        for (&lane, aabb) in scratch.lanes.iter().zip(scratch.bounds.iter()) {
            worker.stats.objects_tested += 1;
            let mut mask = object_split_mask(setup, &classes, aabb);
            if mask != 0 && setup.sphere_test() {
                mask = setup.refine_with_spheres(aabb, mask);
                if mask == 0 {
                    worker.stats.sphere_culled += 1;
                }
            }
            if mask != 0 {
                item.set(usize::from(lane), mask);
            }
        }

        if !item.is_empty() {
            worker.stats.visible_objects += item.visible_count();
            worker.items.push(item);
        }
    }
}

fn object_split_mask(setup: &CullingSetup, classes: &SplitClasses, aabb: &Aabb) -> u8 {
    let mut mask = 0u8;
    let mut tested: Option<(Vec3, Vec3)> = None;
    for (split, class) in classes.iter().enumerate().take(setup.split_count()) {
        let visible = match class {
            IntersectResult::Inside => true,
            IntersectResult::Outside => false,
            IntersectResult::Partial => {
                let (center, extents) = *tested.get_or_insert_with(|| setup.tested_box(aabb));
                classify_aabb(setup.packets(split), center, extents) != IntersectResult::Outside
            }
        };
        if visible {
            mask |= 1 << split;
        }
    }
    mask
}
