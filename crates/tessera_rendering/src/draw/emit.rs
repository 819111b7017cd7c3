//! Per-worker emission of visibility streams.
//!
//! Each worker walks its share of the culling output and appends the
//! visible objects to one stream per distinct [`DrawCommandSettings`].
//! The first time a worker opens a stream for a key it ORs its bit into the
//! shared presence filter; collection later only looks at workers whose bit
//! is set.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::{FxHashMap, FxHasher};

use super::settings::{DrawCommandSettings, RenderMesh};
use crate::archetype::GraphicsArchetypeRegistry;
use crate::batch::BatchManager;
use crate::culling::{BatchVisibilityItem, BitIter};
use tessera_core::Stash;

/// Visible objects of one chunk for one draw key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawCommandVisibility {
    /// Index of the chunk's first object inside the batch.
    pub chunk_start: u32,
    /// One bit per object of the chunk.
    pub visible: [u64; 2],
}

impl DrawCommandVisibility {
    /// Creates an entry with nothing visible.
    #[must_use]
    pub const fn new(chunk_start: u32) -> Self {
        Self {
            chunk_start,
            visible: [0; 2],
        }
    }

    /// Marks a lane visible.
    #[inline]
    pub fn set(&mut self, lane: usize) {
        self.visible[lane >> 6] |= 1 << (lane & 63);
    }

    /// Returns the number of visible lanes.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.visible[0].count_ones() + self.visible[1].count_ones()
    }

    /// Iterates over batch-local object indices, lowest first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        let start = self.chunk_start;
        self.visible.iter().enumerate().flat_map(move |(word, &bits)| {
            BitIter(bits).map(move |bit| start + (word * 64 + bit) as u32)
        })
    }
}

/// Every chunk a worker saw for one draw key, in chunk order.
#[derive(Clone, Debug, Default)]
pub struct VisibilityStream {
    /// Key of the stream.
    pub settings: DrawCommandSettings,
    /// Chunks with at least one visible object.
    pub chunks: Vec<DrawCommandVisibility>,
    /// Visible objects over all chunks.
    pub instance_count: u32,
}

impl VisibilityStream {
    fn reset(&mut self, settings: DrawCommandSettings) {
        self.settings = settings;
        self.chunks.clear();
        self.instance_count = 0;
    }

    /// Adds one visible object.
    pub fn push(&mut self, chunk_start: u32, lane: usize) {
        match self.chunks.last_mut() {
            Some(last) if last.chunk_start == chunk_start => last.set(lane),
            _ => {
                let mut entry = DrawCommandVisibility::new(chunk_start);
                entry.set(lane);
                self.chunks.push(entry);
            }
        }
        self.instance_count += 1;
    }
}

/// Hashed bitfield of which workers hold a stream for a key.
///
/// Two keys in one bucket share their bits, so a set bit may be a false
/// positive; a key present on a worker always has its bit set.
#[derive(Debug)]
pub struct PresenceFilter {
    buckets: Vec<AtomicU64>,
    mask: u64,
}

impl PresenceFilter {
    /// Creates a filter; `bucket_count` is rounded up to a power of two.
    #[must_use]
    pub fn new(bucket_count: usize) -> Self {
        let count = bucket_count.max(1).next_power_of_two();
        Self {
            buckets: (0..count).map(|_| AtomicU64::new(0)).collect(),
            mask: count as u64 - 1,
        }
    }

    fn bucket(&self, settings: &DrawCommandSettings) -> &AtomicU64 {
        let mut hasher = FxHasher::default();
        settings.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() & self.mask) as usize;
        &self.buckets[index]
    }

    /// Records that `worker` holds a stream for `settings`.
    #[inline]
    pub fn mark(&self, settings: &DrawCommandSettings, worker: usize) {
        self.bucket(settings).fetch_or(1 << worker, Ordering::Relaxed);
    }

    /// Returns the worker bits recorded for `settings`'s bucket.
    #[inline]
    #[must_use]
    pub fn workers(&self, settings: &DrawCommandSettings) -> u64 {
        self.bucket(settings).load(Ordering::Relaxed)
    }

    /// Clears every bucket.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket.get_mut() = 0;
        }
    }

    /// Returns the number of buckets.
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// One worker's streams. Storage is kept across frames.
#[derive(Debug, Default)]
pub struct EmitterSlot {
    index: FxHashMap<DrawCommandSettings, u32>,
    streams: Vec<VisibilityStream>,
    live: usize,
    unmatched: u32,
}

impl EmitterSlot {
    /// Drops every stream, keeping the allocations.
    pub fn reset(&mut self) {
        self.index.clear();
        self.live = 0;
        self.unmatched = 0;
    }

    /// Returns the live streams in creation order.
    #[inline]
    #[must_use]
    pub fn streams(&self) -> &[VisibilityStream] {
        &self.streams[..self.live]
    }

    /// Finds the stream of a key.
    #[inline]
    #[must_use]
    pub fn find(&self, settings: &DrawCommandSettings) -> Option<u32> {
        self.index.get(settings).copied()
    }

    /// Returns the visible objects that had no render mesh.
    #[inline]
    #[must_use]
    pub const fn unmatched(&self) -> u32 {
        self.unmatched
    }

    /// Returns the stream of a key, opening it on first use.
    pub fn stream_for(
        &mut self,
        settings: DrawCommandSettings,
        presence: &PresenceFilter,
        worker: usize,
    ) -> &mut VisibilityStream {
        let index = if let Some(&index) = self.index.get(&settings) {
            index as usize
        } else {
            let index = self.live;
            self.live += 1;
            if index == self.streams.len() {
                self.streams.push(VisibilityStream::default());
            }
            self.streams[index].reset(settings);
            #[allow(clippy::cast_possible_truncation)]
            self.index.insert(settings, index as u32);
            presence.mark(&settings, worker);
            index
        };
        &mut self.streams[index]
    }

    /// Emits the visible objects of a run of culling items.
    pub fn emit(
        &mut self,
        worker: usize,
        items: &[BatchVisibilityItem],
        batches: &BatchManager,
        registry: &GraphicsArchetypeRegistry,
        render_meshes: &Stash<RenderMesh>,
        presence: &PresenceFilter,
    ) {
        for item in items {
            let Some(batch) = batches.batch(item.batch_index) else {
                continue;
            };
            let objects = registry
                .archetype(batch.archetype)
                .map_or(&[][..], |archetype| archetype.batch_objects(batch.slot as usize));

            for lane in item.lanes() {
                let local = item.chunk_start as usize + lane;
                let Some(mesh) = objects.get(local).and_then(|&id| render_meshes.get(id)) else {
                    self.unmatched += 1;
                    continue;
                };
                let settings =
                    DrawCommandSettings::new(mesh, item.split_masks[lane], item.batch_index);
                self.stream_for(settings, presence, worker)
                    .push(item.chunk_start, lane);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(material: u32) -> DrawCommandSettings {
        DrawCommandSettings {
            material,
            ..DrawCommandSettings::default()
        }
    }

    #[test]
    fn test_stream_merges_same_chunk() {
        let mut stream = VisibilityStream::default();
        stream.push(0, 3);
        stream.push(0, 70);
        stream.push(128, 1);

        assert_eq!(stream.chunks.len(), 2);
        assert_eq!(stream.instance_count, 3);
        let indices: Vec<u32> = stream.chunks.iter().flat_map(|c| c.indices()).collect();
        assert_eq!(indices, vec![3, 70, 129]);
    }

    #[test]
    fn test_presence_never_misses() {
        // Two buckets force collisions.
        let filter = PresenceFilter::new(2);
        for material in 0..16 {
            filter.mark(&settings(material), (material % 4) as usize);
        }
        for material in 0..16 {
            let bit = 1u64 << (material % 4);
            assert_ne!(filter.workers(&settings(material)) & bit, 0);
        }
    }

    #[test]
    fn test_slot_reuses_streams() {
        let filter = PresenceFilter::new(64);
        let mut slot = EmitterSlot::default();
        slot.stream_for(settings(1), &filter, 0).push(0, 0);
        slot.stream_for(settings(2), &filter, 0).push(0, 1);
        slot.stream_for(settings(1), &filter, 0).push(0, 2);
        assert_eq!(slot.streams().len(), 2);
        assert_eq!(slot.streams()[0].instance_count, 2);

        slot.reset();
        assert!(slot.streams().is_empty());
        slot.stream_for(settings(3), &filter, 0).push(256, 5);
        assert_eq!(slot.streams()[0].settings, settings(3));
        assert_eq!(slot.streams()[0].instance_count, 1);
        assert_eq!(slot.find(&settings(1)), None);
    }
}
