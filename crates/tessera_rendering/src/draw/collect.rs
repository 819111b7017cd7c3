//! Global bin collection and offset allocation.

use std::collections::hash_map::Entry;

use crossbeam_utils::CachePadded;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::emit::{EmitterSlot, PresenceFilter};
use super::settings::DrawCommandSettings;
use crate::culling::BitIter;

/// All visible instances sharing one draw key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawCommandBin {
    /// Key of the bin.
    pub settings: DrawCommandSettings,
    /// Workers holding a verified stream for the key, one bit each.
    pub contributors: u64,
    /// Instances over all contributing streams.
    pub instance_count: u32,
    /// First entry in the visible instance array.
    pub instance_offset: u32,
    /// First entry in the sorting position array.
    pub position_offset: u32,
    /// First draw command.
    pub command_offset: u32,
    /// Draw commands of the bin.
    pub command_count: u32,
    /// First work item.
    pub work_item_offset: u32,
    /// Work items of the bin.
    pub work_item_count: u32,
}

impl DrawCommandBin {
    const fn new(settings: DrawCommandSettings) -> Self {
        Self {
            settings,
            contributors: 0,
            instance_count: 0,
            instance_offset: 0,
            position_offset: 0,
            command_offset: 0,
            command_count: 0,
            work_item_offset: 0,
            work_item_count: 0,
        }
    }

    /// Returns the number of sorting positions the bin writes.
    #[inline]
    #[must_use]
    pub const fn position_count(&self) -> u32 {
        if self.settings.has_sorting_position() {
            self.instance_count
        } else {
            0
        }
    }
}

/// One worker's stream contributing to a bin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkItem {
    /// Worker owning the stream.
    pub worker: u32,
    /// Stream index inside the worker's slot.
    pub stream: u32,
    /// Instances of earlier work items of the same bin.
    pub instance_prefix: u32,
}

/// Totals after offset allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinTotals {
    /// Visible instances.
    pub instances: u32,
    /// Sorting positions.
    pub positions: u32,
    /// Draw commands.
    pub commands: u32,
}

/// Appends one bin per distinct key, scanning workers then streams in order.
pub fn dedupe_bins(
    slots: &[CachePadded<EmitterSlot>],
    index: &mut FxHashMap<DrawCommandSettings, u32>,
    bins: &mut Vec<DrawCommandBin>,
) {
    index.clear();
    bins.clear();
    for slot in slots {
        for stream in slot.streams() {
            if let Entry::Vacant(entry) = index.entry(stream.settings) {
                #[allow(clippy::cast_possible_truncation)]
                entry.insert(bins.len() as u32);
                bins.push(DrawCommandBin::new(stream.settings));
            }
        }
    }
}

/// Resolves each bin's contributors through the presence filter.
///
/// Every set bit is checked against the worker's own stream map; bits that
/// find nothing are bucket collisions. Returns their count.
pub fn verify_bins(
    slots: &[CachePadded<EmitterSlot>],
    presence: &PresenceFilter,
    bins: &mut [DrawCommandBin],
) -> u32 {
    bins.par_iter_mut()
        .map(|bin| {
            let mut false_positives = 0;
            bin.contributors = 0;
            bin.instance_count = 0;
            for worker in BitIter(presence.workers(&bin.settings)) {
                let stream = slots
                    .get(worker)
                    .and_then(|slot| slot.find(&bin.settings).map(|stream| (slot, stream)));
                match stream {
                    Some((slot, stream)) => {
                        bin.contributors |= 1 << worker;
                        bin.instance_count += slot.streams()[stream as usize].instance_count;
                    }
                    None => false_positives += 1,
                }
            }
            false_positives
        })
        .sum()
}

/// Assigns array offsets to sorted bins and lays out their work items.
///
/// Sorted bins take one command per instance; others take
/// `ceil(instances / max_per_command)`.
pub fn allocate_bins(
    slots: &[CachePadded<EmitterSlot>],
    bins: &mut [DrawCommandBin],
    work_items: &mut Vec<WorkItem>,
    max_per_command: u32,
) -> BinTotals {
    let max_per_command = max_per_command.max(1);
    let mut totals = BinTotals::default();
    work_items.clear();

    for bin in bins.iter_mut() {
        bin.instance_offset = totals.instances;
        bin.position_offset = totals.positions;
        bin.command_offset = totals.commands;
        bin.command_count = if bin.settings.has_sorting_position() {
            bin.instance_count
        } else {
            bin.instance_count.div_ceil(max_per_command)
        };

        #[allow(clippy::cast_possible_truncation)]
        let first_item = work_items.len() as u32;
        let mut prefix = 0;
        for worker in BitIter(bin.contributors) {
            let Some(slot) = slots.get(worker) else {
                continue;
            };
            let Some(stream) = slot.find(&bin.settings) else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            work_items.push(WorkItem {
                worker: worker as u32,
                stream,
                instance_prefix: prefix,
            });
            prefix += slot.streams()[stream as usize].instance_count;
        }
        bin.work_item_offset = first_item;
        #[allow(clippy::cast_possible_truncation)]
        let item_count = work_items.len() as u32 - first_item;
        bin.work_item_count = item_count;

        totals.instances += bin.instance_count;
        totals.positions += bin.position_count();
        totals.commands += bin.command_count;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::DrawFlags;

    fn settings(material: u32, flags: DrawFlags) -> DrawCommandSettings {
        DrawCommandSettings {
            material,
            flags,
            ..DrawCommandSettings::default()
        }
    }

    fn slots_with(
        presence: &PresenceFilter,
        streams: &[(usize, DrawCommandSettings, usize)],
    ) -> Vec<CachePadded<EmitterSlot>> {
        let mut slots: Vec<CachePadded<EmitterSlot>> =
            (0..4).map(|_| CachePadded::new(EmitterSlot::default())).collect();
        for &(worker, key, count) in streams {
            let stream = slots[worker].stream_for(key, presence, worker);
            for lane in 0..count {
                stream.push(0, lane);
            }
        }
        slots
    }

    #[test]
    fn test_bins_are_unique_and_verified() {
        let presence = PresenceFilter::new(1);
        let a = settings(1, DrawFlags::empty());
        let b = settings(2, DrawFlags::empty());
        let slots = slots_with(&presence, &[(0, a, 3), (1, b, 2), (2, a, 4)]);

        let mut index = FxHashMap::default();
        let mut bins = Vec::new();
        dedupe_bins(&slots, &mut index, &mut bins);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].settings, a);

        // One bucket: every key sees workers 0, 1 and 2.
        let false_positives = verify_bins(&slots, &presence, &mut bins);
        assert_eq!(false_positives, 3);
        assert_eq!(bins[0].contributors, 0b101);
        assert_eq!(bins[0].instance_count, 7);
        assert_eq!(bins[1].contributors, 0b010);
    }

    #[test]
    fn test_allocation_offsets() {
        let presence = PresenceFilter::new(64);
        let plain = settings(1, DrawFlags::empty());
        let sorted = settings(2, DrawFlags::HAS_SORTING_POSITION);
        let slots = slots_with(&presence, &[(0, plain, 100), (3, plain, 30), (1, sorted, 5)]);

        let mut index = FxHashMap::default();
        let mut bins = Vec::new();
        dedupe_bins(&slots, &mut index, &mut bins);
        verify_bins(&slots, &presence, &mut bins);

        let mut work_items = Vec::new();
        let totals = allocate_bins(&slots, &mut bins, &mut work_items, 64);

        assert_eq!(totals, BinTotals { instances: 135, positions: 5, commands: 3 + 5 });
        assert_eq!((bins[0].command_count, bins[0].work_item_count), (3, 2));
        assert_eq!(work_items[1].instance_prefix, 100);
        assert_eq!(work_items[1].worker, 3);
        assert_eq!(
            (bins[1].instance_offset, bins[1].position_offset, bins[1].command_offset),
            (130, 0, 3)
        );
    }
}
