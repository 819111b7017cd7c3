//! Instance expansion and draw command generation.

use bumpalo::Bump;
use crossbeam_utils::CachePadded;
use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::collect::{DrawCommandBin, WorkItem};
use super::emit::EmitterSlot;
use super::output::DrawCommand;
use crate::archetype::GraphicsArchetypeRegistry;
use crate::batch::BatchManager;
use tessera_core::{ObjectId, Stash};

/// One bin's disjoint share of the output arrays.
struct BinJob<'a> {
    bin: &'a DrawCommandBin,
    instances: &'a mut [u32],
    positions: &'a mut [Vec3],
    commands: &'a mut [DrawCommand],
}

/// Read-only state the expansion jobs share.
pub struct ExpandContext<'a> {
    /// Emitter slots holding the streams.
    pub slots: &'a [CachePadded<EmitterSlot>],
    /// Work items of every bin.
    pub work_items: &'a [WorkItem],
    /// Batches the bins draw from.
    pub batches: &'a BatchManager,
    /// Archetypes owning the batches, for batch object lists.
    pub registry: &'a GraphicsArchetypeRegistry,
    /// Object transforms, for sorting positions.
    pub transforms: &'a Stash<Mat4>,
    /// Instances per command for unsorted bins.
    pub max_per_command: u32,
}

impl ExpandContext<'_> {
    /// Objects of a batch in slot order.
    fn batch_objects(&self, batch_id: u32) -> &[ObjectId] {
        self.batches
            .batch(batch_id)
            .and_then(|batch| {
                self.registry
                    .archetype(batch.archetype)
                    .map(|archetype| archetype.batch_objects(batch.slot as usize))
            })
            .unwrap_or(&[])
    }
}

/// Writes every bin's instances, sorting positions and commands.
///
/// The output slices must be sized to the allocation totals. Each bin owns
/// the regions its offsets point at, so bins expand in parallel. The job
/// list lives in `bump`.
pub fn expand_bins(
    context: &ExpandContext<'_>,
    bins: &[DrawCommandBin],
    instances: &mut [u32],
    positions: &mut [Vec3],
    commands: &mut [DrawCommand],
    bump: &Bump,
) {
    let mut jobs = bumpalo::collections::Vec::with_capacity_in(bins.len(), bump);
    let (mut instances, mut positions, mut commands) = (instances, positions, commands);
    for bin in bins {
        let (bin_instances, rest) = std::mem::take(&mut instances).split_at_mut(bin.instance_count as usize);
        instances = rest;
        let (bin_positions, rest) = std::mem::take(&mut positions).split_at_mut(bin.position_count() as usize);
        positions = rest;
        let (bin_commands, rest) = std::mem::take(&mut commands).split_at_mut(bin.command_count as usize);
        commands = rest;
        jobs.push(BinJob {
            bin,
            instances: bin_instances,
            positions: bin_positions,
            commands: bin_commands,
        });
    }

    jobs.par_iter_mut().for_each(|job| expand_bin(context, job));
}

fn expand_bin(context: &ExpandContext<'_>, job: &mut BinJob<'_>) {
    let bin = job.bin;
    let instances = std::mem::take(&mut job.instances);
    let positions = std::mem::take(&mut job.positions);
    let commands = std::mem::take(&mut job.commands);
    let sorted = bin.settings.has_sorting_position();
    let objects = if sorted {
        context.batch_objects(bin.settings.batch_id)
    } else {
        &[]
    };

    let start = bin.work_item_offset as usize;
    let end = start + bin.work_item_count as usize;
    let mut cursor = 0usize;
    for item in &context.work_items[start..end] {
        debug_assert_eq!(item.instance_prefix as usize, cursor);
        let Some(stream) = context
            .slots
            .get(item.worker as usize)
            .and_then(|slot| slot.streams().get(item.stream as usize))
        else {
            continue;
        };
        for index in stream.chunks.iter().flat_map(|chunk| chunk.indices()) {
            let Some(slot) = instances.get_mut(cursor) else {
                break;
            };
            *slot = index;
            if sorted {
                positions[cursor] = objects
                    .get(index as usize)
                    .and_then(|&id| context.transforms.get(id))
                    .map_or(Vec3::ZERO, |transform| transform.w_axis.truncate());
            }
            cursor += 1;
        }
    }

    let template = DrawCommand {
        visible_offset: 0,
        visible_count: 0,
        batch_id: bin.settings.batch_id,
        material: bin.settings.material,
        mesh: bin.settings.mesh,
        submesh: bin.settings.submesh,
        split_mask: bin.settings.split_mask,
        flags: bin.settings.flags.bits(),
        sorting_position_offset: 0,
    };
    let per_command = if sorted { 1 } else { context.max_per_command.max(1) };
    let mut emitted = 0u32;
    for (index, command) in commands.iter_mut().enumerate() {
        let count = per_command.min(bin.instance_count - emitted);
        #[allow(clippy::cast_possible_truncation)]
        let position = if sorted { bin.position_offset + index as u32 } else { 0 };
        *command = DrawCommand {
            visible_offset: bin.instance_offset + emitted,
            visible_count: count,
            sorting_position_offset: position,
            ..template
        };
        emitted += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::PropertyCatalog;
    use crate::batch::HostBuffer;
    use crate::config::RenderConfig;
    use crate::draw::collect::{allocate_bins, dedupe_bins, verify_bins};
    use crate::draw::emit::PresenceFilter;
    use crate::draw::{DrawCommandSettings, DrawFlags};
    use rustc_hash::FxHashMap;

    struct Fixture {
        slots: Vec<CachePadded<EmitterSlot>>,
        bins: Vec<DrawCommandBin>,
        work_items: Vec<WorkItem>,
        instances: Vec<u32>,
        positions: Vec<Vec3>,
        commands: Vec<DrawCommand>,
    }

    fn run(streams: &[(usize, DrawCommandSettings, &[(u32, usize)])], max_per_command: u32) -> Fixture {
        let presence = PresenceFilter::new(16);
        let mut slots: Vec<CachePadded<EmitterSlot>> =
            (0..2).map(|_| CachePadded::new(EmitterSlot::default())).collect();
        for &(worker, key, lanes) in streams {
            let stream = slots[worker].stream_for(key, &presence, worker);
            for &(chunk_start, lane) in lanes {
                stream.push(chunk_start, lane);
            }
        }

        let mut index = FxHashMap::default();
        let mut bins = Vec::new();
        dedupe_bins(&slots, &mut index, &mut bins);
        verify_bins(&slots, &presence, &mut bins);
        bins.sort_by(|a, b| a.settings.cmp(&b.settings));
        let mut work_items = Vec::new();
        let totals = allocate_bins(&slots, &mut bins, &mut work_items, max_per_command);

        let mut instances = vec![u32::MAX; totals.instances as usize];
        let mut positions = vec![Vec3::NAN; totals.positions as usize];
        let mut commands = vec![DrawCommand::default(); totals.commands as usize];
        let transforms = Stash::new(0);
        let config = RenderConfig::default();
        let batches = BatchManager::new(&config, Box::new(HostBuffer::new(config.initial_buffer_size)))
            .expect("batch manager");
        let registry = GraphicsArchetypeRegistry::new(PropertyCatalog::new(config.batch_byte_budget));
        let context = ExpandContext {
            slots: &slots,
            work_items: &work_items,
            batches: &batches,
            registry: &registry,
            transforms: &transforms,
            max_per_command,
        };
        let bump = Bump::new();
        expand_bins(&context, &bins, &mut instances, &mut positions, &mut commands, &bump);
        Fixture {
            slots,
            bins,
            work_items,
            instances,
            positions,
            commands,
        }
    }

    fn key(material: u32, flags: DrawFlags) -> DrawCommandSettings {
        DrawCommandSettings {
            material,
            flags,
            ..DrawCommandSettings::default()
        }
    }

    #[test]
    fn test_indices_follow_bit_order() {
        let lanes: &[(u32, usize)] = &[(0, 1), (0, 5), (0, 64), (128, 0), (128, 127)];
        let fixture = run(&[(0, key(1, DrawFlags::empty()), lanes)], 4096);

        assert_eq!(fixture.instances, vec![1, 5, 64, 128, 255]);
        assert_eq!(fixture.commands.len(), 1);
        assert_eq!(fixture.commands[0].visible_count, 5);
        assert_eq!(fixture.slots[0].streams()[0].instance_count, 5);
    }

    #[test]
    fn test_workers_concatenate_in_order() {
        let a = key(1, DrawFlags::empty());
        let first: &[(u32, usize)] = &[(0, 2), (0, 3)];
        let second: &[(u32, usize)] = &[(256, 9)];
        let fixture = run(&[(1, a, second), (0, a, first)], 4096);

        assert_eq!(fixture.bins.len(), 1);
        assert_eq!(fixture.work_items.len(), 2);
        assert_eq!(fixture.instances, vec![2, 3, 265]);
    }

    #[test]
    fn test_commands_slice_instances() {
        let lanes: Vec<(u32, usize)> = (0..10).map(|lane| (0, lane)).collect();
        let sorted_lanes: &[(u32, usize)] = &[(0, 0), (0, 1)];
        let fixture = run(
            &[
                (0, key(1, DrawFlags::empty()), lanes.as_slice()),
                (0, key(2, DrawFlags::HAS_SORTING_POSITION), sorted_lanes),
            ],
            4,
        );

        let counts: Vec<u32> = fixture.commands.iter().map(|c| c.visible_count).collect();
        assert_eq!(counts, vec![4, 4, 2, 1, 1]);
        let offsets: Vec<u32> = fixture.commands.iter().map(|c| c.visible_offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 10, 11]);
        assert_eq!(fixture.commands[4].sorting_position_offset, 1);
        // No transforms: positions fall back to the origin.
        assert_eq!(fixture.positions, vec![Vec3::ZERO; 2]);
    }
}
