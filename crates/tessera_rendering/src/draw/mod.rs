//! # Draw Command Generation
//!
//! Turns culling output into sorted draw commands and draw ranges.
//!
//! ## Stages
//!
//! 1. **Emit** - each worker bins its visible objects into per-key streams
//!    and ORs its bit into the presence filter
//! 2. **Collect** - keys are deduplicated into bins; presence bits are
//!    verified against each worker's own map
//! 3. **Sort** - bins are ordered by key with a parallel sort-merge
//! 4. **Allocate** - prefix sums give every bin its array offsets
//! 5. **Expand** - bins write instances, sorting positions and commands
//!    into their own regions in parallel
//! 6. **Ranges** - consecutive commands with one filter are grouped
//!
//! Instance indices are batch-local: entry `i` of a command addresses
//! object `visible_instances[visible_offset + i]` of the command's batch.

mod collect;
mod emit;
mod expand;
mod output;
mod ranges;
mod settings;
mod sort;

pub use collect::{allocate_bins, dedupe_bins, verify_bins, BinTotals, DrawCommandBin, WorkItem};
pub use emit::{DrawCommandVisibility, EmitterSlot, PresenceFilter, VisibilityStream};
pub use expand::{expand_bins, ExpandContext};
pub use output::{DrawCommand, DrawCommandOutput, DrawRange, DrawStats};
pub use ranges::{build_ranges, RangeCaps};
pub use settings::{
    DrawCommandSettings, DrawFlags, FilterSettings, FilterTable, RenderMesh, ShadowCastingMode,
};
pub use sort::parallel_sort_merge;

use bumpalo::Bump;
use crossbeam_utils::CachePadded;
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::archetype::GraphicsArchetypeRegistry;
use crate::batch::BatchManager;
use crate::config::RenderConfig;
use crate::culling::BatchVisibilityItem;
use tessera_core::{Stash, MAX_WORKERS};

/// Scene state draw generation reads.
#[derive(Clone, Copy)]
pub struct DrawInputs<'a> {
    /// Batches the culling items refer to.
    pub batches: &'a BatchManager,
    /// Archetypes owning the batches.
    pub registry: &'a GraphicsArchetypeRegistry,
    /// What each object is drawn with.
    pub render_meshes: &'a Stash<RenderMesh>,
    /// Object transforms, for sorting positions.
    pub transforms: &'a Stash<Mat4>,
    /// Filter table the render meshes index into.
    pub filters: &'a [FilterSettings],
}

/// Generates draw commands from culling output.
///
/// All storage is kept across calls; a steady scene allocates nothing.
///
/// # Example
///
/// ```rust,ignore
/// let mut draws = DrawCommandPipeline::new(&config, pool.worker_count());
/// let output = pool.install(|| draws.generate(culling.items(), &inputs, arenas.primary().bump()));
/// backend.submit(output);
/// ```
#[derive(Debug)]
pub struct DrawCommandPipeline {
    slots: Vec<CachePadded<EmitterSlot>>,
    presence: PresenceFilter,
    bin_index: FxHashMap<DrawCommandSettings, u32>,
    bins: Vec<DrawCommandBin>,
    sort_scratch: Vec<DrawCommandBin>,
    work_items: Vec<WorkItem>,
    output: DrawCommandOutput,
    stats: DrawStats,
    sort_slices: usize,
    max_per_command: u32,
    range_caps: RangeCaps,
}

impl DrawCommandPipeline {
    /// Creates a pipeline with one emitter slot per worker.
    #[must_use]
    pub fn new(config: &RenderConfig, worker_count: usize) -> Self {
        let workers = worker_count.clamp(1, MAX_WORKERS);
        Self {
            slots: (0..workers).map(|_| CachePadded::new(EmitterSlot::default())).collect(),
            presence: PresenceFilter::new(config.presence_buckets),
            bin_index: FxHashMap::default(),
            bins: Vec::new(),
            sort_scratch: Vec::new(),
            work_items: Vec::new(),
            output: DrawCommandOutput::default(),
            stats: DrawStats::default(),
            sort_slices: config.sort_slices,
            max_per_command: config.max_instances_per_command,
            range_caps: RangeCaps {
                max_instances: config.max_instances_per_range,
                max_commands: config.max_commands_per_range,
            },
        }
    }

    /// Returns the output of the last call.
    #[inline]
    #[must_use]
    pub const fn output(&self) -> &DrawCommandOutput {
        &self.output
    }

    /// Returns the counters of the last call.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> DrawStats {
        self.stats
    }

    /// Returns the sorted bins of the last call.
    #[inline]
    #[must_use]
    pub fn bins(&self) -> &[DrawCommandBin] {
        &self.bins
    }

    /// Runs every stage over the culling items.
    ///
    /// Call it inside the worker pool. Transient job lists go to `bump`.
    #[tracing::instrument(skip_all, name = "draw_commands")]
    pub fn generate(
        &mut self,
        items: &[BatchVisibilityItem],
        inputs: &DrawInputs<'_>,
        bump: &Bump,
    ) -> &DrawCommandOutput {
        self.emit(items, inputs);

        dedupe_bins(&self.slots, &mut self.bin_index, &mut self.bins);
        let false_positives = verify_bins(&self.slots, &self.presence, &mut self.bins);

        parallel_sort_merge(
            &mut self.bins,
            &mut self.sort_scratch,
            self.sort_slices,
            |a, b| a.settings.cmp(&b.settings),
        );
        let totals = allocate_bins(
            &self.slots,
            &mut self.bins,
            &mut self.work_items,
            self.max_per_command,
        );

        self.output.clear();
        self.output.visible_instances.resize(totals.instances as usize, 0);
        self.output.sorting_positions.resize(totals.positions as usize, Vec3::ZERO);
        self.output
            .commands
            .resize(totals.commands as usize, DrawCommand::default());
        self.output.filter_settings.extend_from_slice(inputs.filters);

        let context = ExpandContext {
            slots: &self.slots,
            work_items: &self.work_items,
            batches: inputs.batches,
            registry: inputs.registry,
            transforms: inputs.transforms,
            max_per_command: self.max_per_command,
        };
        let DrawCommandOutput {
            visible_instances,
            sorting_positions,
            commands,
            ranges,
            filter_settings,
        } = &mut self.output;
        expand_bins(&context, &self.bins, visible_instances, sorting_positions, commands, bump);

        let commands = &*commands;
        build_ranges(
            self.bins.iter().flat_map(|bin| {
                let start = bin.command_offset as usize;
                let end = start + bin.command_count as usize;
                commands[start..end]
                    .iter()
                    .map(move |command| (bin.settings.filter_index, command.visible_count))
            }),
            self.range_caps,
            filter_settings,
            ranges,
        );

        #[allow(clippy::cast_possible_truncation)]
        let stats = DrawStats {
            bins: self.bins.len() as u32,
            work_items: self.work_items.len() as u32,
            presence_false_positives: false_positives,
            instances: totals.instances,
            commands: totals.commands,
            ranges: self.output.ranges.len() as u32,
            unmatched_objects: self.slots.iter().map(|slot| slot.unmatched()).sum(),
        };
        self.stats = stats;

        #[cfg(debug_assertions)]
        if let Err(err) = self.output.validate() {
            tracing::error!(%err, "draw output failed validation");
        }

        tracing::debug!(
            bins = self.stats.bins,
            instances = self.stats.instances,
            commands = self.stats.commands,
            ranges = self.stats.ranges,
            false_positives,
            "draw commands generated"
        );
        &self.output
    }

    fn emit(&mut self, items: &[BatchVisibilityItem], inputs: &DrawInputs<'_>) {
        self.presence.clear();
        let per_worker = items.len().div_ceil(self.slots.len()).max(1);
        let presence = &self.presence;
        self.slots
            .par_iter_mut()
            .enumerate()
            .for_each(|(worker, slot)| {
                slot.reset();
                let start = (worker * per_worker).min(items.len());
                let end = (start + per_worker).min(items.len());
                slot.emit(
                    worker,
                    &items[start..end],
                    inputs.batches,
                    inputs.registry,
                    inputs.render_meshes,
                    presence,
                );
            });
    }
}
