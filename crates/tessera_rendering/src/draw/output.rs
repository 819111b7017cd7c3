//! What the instanced draw backend consumes.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::settings::FilterSettings;
use crate::error::{RenderError, RenderResult};

/// One instanced draw.
///
/// `visible_offset..visible_offset + visible_count` indexes
/// [`DrawCommandOutput::visible_instances`]; each entry there is an
/// object's index inside the command's batch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    /// First entry in the visible instance array.
    pub visible_offset: u32,
    /// Number of instances.
    pub visible_count: u32,
    /// Batch holding the instance data.
    pub batch_id: u32,
    /// Material handle.
    pub material: u32,
    /// Mesh handle.
    pub mesh: u32,
    /// Submesh index.
    pub submesh: u16,
    /// Splits the instances are visible in.
    pub split_mask: u8,
    /// Bits of [`super::DrawFlags`].
    pub flags: u8,
    /// First entry in the sorting position array, 0 when unsorted.
    pub sorting_position_offset: u32,
}

/// Consecutive draw commands sharing filter settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawRange {
    /// Index into the filter table.
    pub filter_index: u16,
    /// Settings at `filter_index`.
    pub filter_settings: FilterSettings,
    /// First command of the range.
    pub first_command: u32,
    /// Number of commands.
    pub command_count: u32,
    /// Instances over all commands.
    pub instance_count: u32,
}

/// Counters of one draw generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Unique bins.
    pub bins: u32,
    /// Contributing (worker, stream) pairs.
    pub work_items: u32,
    /// Presence filter bits that found no stream.
    pub presence_false_positives: u32,
    /// Visible instances.
    pub instances: u32,
    /// Draw commands.
    pub commands: u32,
    /// Draw ranges.
    pub ranges: u32,
    /// Visible objects skipped for lack of a render mesh.
    pub unmatched_objects: u32,
}

/// Draw commands and ranges of one culling request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawCommandOutput {
    /// Batch-local object index of every visible instance.
    pub visible_instances: Vec<u32>,
    /// World position of every instance of sorted bins.
    pub sorting_positions: Vec<Vec3>,
    /// Draw commands in bin order.
    pub commands: Vec<DrawCommand>,
    /// Draw ranges over `commands`.
    pub ranges: Vec<DrawRange>,
    /// Filter table the ranges refer to.
    pub filter_settings: Vec<FilterSettings>,
}

impl DrawCommandOutput {
    /// Returns the number of visible instances.
    #[inline]
    #[must_use]
    pub fn visible_instance_count(&self) -> usize {
        self.visible_instances.len()
    }

    /// Returns the number of draw commands.
    #[inline]
    #[must_use]
    pub fn draw_command_count(&self) -> usize {
        self.commands.len()
    }

    /// Returns the number of draw ranges.
    #[inline]
    #[must_use]
    pub fn draw_range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Returns the commands as bytes, ready for upload.
    #[must_use]
    pub fn command_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.commands)
    }

    /// Returns the commands of a range.
    #[must_use]
    pub fn range_commands(&self, range: &DrawRange) -> &[DrawCommand] {
        let start = range.first_command as usize;
        let end = start + range.command_count as usize;
        self.commands.get(start..end).unwrap_or(&[])
    }

    /// Empties the output, keeping the allocations.
    pub fn clear(&mut self) {
        self.visible_instances.clear();
        self.sorting_positions.clear();
        self.commands.clear();
        self.ranges.clear();
        self.filter_settings.clear();
    }

    /// Checks that counts and offsets agree.
    ///
    /// Commands must tile the instance array in order, ranges must tile the
    /// command array in order, and every sorting offset must be in bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InconsistentOutput`] naming the first mismatch.
    pub fn validate(&self) -> RenderResult<()> {
        let fail = |message: String| Err(RenderError::InconsistentOutput(message));

        let mut expected_offset = 0u32;
        for (index, command) in self.commands.iter().enumerate() {
            if command.visible_offset != expected_offset {
                return fail(format!(
                    "command {index} starts at {} instead of {expected_offset}",
                    command.visible_offset
                ));
            }
            if command.visible_count == 0 {
                return fail(format!("command {index} is empty"));
            }
            let sorted = command.flags & super::DrawFlags::HAS_SORTING_POSITION.bits() != 0;
            if sorted && command.sorting_position_offset as usize >= self.sorting_positions.len() {
                return fail(format!("command {index} sorting offset out of bounds"));
            }
            expected_offset += command.visible_count;
        }
        if expected_offset as usize != self.visible_instances.len() {
            return fail(format!(
                "commands cover {expected_offset} of {} instances",
                self.visible_instances.len()
            ));
        }

        let mut expected_command = 0u32;
        for (index, range) in self.ranges.iter().enumerate() {
            if range.first_command != expected_command || range.command_count == 0 {
                return fail(format!("range {index} does not continue at command {expected_command}"));
            }
            let commands = self.range_commands(range);
            let instances: u32 = commands.iter().map(|command| command.visible_count).sum();
            if commands.len() != range.command_count as usize || instances != range.instance_count {
                return fail(format!("range {index} counts disagree with its commands"));
            }
            if self.filter_settings.get(usize::from(range.filter_index)) != Some(&range.filter_settings) {
                return fail(format!("range {index} filter settings mismatch"));
            }
            expected_command += range.command_count;
        }
        if expected_command as usize != self.commands.len() {
            return fail(format!(
                "ranges cover {expected_command} of {} commands",
                self.commands.len()
            ));
        }
        Ok(())
    }
}
