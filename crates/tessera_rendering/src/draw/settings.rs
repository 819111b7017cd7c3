//! Draw command keys and render filter settings.

use std::cmp::Ordering;

use bitflags::bitflags;

bitflags! {
    /// Per-draw state that splits otherwise identical draws.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DrawFlags: u8 {
        /// Negative-scale transform, front faces are clockwise.
        const FLIP_WINDING = 1 << 0;
        /// Writes motion vectors.
        const HAS_MOTION = 1 << 1;
        /// Samples a baked lightmap.
        const IS_LIGHTMAPPED = 1 << 2;
        /// Needs per-instance sorting positions, one command per instance.
        const HAS_SORTING_POSITION = 1 << 3;
    }
}

/// How an object casts shadows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShadowCastingMode {
    /// No shadows.
    Off,
    /// Shadows from front faces.
    #[default]
    On,
    /// Shadows from both faces.
    TwoSided,
    /// Only the shadow is drawn.
    ShadowsOnly,
}

/// Render filter state shared by every command of a draw range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterSettings {
    /// Render layer, 0 to 31.
    pub render_layer: u8,
    /// Rendering layer mask.
    pub rendering_layer_mask: u32,
    /// Shadow casting mode.
    pub shadow_casting: ShadowCastingMode,
    /// Whether the objects receive shadows.
    pub receive_shadows: bool,
    /// Whether the objects write motion vectors.
    pub motion_vectors: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            render_layer: 0,
            rendering_layer_mask: 1,
            shadow_casting: ShadowCastingMode::On,
            receive_shadows: true,
            motion_vectors: false,
        }
    }
}

/// Deduplicated table of filter settings; draw ranges refer to it by index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterTable {
    entries: Vec<FilterSettings>,
}

impl FilterTable {
    /// Creates a table holding the default settings at index 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![FilterSettings::default()],
        }
    }

    /// Returns the index of `settings`, adding it if unseen.
    #[allow(clippy::cast_possible_truncation)]
    pub fn register(&mut self, settings: FilterSettings) -> u16 {
        if let Some(index) = self.entries.iter().position(|entry| *entry == settings) {
            return index as u16;
        }
        self.entries.push(settings);
        (self.entries.len() - 1) as u16
    }

    /// Returns the settings at an index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&FilterSettings> {
        self.entries.get(usize::from(index))
    }

    /// Returns every entry.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[FilterSettings] {
        &self.entries
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What an object is drawn with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderMesh {
    /// Material handle.
    pub material: u32,
    /// Mesh handle.
    pub mesh: u32,
    /// Submesh index.
    pub submesh: u16,
    /// Index into the filter table.
    pub filter_index: u16,
    /// Draw flags.
    pub flags: DrawFlags,
}

/// Key of one draw command bin.
///
/// Ordering is lexicographic over filter index, flags, material, mesh,
/// submesh and split mask, with the batch id last.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawCommandSettings {
    /// Index into the filter table.
    pub filter_index: u16,
    /// Draw flags.
    pub flags: DrawFlags,
    /// Material handle.
    pub material: u32,
    /// Mesh handle.
    pub mesh: u32,
    /// Submesh index.
    pub submesh: u16,
    /// Splits the instances are visible in.
    pub split_mask: u8,
    /// Batch holding the instances.
    pub batch_id: u32,
}

impl DrawCommandSettings {
    /// Builds the key of an object drawn from a batch.
    #[must_use]
    pub const fn new(mesh: &RenderMesh, split_mask: u8, batch_id: u32) -> Self {
        Self {
            filter_index: mesh.filter_index,
            flags: mesh.flags,
            material: mesh.material,
            mesh: mesh.mesh,
            submesh: mesh.submesh,
            split_mask,
            batch_id,
        }
    }

    /// Checks if the bin emits one command per instance.
    #[inline]
    #[must_use]
    pub const fn has_sorting_position(&self) -> bool {
        self.flags.contains(DrawFlags::HAS_SORTING_POSITION)
    }
}

impl PartialOrd for DrawCommandSettings {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DrawCommandSettings {
    fn cmp(&self, other: &Self) -> Ordering {
        self.filter_index
            .cmp(&other.filter_index)
            .then_with(|| self.flags.bits().cmp(&other.flags.bits()))
            .then_with(|| self.material.cmp(&other.material))
            .then_with(|| self.mesh.cmp(&other.mesh))
            .then_with(|| self.submesh.cmp(&other.submesh))
            .then_with(|| self.split_mask.cmp(&other.split_mask))
            .then_with(|| self.batch_id.cmp(&other.batch_id))
    }
}
