//! Rendering statistics.

use crate::batch::ReconcileReport;
use crate::culling::CullingStats;
use crate::draw::DrawStats;
use crate::upload::UploadReport;

/// Counters of the last update and cull.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    /// Frames started so far.
    pub frame_index: u64,
    /// Live graphics archetypes.
    pub archetypes: u32,
    /// Archetypes waiting to be committed.
    pub pending_archetypes: u32,
    /// Allocated batches.
    pub batches: u32,
    /// Current GPU buffer size in bytes.
    pub buffer_size: u64,
    /// Bytes allocated to batches and the header.
    pub heap_used: u64,
    /// Buffer rebinds since startup.
    pub rebinds: u64,
    /// Arena bytes in use over all workers.
    pub arena_bytes: usize,
    /// Last reconcile pass.
    pub reconcile: ReconcileReport,
    /// Last upload.
    pub upload: UploadReport,
    /// Last culling request.
    pub culling: CullingStats,
    /// Last draw command generation.
    pub draw: DrawStats,
}

impl RenderStats {
    /// Returns the share of tested objects that were visible.
    #[must_use]
    pub fn visible_ratio(&self) -> f32 {
        if self.culling.objects_tested == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.culling.visible_objects as f32 / self.culling.objects_tested as f32;
        ratio
    }

    /// Returns the share of the buffer occupied by batches.
    #[must_use]
    pub fn buffer_utilization(&self) -> f32 {
        if self.buffer_size == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.heap_used as f32 / self.buffer_size as f32;
        ratio
    }

    /// Returns true if every wanted batch has GPU memory.
    #[must_use]
    pub const fn all_batches_resident(&self) -> bool {
        self.reconcile.failed_allocations == 0 && self.upload.skipped_non_resident == 0
    }
}
