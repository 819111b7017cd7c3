//! Per-frame update results.

use crate::archetype::RegistryUpdate;
use crate::batch::{BufferHandle, ReconcileReport};
use crate::upload::UploadReport;

/// What one [`update`](super::InstancedRenderPipeline::update) changed.
///
/// The backend must rebind its shaders when `rebind()` returns a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameUpdate {
    /// Frame counter after the arena rewind.
    pub frame_index: u64,
    /// Registry changes.
    pub registry: RegistryUpdate,
    /// Batch allocation changes.
    pub reconcile: ReconcileReport,
    /// Upload counters.
    pub upload: UploadReport,
}

impl FrameUpdate {
    /// Returns the new buffer handle if the buffer was replaced.
    #[must_use]
    pub const fn rebind(&self) -> Option<BufferHandle> {
        self.reconcile.rebind
    }

    /// Returns true if archetypes or batches changed.
    #[must_use]
    pub const fn changed_layout(&self) -> bool {
        self.registry.committed > 0 || self.reconcile.created > 0 || self.reconcile.removed > 0
    }
}
