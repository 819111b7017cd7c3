//! # GPU Upload
//!
//! Copies per-object data into the batches' buffer regions.
//!
//! Every resident batch gets one matrix op, writing object-to-world and
//! world-to-object as packed 3x4 matrices, plus one raw op per override
//! property of its archetype. Ops are filled in parallel into disjoint
//! staging ranges and then committed in order. The buffer header is
//! zeroed by a one-time op.

mod staging;
mod uploader;

pub use staging::StagingBuffer;
pub use uploader::{
    GpuUploader, UploadKind, UploadOp, UploadReport, UploadSources, PACKED_MATRIX_SIZE,
};
