//! # Sparse GPU Heap
//!
//! All instance data lives in one raw GPU buffer. The buffer is carved into
//! fixed-size batches by a best-fit heap; each graphics archetype owns an
//! ordered list of batches sized to its object count.
//!
//! ## Buffer layout
//!
//! ```text
//! [header 64B][batch][batch][free][batch]...[unallocated tail]
//!                                              ^ grows by doubling
//! ```
//!
//! Inside a batch, properties are stored as arrays:
//! `[prop0 x max][pad to 16][prop1 x max][pad to 16]...`

mod buffer;
mod manager;

pub use buffer::{BufferHandle, GpuBuffer, HostBuffer, HostBufferReader};
#[cfg(feature = "wgpu")]
pub use buffer::WgpuBuffer;
pub use manager::{Batch, BatchManager, BufferGrowth, ReconcileReport};

/// Bytes reserved at the start of the buffer for the zeroed header.
pub const BUFFER_HEADER_SIZE: u64 = 64;

/// Objects per culling chunk, one visibility bit each.
pub const CHUNK_SIZE: usize = 128;
