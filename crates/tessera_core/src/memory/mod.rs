//! # Memory Management
//!
//! Frame-scoped arenas and the heap allocator used for GPU address ranges.
//!
//! ## Design Philosophy
//!
//! - Transient per-frame data comes from one bump arena per worker
//! - Arenas are rewound once per frame, after every job that borrowed them
//! - Long-lived GPU ranges are managed by a best-fit heap with coalescing

mod arena;
mod heap;

pub use arena::{ThreadLocalAllocator, WorkerArena};
pub use heap::{HeapAllocator, HeapBlock};
