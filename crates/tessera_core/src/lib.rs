//! # TESSERA Core
//!
//! The substrate the instanced rendering pipeline runs on:
//! - Per-worker frame arenas rewound once per frame
//! - A best-fit heap allocator over GPU byte ranges
//! - Object ids, component masks, groupings and typed stashes
//! - A fixed worker pool for parallel-for jobs
//!
//! ## Architecture Rules
//!
//! 1. **No per-object heap allocations in the hot path** - transient memory comes from arenas
//! 2. **Data-oriented design** - per-object data lives in dense, id-indexed arrays
//! 3. **Workers never lock each other** - per-worker state is padded and indexed by worker id
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{World, ComponentMask};
//!
//! let mut world = World::new(100_000);
//! let id = world.spawn(ComponentMask::EMPTY.with(0));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;
pub mod jobs;
pub mod memory;

pub use ecs::{
    ByteStash, Component, ComponentMask, Filter, GroupingView, ObjectId, ObjectSlot, Stash,
    World,
};
pub use error::{CoreError, CoreResult};
pub use jobs::{WorkerPool, MAX_WORKERS};
pub use memory::{HeapAllocator, HeapBlock, ThreadLocalAllocator, WorkerArena};
