//! # Culling
//!
//! Visibility of batches, 128-object chunks and single objects against one
//! view with up to eight splits.
//!
//! ## Stages
//!
//! 1. **Setup** - plane packets per split, receiver planes appended when
//!    present, receiver spheres for stable shadow views
//! 2. **Batch test** - batch bounds per split: Outside skips the split,
//!    Inside marks every object, Partial goes deeper
//! 3. **Chunk test** - the same trichotomy on each chunk's bounds
//! 4. **Object test** - per-object planes, then the receiver spheres
//!
//! Split 0 has priority: once an object's shadow volume sits fully inside a
//! split's sphere, every later split is cleared for it.

mod engine;
mod frustum;
mod request;
mod splits;

pub use engine::{BatchVisibilityItem, BitIter, CullingEngine, CullingStats};
pub use frustum::{
    build_packets, classify_aabb, is_visible, Aabb, Frustum, IntersectResult, Plane,
    PlanePacket4,
};
pub use request::{CullingRequest, CullingSplit, ViewKind, MAX_SPLITS};
pub use splits::{CullingSetup, CullingSplitData};
