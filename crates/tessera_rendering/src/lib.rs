//! # TESSERA Rendering
//!
//! GPU-instanced rendering runtime core:
//! - Objects with the same property overrides share a graphics archetype
//! - Archetypes own fixed-size batches carved out of one growable GPU buffer
//! - Culling walks batches, 128-object chunks, then objects, per split
//! - Visible objects become sorted draw commands grouped into draw ranges
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FRAME PIPELINE                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  update:  Scene → Archetypes → Batches (sparse heap) → Upload │
//! │                                                               │
//! │  cull:    Batches → Chunks → Objects → Visibility items       │
//! │              ↓                                                │
//! │           Emit → Collect → Sort → Expand → Draw ranges        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Transient per-frame memory comes from per-worker arenas
//! - Workers write disjoint output ranges; nothing locks in the hot path
//! - Output order never depends on thread scheduling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod archetype;
pub mod batch;
pub mod config;
pub mod culling;
pub mod draw;
pub mod error;
pub mod pipeline;
pub mod scene;
pub mod upload;

pub use archetype::{
    GraphicsArchetype, GraphicsArchetypeRegistry, PropertyCatalog, PropertyFormat, PropertyId,
};
pub use batch::{
    BatchManager, BufferHandle, GpuBuffer, HostBuffer, HostBufferReader, ReconcileReport,
};
pub use config::RenderConfig;
pub use culling::{Aabb, CullingEngine, CullingRequest, CullingSplit, Plane, ViewKind};
pub use draw::{
    DrawCommand, DrawCommandOutput, DrawCommandPipeline, DrawFlags, DrawRange, FilterSettings,
    RenderMesh,
};
pub use error::{RenderError, RenderResult};
pub use pipeline::{FrameUpdate, InstancedRenderPipeline, RenderStats};
pub use scene::Scene;
pub use upload::GpuUploader;
