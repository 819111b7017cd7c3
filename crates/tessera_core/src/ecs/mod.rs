//! # Object Substrate
//!
//! The entity/data layer the renderer consumes.
//!
//! ## Design Philosophy
//!
//! - Objects are ids with a generation counter, stored in pre-allocated slots
//! - Each object carries a component mask; objects with the same mask form a
//!   **grouping**, the unit the renderer discovers archetypes from
//! - Typed per-object data lives in dense, id-indexed **stashes**

mod component;
mod entity;
mod filter;
mod storage;
mod world;

pub use component::{Component, ComponentMask};
pub use entity::{ObjectId, ObjectSlot};
pub use filter::Filter;
pub use storage::{ByteStash, Stash};
pub use world::{GroupingView, World};
