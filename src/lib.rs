//! Destructible voxel world core: chunked volume storage, connectivity-based
//! island detection, detachable voxel-body rigid-body physics, and the
//! broadphase/BVH/proxy machinery a host uses to step and query it.
//!
//! Data-Oriented: every module here is plain data plus free functions. A host
//! owns a [`voxel::Volume`] and a [`physics::VoxelObjectWorld`] (optionally a
//! [`physics::ProxyPhysicsState`] for lightweight dynamics objects) and drives
//! them once per tick — there is no engine loop, window, or renderer inside
//! this crate; it produces the data a renderer or network layer would
//! consume, but never owns either.

pub mod constants;
pub mod error;
pub mod physics;
pub mod rng;
pub mod voxel;

pub use error::{CoreError, CoreResult};
pub use physics::{VoxelObject, VoxelObjectWorld};
pub use rng::Rng;
pub use voxel::{Bounds3D, Chunk, Volume};
