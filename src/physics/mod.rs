//! Physics: volume contact primitives, the detachable voxel-body world, the
//! BVH over bodies, the three broadphases, terrain/object detach, and the
//! generic proxy step.

pub mod aabb;
pub mod body;
pub mod broadphase;
pub mod bvh;
pub mod contact;
pub mod detach;
pub mod proxy;

pub use aabb::AABB;
pub use body::{VoxelObject, VoxelObjectWorld};
pub use bvh::Bvh;
pub use contact::{ContactResult, VoxelContact};
pub use proxy::{Fragment, Proxy, ProxyPhysicsState};

/// Entity ID type shared by proxies and voxel bodies alike.
pub type EntityId = u32;
