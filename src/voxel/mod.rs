//! Voxel data model: chunks, the chunk grid (volume), and connectivity
//! analysis for destructible terrain.

pub mod chunk;
pub mod connectivity;
pub mod volume;

pub use chunk::Chunk;
pub use connectivity::{AnchorType, ConnectivityResult, ConnectivityWorkBuffer, IslandInfo};
pub use volume::{Bounds3D, Volume};
