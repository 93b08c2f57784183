//! Tuning constants, grouped by subsystem.
//!
//! Mirrors the per-subsystem `#define` blocks of the source engine
//! (`chunk.h`, `volume.h`, `connectivity.h`, `voxel_object.h`, `bvh.h`,
//! `broadphase.h`, `spatial_hash.h`) collected into one place the way the
//! teacher groups engine-wide constants under `constants::core`,
//! `constants::buffer_layouts`, etc.

/// Chunk (C2) constants.
pub mod chunk {
    pub const CHUNK_SIZE: i32 = 32;
    pub const CHUNK_SIZE_BITS: u32 = 5; // 2^5 == CHUNK_SIZE
    pub const VOXELS_PER_CHUNK: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;
    /// Edge length, in voxels, of one occupancy sub-region (level0 bit).
    pub const REGION_SIZE: i32 = 8;
    /// 4x4x4 regions of 8^3 voxels cover a 32^3 chunk.
    pub const REGIONS_PER_AXIS: i32 = CHUNK_SIZE / REGION_SIZE;
    /// 2x2x2 level1 cells, each covering a 2x2x2 block of level0 regions.
    pub const LEVEL1_PER_AXIS: i32 = REGIONS_PER_AXIS / 2;
}

/// Volume (C3) constants.
pub mod volume {
    pub const MAX_CHUNKS_X: i32 = 16;
    pub const MAX_CHUNKS_Y: i32 = 8;
    pub const MAX_CHUNKS_Z: i32 = 16;

    pub const MAX_DIRTY_PER_FRAME: usize = 16;
    pub const MAX_EDITS_PER_TICK: usize = 4096;
    pub const DIRTY_RING_SIZE: usize = 64;
    pub const EDIT_BATCH_MAX_CHUNKS: usize = 64;
    pub const SHADOW_DIRTY_MAX: usize = 64;
}

/// Connectivity (C4) constants.
pub mod connectivity {
    pub const MAX_ISLANDS: usize = 64;
    pub const WORK_STACK_SIZE: usize = 16384;
}

/// VolumeContact (C5) constants.
pub mod contact {
    pub const MAX_VOXELS: usize = 64;
}

/// VoxelBody / VoxelObjectWorld (C6) constants.
pub mod vobj {
    pub const GRID_SIZE: i32 = 16;
    pub const TOTAL_VOXELS: usize = (GRID_SIZE * GRID_SIZE * GRID_SIZE) as usize;
    pub const MAX_OBJECTS: usize = 4096;

    pub const SPLIT_QUEUE_SIZE: usize = 64;
    pub const MAX_SPLITS_PER_TICK: usize = 4;
    pub const MAX_RECALCS_PER_TICK: usize = 8;

    /// Linear velocity below which a body starts accumulating its settle timer.
    pub const SLEEP_VELOCITY_THRESHOLD: f32 = 0.08;
    /// Angular velocity below which a body starts accumulating its settle timer.
    pub const SLEEP_ANGULAR_THRESHOLD: f32 = 0.15;
    /// Time at low velocity, grounded, before a body sleeps.
    pub const SLEEP_TIME_REQUIRED: f32 = 0.3;
    /// Velocity above which a sleeping body wakes.
    pub const WAKE_VELOCITY_THRESHOLD: f32 = 0.2;
    /// Below this impact speed, restitution is cut by an order of magnitude.
    pub const MIN_BOUNCE_VELOCITY: f32 = 0.3;
    /// Below this linear speed, topple torque is suppressed.
    pub const SETTLING_VELOCITY: f32 = 0.4;
    /// Post-collision floor-enforcement passes per tick.
    pub const COLLISION_GROUND_ITERATIONS: u32 = 3;
    /// Minimum relative velocity to apply a body-body collision impulse.
    pub const CONTACT_VELOCITY_THRESHOLD: f32 = 0.15;
    /// Body-body positional correction is scaled by this to prevent
    /// persistent overlap from exact separation converging too slowly.
    pub const COLLISION_OVER_CORRECTION: f32 = 1.02;
    /// Body-body tangential (friction) impulse coefficient, bounding the
    /// friction impulse at `mu * |j_n|`.
    pub const COLLISION_FRICTION_COEFF: f32 = 0.4;
    /// Below this impact speed, object-object restitution is cut further
    /// than the floor/terrain low-speed cut (0.3x vs 0.1x).
    pub const OBJECT_LOW_SPEED_RESTITUTION_SCALE: f32 = 0.3;
    /// Distance below the floor at which a body is deactivated outright.
    pub const OUT_OF_BOUNDS_MARGIN: f32 = 5.0;
    /// Split fragments below this voxel count are discarded rather than
    /// spawned as a new body.
    pub const MIN_RESIDUAL_COMPONENT_VOXELS: usize = 2;
}

/// BVH over bodies (C7) constants.
pub mod bvh {
    pub const MAX_OBJECTS: usize = 512;
    pub const MAX_NODES: usize = 1023;
    pub const LEAF_MAX_OBJECTS: usize = 4;
    pub const SAH_BINS: usize = 8;
    pub const MAX_DEPTH: u32 = 20;
}

/// Detach / terrain-detach (C8) defaults.
pub mod detach {
    pub const DEFAULT_MAX_ISLANDS_PER_TICK: i32 = 8;
    pub const DEFAULT_MIN_VOXELS_PER_ISLAND: i32 = 4;
    pub const DEFAULT_ANCHOR_Y_OFFSET: f32 = 0.1;
}

/// Spatial hash broadphase (C9) constants.
pub mod spatial_hash {
    pub const MAX_ENTRIES: usize = 262_144;
    pub const BUCKET_COUNT: usize = 32_768;
    pub const MAX_PER_CELL: usize = 128;
    pub const MAX_OBJECTS: usize = 65_536;
}

/// Uniform-grid broadphase (C9) constants.
pub mod uniform_grid {
    pub const GRID_SIZE: i32 = 32;
    pub const TOTAL_CELLS: usize = (GRID_SIZE * GRID_SIZE * GRID_SIZE) as usize;
    pub const MAX_OBJECTS: usize = 8192;
    pub const MAX_PAIRS: usize = 65_536;
    /// Objects beyond this many per cell are silently dropped from that
    /// cell's generation pass (REDESIGN R2: observable via `overflow_count`).
    pub const MAX_PER_CELL: usize = 32;
    pub const PAIR_HASH_SIZE: usize = 4096;
}
