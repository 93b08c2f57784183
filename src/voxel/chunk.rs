//! Chunk: a fixed-size cube of voxels with hierarchical occupancy.
//!
//! Pure DOP: `Chunk` is plain data, every transformation below is a free
//! function taking `&Chunk`/`&mut Chunk`. Occupancy is implicit — a voxel is
//! solid iff its material is non-zero.

use crate::constants::chunk::{
    CHUNK_SIZE, CHUNK_SIZE_BITS, LEVEL1_PER_AXIS, REGIONS_PER_AXIS, REGION_SIZE, VOXELS_PER_CHUNK,
};

pub const MATERIAL_EMPTY: u8 = 0;

/// Chunk lifecycle state, mirroring upload scheduling: a chunk becomes
/// `Dirty` the instant a voxel write changes its material, and a host
/// renderer is expected to flip it back to `Active` once consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Empty,
    Loading,
    Active,
    Dirty,
    Uploading,
}

/// Hierarchical occupancy bitmask over a chunk's 8x8x8 regions.
///
/// `level0` bit `i` is set iff region `i` (one of 4x4x4 regions of 8x8x8
/// voxels) contains any solid voxel. `level1` bit `j` is set iff any of its
/// 2x2x2 child `level0` regions is set. `has_any` is the chunk-wide OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOccupancy {
    pub level0: u64,
    pub level1: u8,
    pub has_any: bool,
    pub solid_count: u32,
}

#[derive(Clone)]
pub struct Chunk {
    pub voxels: Vec<u8>,
    pub occupancy: ChunkOccupancy,
    pub state: ChunkState,
    pub dirty_frame: u32,
    pub coord: (i32, i32, i32),
}

/// Linear index from local voxel coordinates within a chunk.
pub fn voxel_index(x: i32, y: i32, z: i32) -> usize {
    (x + (y << CHUNK_SIZE_BITS) + (z << (CHUNK_SIZE_BITS * 2))) as usize
}

/// Extract local coordinates from a linear index.
pub fn voxel_coords(index: i32) -> (i32, i32, i32) {
    let mask = CHUNK_SIZE - 1;
    let x = index & mask;
    let y = (index >> CHUNK_SIZE_BITS) & mask;
    let z = (index >> (CHUNK_SIZE_BITS * 2)) & mask;
    (x, y, z)
}

pub fn in_bounds(x: i32, y: i32, z: i32) -> bool {
    x >= 0 && x < CHUNK_SIZE && y >= 0 && y < CHUNK_SIZE && z >= 0 && z < CHUNK_SIZE
}

pub fn create(cx: i32, cy: i32, cz: i32) -> Chunk {
    Chunk {
        voxels: vec![MATERIAL_EMPTY; VOXELS_PER_CHUNK],
        occupancy: ChunkOccupancy::default(),
        state: ChunkState::Empty,
        dirty_frame: 0,
        coord: (cx, cy, cz),
    }
}

pub fn get(chunk: &Chunk, x: i32, y: i32, z: i32) -> u8 {
    if !in_bounds(x, y, z) {
        return MATERIAL_EMPTY;
    }
    chunk.voxels[voxel_index(x, y, z)]
}

pub fn is_solid(chunk: &Chunk, x: i32, y: i32, z: i32) -> bool {
    get(chunk, x, y, z) != MATERIAL_EMPTY
}

pub fn set(chunk: &mut Chunk, x: i32, y: i32, z: i32, material: u8) {
    if !in_bounds(x, y, z) {
        return;
    }
    let idx = voxel_index(x, y, z);
    let old = chunk.voxels[idx];
    if old == material {
        return;
    }
    chunk.voxels[idx] = material;
    adjust_solid_count(chunk, old, material);
    update_occupancy_region(chunk, x / REGION_SIZE, y / REGION_SIZE, z / REGION_SIZE);
    mark_dirty(chunk);
}

fn adjust_solid_count(chunk: &mut Chunk, old: u8, new: u8) {
    if old == MATERIAL_EMPTY && new != MATERIAL_EMPTY {
        chunk.occupancy.solid_count += 1;
    } else if old != MATERIAL_EMPTY && new == MATERIAL_EMPTY {
        chunk.occupancy.solid_count -= 1;
    }
}

fn mark_dirty(chunk: &mut Chunk) {
    if chunk.state == ChunkState::Active {
        chunk.state = ChunkState::Dirty;
    }
}

/// Recompute the hierarchical occupancy bitmask from scratch.
pub fn rebuild_occupancy(chunk: &mut Chunk) {
    let mut level0 = 0u64;
    let mut level1 = 0u8;
    let mut solid_count = 0u32;

    for rz in 0..REGIONS_PER_AXIS {
        for ry in 0..REGIONS_PER_AXIS {
            for rx in 0..REGIONS_PER_AXIS {
                if region_has_solid(chunk, rx, ry, rz) {
                    let bit = region_bit(rx, ry, rz);
                    level0 |= 1u64 << bit;
                }
            }
        }
    }

    for rz in 0..LEVEL1_PER_AXIS {
        for ry in 0..LEVEL1_PER_AXIS {
            for rx in 0..LEVEL1_PER_AXIS {
                if level1_has_solid(level0, rx, ry, rz) {
                    let bit = rx + ry * LEVEL1_PER_AXIS + rz * LEVEL1_PER_AXIS * LEVEL1_PER_AXIS;
                    level1 |= 1u8 << bit;
                }
            }
        }
    }

    for &m in &chunk.voxels {
        if m != MATERIAL_EMPTY {
            solid_count += 1;
        }
    }

    chunk.occupancy.level0 = level0;
    chunk.occupancy.level1 = level1;
    chunk.occupancy.solid_count = solid_count;
    chunk.occupancy.has_any = solid_count > 0;
}

fn region_bit(rx: i32, ry: i32, rz: i32) -> i32 {
    rx + ry * REGIONS_PER_AXIS + rz * REGIONS_PER_AXIS * REGIONS_PER_AXIS
}

fn region_has_solid(chunk: &Chunk, rx: i32, ry: i32, rz: i32) -> bool {
    let (bx, by, bz) = (rx * REGION_SIZE, ry * REGION_SIZE, rz * REGION_SIZE);
    for z in 0..REGION_SIZE {
        for y in 0..REGION_SIZE {
            for x in 0..REGION_SIZE {
                let idx = voxel_index(bx + x, by + y, bz + z);
                if chunk.voxels[idx] != MATERIAL_EMPTY {
                    return true;
                }
            }
        }
    }
    false
}

fn level1_has_solid(level0: u64, l1x: i32, l1y: i32, l1z: i32) -> bool {
    for dz in 0..2 {
        for dy in 0..2 {
            for dx in 0..2 {
                let bit = region_bit(l1x * 2 + dx, l1y * 2 + dy, l1z * 2 + dz);
                if level0 & (1u64 << bit) != 0 {
                    return true;
                }
            }
        }
    }
    false
}

/// Recompute the level0 bit covering `(region_x, region_y, region_z)` and
/// propagate into its parent level1 bit. No-op if out of range.
pub fn update_occupancy_region(chunk: &mut Chunk, region_x: i32, region_y: i32, region_z: i32) {
    if region_x < 0
        || region_x >= REGIONS_PER_AXIS
        || region_y < 0
        || region_y >= REGIONS_PER_AXIS
        || region_z < 0
        || region_z >= REGIONS_PER_AXIS
    {
        return;
    }

    let l0_bit = region_bit(region_x, region_y, region_z);
    if region_has_solid(chunk, region_x, region_y, region_z) {
        chunk.occupancy.level0 |= 1u64 << l0_bit;
    } else {
        chunk.occupancy.level0 &= !(1u64 << l0_bit);
    }

    let (l1x, l1y, l1z) = (region_x / 2, region_y / 2, region_z / 2);
    let l1_bit = l1x + l1y * LEVEL1_PER_AXIS + l1z * LEVEL1_PER_AXIS * LEVEL1_PER_AXIS;
    if level1_has_solid(chunk.occupancy.level0, l1x, l1y, l1z) {
        chunk.occupancy.level1 |= 1u8 << l1_bit;
    } else {
        chunk.occupancy.level1 &= !(1u8 << l1_bit);
    }
}

/// Recompute occupancy for every 8x8x8 region touched by the inclusive
/// local-coordinate range `[x0,y0,z0]..=[x1,y1,z1]`, clamped to the chunk.
pub fn update_occupancy_range(
    chunk: &mut Chunk,
    x0: i32,
    y0: i32,
    z0: i32,
    x1: i32,
    y1: i32,
    z1: i32,
) {
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let z0 = z0.max(0);
    let x1 = x1.min(CHUNK_SIZE - 1);
    let y1 = y1.min(CHUNK_SIZE - 1);
    let z1 = z1.min(CHUNK_SIZE - 1);

    for rz in (z0 / REGION_SIZE)..=(z1 / REGION_SIZE) {
        for ry in (y0 / REGION_SIZE)..=(y1 / REGION_SIZE) {
            for rx in (x0 / REGION_SIZE)..=(x1 / REGION_SIZE) {
                update_occupancy_region(chunk, rx, ry, rz);
            }
        }
    }

    chunk.occupancy.has_any = chunk.occupancy.solid_count > 0;
}

pub fn fill(chunk: &mut Chunk, material: u8) {
    chunk.voxels.fill(material);

    if material == MATERIAL_EMPTY {
        chunk.occupancy = ChunkOccupancy::default();
    } else {
        chunk.occupancy.level0 = u64::MAX;
        chunk.occupancy.level1 = u8::MAX;
        chunk.occupancy.has_any = true;
        chunk.occupancy.solid_count = VOXELS_PER_CHUNK as u32;
    }

    mark_dirty(chunk);
}

/// Fill a sphere in local coordinates; returns the number of voxels whose
/// material changed.
pub fn fill_sphere(chunk: &mut Chunk, cx: f32, cy: f32, cz: f32, radius: f32, material: u8) -> u32 {
    let mut modified = 0u32;
    let radius_sq = radius * radius;

    let min_x = (cx - radius).floor() as i32;
    let max_x = (cx + radius).ceil() as i32;
    let min_y = (cy - radius).floor() as i32;
    let max_y = (cy + radius).ceil() as i32;
    let min_z = (cz - radius).floor() as i32;
    let max_z = (cz + radius).ceil() as i32;

    let (mut amin_x, mut amax_x) = (CHUNK_SIZE, -1);
    let (mut amin_y, mut amax_y) = (CHUNK_SIZE, -1);
    let (mut amin_z, mut amax_z) = (CHUNK_SIZE, -1);

    for z in min_z..=max_z {
        if z < 0 || z >= CHUNK_SIZE {
            continue;
        }
        let dz = z as f32 + 0.5 - cz;
        for y in min_y..=max_y {
            if y < 0 || y >= CHUNK_SIZE {
                continue;
            }
            let dy = y as f32 + 0.5 - cy;
            for x in min_x..=max_x {
                if x < 0 || x >= CHUNK_SIZE {
                    continue;
                }
                let dx = x as f32 + 0.5 - cx;
                if dx * dx + dy * dy + dz * dz > radius_sq {
                    continue;
                }

                let idx = voxel_index(x, y, z);
                let old = chunk.voxels[idx];
                if old == material {
                    continue;
                }
                chunk.voxels[idx] = material;
                adjust_solid_count(chunk, old, material);
                modified += 1;

                amin_x = amin_x.min(x);
                amax_x = amax_x.max(x);
                amin_y = amin_y.min(y);
                amax_y = amax_y.max(y);
                amin_z = amin_z.min(z);
                amax_z = amax_z.max(z);
            }
        }
    }

    if modified > 0 {
        update_occupancy_range(chunk, amin_x, amin_y, amin_z, amax_x, amax_y, amax_z);
        mark_dirty(chunk);
    }

    modified
}

/// Fill an axis-aligned box in local coordinates (inclusive, clamped);
/// returns the number of voxels whose material changed.
pub fn fill_box(
    chunk: &mut Chunk,
    x0: i32,
    y0: i32,
    z0: i32,
    x1: i32,
    y1: i32,
    z1: i32,
    material: u8,
) -> u32 {
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let z0 = z0.max(0);
    let x1 = x1.min(CHUNK_SIZE - 1);
    let y1 = y1.min(CHUNK_SIZE - 1);
    let z1 = z1.min(CHUNK_SIZE - 1);

    let mut modified = 0u32;
    for z in z0..=z1 {
        for y in y0..=y1 {
            for x in x0..=x1 {
                let idx = voxel_index(x, y, z);
                let old = chunk.voxels[idx];
                if old == material {
                    continue;
                }
                chunk.voxels[idx] = material;
                adjust_solid_count(chunk, old, material);
                modified += 1;
            }
        }
    }

    if modified > 0 {
        update_occupancy_range(chunk, x0, y0, z0, x1, y1, z1);
        mark_dirty(chunk);
    }

    modified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_has_no_occupancy() {
        let chunk = create(0, 0, 0);
        assert!(!chunk.occupancy.has_any);
        assert_eq!(chunk.occupancy.solid_count, 0);
    }

    #[test]
    fn set_marks_region_occupied_and_dirty() {
        let mut chunk = create(0, 0, 0);
        chunk.state = ChunkState::Active;
        set(&mut chunk, 3, 3, 3, 5);
        assert!(is_solid(&chunk, 3, 3, 3));
        assert!(chunk.occupancy.has_any);
        assert_eq!(chunk.occupancy.solid_count, 1);
        assert_eq!(chunk.state, ChunkState::Dirty);
    }

    #[test]
    fn clearing_last_voxel_clears_region_bit() {
        let mut chunk = create(0, 0, 0);
        set(&mut chunk, 1, 1, 1, 9);
        set(&mut chunk, 1, 1, 1, MATERIAL_EMPTY);
        assert!(!chunk.occupancy.has_any);
        assert_eq!(chunk.occupancy.level0, 0);
    }

    #[test]
    fn incremental_region_update_matches_full_rebuild() {
        let mut chunk = create(0, 0, 0);
        set(&mut chunk, 0, 0, 0, 1);
        set(&mut chunk, 31, 31, 31, 2);
        set(&mut chunk, 16, 16, 16, 3);
        let incremental = chunk.occupancy;

        rebuild_occupancy(&mut chunk);
        assert_eq!(chunk.occupancy, incremental);
    }

    #[test]
    fn fill_sphere_reports_modified_count_and_occupancy() {
        let mut chunk = create(0, 0, 0);
        let modified = fill_sphere(&mut chunk, 16.0, 16.0, 16.0, 3.0, 7);
        assert!(modified > 0);
        assert!(chunk.occupancy.has_any);
        assert_eq!(chunk.occupancy.solid_count, modified);
    }

    #[test]
    fn fill_box_clamped_to_bounds() {
        let mut chunk = create(0, 0, 0);
        let modified = fill_box(&mut chunk, -5, -5, -5, 2, 2, 2, 4);
        assert_eq!(modified, 3 * 3 * 3);
    }

    #[test]
    fn fill_uniform_sets_full_occupancy() {
        let mut chunk = create(0, 0, 0);
        fill(&mut chunk, 1);
        assert_eq!(chunk.occupancy.level0, u64::MAX);
        assert_eq!(chunk.occupancy.level1, u8::MAX);
        assert_eq!(chunk.occupancy.solid_count, VOXELS_PER_CHUNK as u32);
    }

    #[test]
    fn out_of_bounds_get_returns_empty() {
        let chunk = create(0, 0, 0);
        assert_eq!(get(&chunk, -1, 0, 0), MATERIAL_EMPTY);
        assert_eq!(get(&chunk, CHUNK_SIZE, 0, 0), MATERIAL_EMPTY);
    }
}
