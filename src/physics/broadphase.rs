//! Broadphase pair-finding: spatial hash, sweep-and-prune, and uniform grid.
//!
//! All three are bounded and allocate only at construction time, grounded on
//! the teacher's preallocated-table style (`memory::pools`-style fixed
//! capacity, grow-never) and on `engine/core/spatial_hash.h/.c` +
//! `engine/physics/broadphase.h` for the hashing and cell-bucket layout. The
//! sweep-and-prune sweep itself has no surviving source file in the pack; it
//! is built directly from SPEC_FULL.md §4.9's one-axis endpoint description,
//! which is the textbook formulation.
//!
//! Every query here returns each unordered pair exactly once, lower index
//! first — callers (body-body collision, proxy-proxy collision) rely on this
//! to avoid double-resolving a contact.

use std::hash::{Hash, Hasher};

use glam::Vec3;
use rustc_hash::FxHasher;

use crate::constants::spatial_hash as sh_const;
use crate::constants::uniform_grid as ug_const;

fn order_pair(a: i32, b: i32) -> (i32, i32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------
// Spatial hash
// ---------------------------------------------------------------------

/// Open-addressed hash over integer cell coordinates. Each active body is
/// inserted into the single cell containing its center; queries scan the
/// 3x3x3 neighborhood, so `cell_size` should be at least as large as the
/// largest body's bounding diameter for single-cell coverage to hold.
pub struct SpatialHash {
    cell_size: f32,
    buckets: Vec<Vec<i32>>,
    seen_generation: Vec<u32>,
    generation: u32,
    overflow_count: u32,
}

fn hash_cell(cx: i32, cy: i32, cz: i32) -> usize {
    let mut hasher = FxHasher::default();
    (cx, cy, cz).hash(&mut hasher);
    (hasher.finish() as usize) % sh_const::BUCKET_COUNT
}

pub fn create_spatial_hash(cell_size: f32) -> SpatialHash {
    SpatialHash {
        cell_size,
        buckets: vec![Vec::new(); sh_const::BUCKET_COUNT],
        seen_generation: vec![0u32; sh_const::MAX_OBJECTS],
        generation: 0,
        overflow_count: 0,
    }
}

fn cell_of(hash: &SpatialHash, pos: Vec3) -> (i32, i32, i32) {
    (
        (pos.x / hash.cell_size).floor() as i32,
        (pos.y / hash.cell_size).floor() as i32,
        (pos.z / hash.cell_size).floor() as i32,
    )
}

pub fn clear_spatial_hash(hash: &mut SpatialHash) {
    for bucket in &mut hash.buckets {
        bucket.clear();
    }
    hash.overflow_count = 0;
}

pub fn insert(hash: &mut SpatialHash, object_index: i32, center: Vec3) {
    let (cx, cy, cz) = cell_of(hash, center);
    let bucket = &mut hash.buckets[hash_cell(cx, cy, cz)];
    if bucket.len() < sh_const::MAX_PER_CELL {
        bucket.push(object_index);
    } else {
        hash.overflow_count += 1;
    }
}

pub fn overflow_count(hash: &SpatialHash) -> u32 {
    hash.overflow_count
}

/// Appends every distinct object index found within `radius` of `center`,
/// other than objects the caller filters out itself. Does not dedup against
/// `out`'s prior contents — callers doing repeated queries should clear `out`
/// between calls.
pub fn query(hash: &mut SpatialHash, center: Vec3, radius: f32, out: &mut Vec<i32>) {
    hash.generation += 1;
    let gen = hash.generation;

    let (cx, cy, cz) = cell_of(hash, center);
    let cell_radius = (radius / hash.cell_size).ceil() as i32 + 1;

    for dz in -cell_radius..=cell_radius {
        for dy in -cell_radius..=cell_radius {
            for dx in -cell_radius..=cell_radius {
                let bucket = &hash.buckets[hash_cell(cx + dx, cy + dy, cz + dz)];
                for &obj in bucket {
                    let slot = obj as usize;
                    if slot < hash.seen_generation.len() {
                        if hash.seen_generation[slot] == gen {
                            continue;
                        }
                        hash.seen_generation[slot] = gen;
                    }
                    out.push(obj);
                }
            }
        }
    }
}

/// Rebuild the table from scratch and return every colliding pair (lower
/// index first, each emitted once). `bodies` is `(index, center, radius)`.
pub fn spatial_hash_find_pairs(hash: &mut SpatialHash, bodies: &[(i32, Vec3, f32)]) -> Vec<(i32, i32)> {
    clear_spatial_hash(hash);
    for &(idx, center, _) in bodies {
        insert(hash, idx, center);
    }

    let mut pairs = Vec::new();
    let mut neighbors = Vec::new();
    for &(idx, center, radius) in bodies {
        neighbors.clear();
        query(hash, center, radius, &mut neighbors);
        for &other in &neighbors {
            if other == idx {
                continue;
            }
            let (a, b) = order_pair(idx, other);
            if a == idx {
                // Only the lower-indexed body in the pair emits it, so each
                // unordered pair surfaces exactly once.
                pairs.push((a, b));
            }
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

// ---------------------------------------------------------------------
// Sweep and prune
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    x: f32,
    index: i32,
    is_min: bool,
}

/// One-axis sweep and prune over AABBs: sort endpoints along X, sweep
/// maintaining an active set, confirm Y/Z overlap for every pair the X sweep
/// brings together.
pub fn sweep_and_prune_find_pairs(bodies: &[(i32, Vec3, Vec3)]) -> Vec<(i32, i32)> {
    let mut endpoints = Vec::with_capacity(bodies.len() * 2);
    for &(idx, min, max) in bodies {
        endpoints.push(Endpoint { x: min.x, index: idx, is_min: true });
        endpoints.push(Endpoint { x: max.x, index: idx, is_min: false });
    }
    endpoints.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());

    let mut active: Vec<i32> = Vec::new();
    let mut pairs = Vec::new();

    for ep in &endpoints {
        if ep.is_min {
            for &other in &active {
                let (a, b) = order_pair(ep.index, other);
                let ba = bodies.iter().find(|e| e.0 == a).unwrap();
                let bb = bodies.iter().find(|e| e.0 == b).unwrap();
                if yz_overlap(ba.1, ba.2, bb.1, bb.2) {
                    pairs.push((a, b));
                }
            }
            active.push(ep.index);
        } else {
            active.retain(|&i| i != ep.index);
        }
    }

    pairs
}

fn yz_overlap(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
    min_a.y <= max_b.y && max_a.y >= min_b.y && min_a.z <= max_b.z && max_a.z >= min_b.z
}

// ---------------------------------------------------------------------
// Uniform grid
// ---------------------------------------------------------------------

/// Fixed-extent uniform grid over world space, grounded on the same cell
/// bucketing strategy as [`SpatialHash`] but with a dense array of cells
/// instead of a hash table, and a bitset for O(1) pair dedup instead of a
/// generation-stamped scratch vector.
pub struct UniformGrid {
    origin: Vec3,
    cell_size: f32,
    cells: Vec<Vec<i32>>,
    overflow_count: u32,
    pair_seen: Vec<u64>,
}

pub fn create_uniform_grid(origin: Vec3, cell_size: f32) -> UniformGrid {
    UniformGrid {
        origin,
        cell_size,
        cells: vec![Vec::new(); ug_const::TOTAL_CELLS],
        overflow_count: 0,
        pair_seen: vec![0u64; ug_const::PAIR_HASH_SIZE],
    }
}

fn grid_cell_index(grid: &UniformGrid, pos: Vec3) -> Option<usize> {
    let rel = (pos - grid.origin) / grid.cell_size;
    let gx = rel.x.floor() as i32;
    let gy = rel.y.floor() as i32;
    let gz = rel.z.floor() as i32;
    if gx < 0 || gy < 0 || gz < 0 || gx >= ug_const::GRID_SIZE || gy >= ug_const::GRID_SIZE || gz >= ug_const::GRID_SIZE {
        return None;
    }
    Some((gx + gy * ug_const::GRID_SIZE + gz * ug_const::GRID_SIZE * ug_const::GRID_SIZE) as usize)
}

pub fn clear_uniform_grid(grid: &mut UniformGrid) {
    for cell in &mut grid.cells {
        cell.clear();
    }
    for word in &mut grid.pair_seen {
        *word = 0;
    }
    grid.overflow_count = 0;
}

pub fn uniform_grid_overflow_count(grid: &UniformGrid) -> u32 {
    grid.overflow_count
}

fn pair_key(a: i32, b: i32) -> u64 {
    ((a as u64) << 32) | (b as u32 as u64)
}

fn pair_hash_bit(grid: &UniformGrid, key: u64) -> (usize, u64) {
    let bit_index = (key.wrapping_mul(0x9E37_79B9_7F4A_7C15)) as usize % (ug_const::PAIR_HASH_SIZE * 64);
    (bit_index / 64, 1u64 << (bit_index % 64))
}

fn mark_pair_seen(grid: &mut UniformGrid, a: i32, b: i32) -> bool {
    let (word, bit) = pair_hash_bit(grid, pair_key(a, b));
    let already = grid.pair_seen[word] & bit != 0;
    grid.pair_seen[word] |= bit;
    already
}

/// Rebuilds the grid from `bodies` (`index, center`) and returns every pair
/// whose cell neighborhoods overlap, each once, lower index first. Bounded by
/// [`ug_const::MAX_PAIRS`]; excess pairs are dropped and counted alongside
/// cell overflow in `overflow_count`.
pub fn uniform_grid_find_pairs(grid: &mut UniformGrid, bodies: &[(i32, Vec3)], radius: f32) -> Vec<(i32, i32)> {
    clear_uniform_grid(grid);

    for &(idx, pos) in bodies {
        if let Some(cell) = grid_cell_index(grid, pos) {
            if grid.cells[cell].len() < ug_const::MAX_PER_CELL {
                grid.cells[cell].push(idx);
            } else {
                grid.overflow_count += 1;
            }
        }
    }

    let mut pairs = Vec::new();
    let cell_radius = (radius / grid.cell_size).ceil() as i32 + 1;

    for &(idx, pos) in bodies {
        let rel = (pos - grid.origin) / grid.cell_size;
        let (gx, gy, gz) = (rel.x.floor() as i32, rel.y.floor() as i32, rel.z.floor() as i32);

        for dz in -cell_radius..=cell_radius {
            for dy in -cell_radius..=cell_radius {
                for dx in -cell_radius..=cell_radius {
                    let nx = gx + dx;
                    let ny = gy + dy;
                    let nz = gz + dz;
                    if nx < 0 || ny < 0 || nz < 0 || nx >= ug_const::GRID_SIZE || ny >= ug_const::GRID_SIZE || nz >= ug_const::GRID_SIZE {
                        continue;
                    }
                    let cell = (nx + ny * ug_const::GRID_SIZE + nz * ug_const::GRID_SIZE * ug_const::GRID_SIZE) as usize;
                    for &other in &grid.cells[cell] {
                        if other == idx {
                            continue;
                        }
                        let (a, b) = order_pair(idx, other);
                        if mark_pair_seen(grid, a, b) {
                            continue;
                        }
                        if pairs.len() >= ug_const::MAX_PAIRS {
                            grid.overflow_count += 1;
                            continue;
                        }
                        pairs.push((a, b));
                    }
                }
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spatial_hash_pairs_nearby_bodies() {
        let mut hash = create_spatial_hash(4.0);
        let bodies = vec![
            (0, Vec3::ZERO, 1.0),
            (1, Vec3::new(0.5, 0.0, 0.0), 1.0),
            (2, Vec3::new(100.0, 0.0, 0.0), 1.0),
        ];
        let pairs = spatial_hash_find_pairs(&mut hash, &bodies);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn spatial_hash_pairs_have_no_duplicates() {
        let mut hash = create_spatial_hash(4.0);
        let bodies = vec![(0, Vec3::ZERO, 2.0), (1, Vec3::new(1.0, 0.0, 0.0), 2.0)];
        let pairs = spatial_hash_find_pairs(&mut hash, &bodies);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], (0, 1));
    }

    #[test]
    fn sweep_and_prune_finds_overlap() {
        let bodies = vec![
            (0, Vec3::splat(-0.5), Vec3::splat(0.5)),
            (1, Vec3::new(0.0, -0.5, -0.5), Vec3::new(1.0, 0.5, 0.5)),
            (2, Vec3::splat(10.0), Vec3::splat(11.0)),
        ];
        let pairs = sweep_and_prune_find_pairs(&bodies);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn uniform_grid_finds_pairs_once() {
        let mut grid = create_uniform_grid(Vec3::splat(-50.0), 2.0);
        let bodies = vec![
            (0, Vec3::ZERO),
            (1, Vec3::new(0.5, 0.0, 0.0)),
            (2, Vec3::splat(40.0)),
        ];
        let pairs = uniform_grid_find_pairs(&mut grid, &bodies, 1.0);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn uniform_grid_overflow_counts_dropped_insertions() {
        let mut grid = create_uniform_grid(Vec3::ZERO, 100.0);
        let bodies: Vec<(i32, Vec3)> = (0..(ug_const::MAX_PER_CELL as i32 + 5))
            .map(|i| (i, Vec3::ZERO))
            .collect();
        uniform_grid_find_pairs(&mut grid, &bodies, 1.0);
        assert!(uniform_grid_overflow_count(&grid) > 0);
    }
}
