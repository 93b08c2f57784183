//! Volume: a 3-D grid of chunks with dirty tracking, batched edits, raycasting
//! and shadow-volume packing.
//!
//! Pure DOP, same as [`crate::voxel::chunk`]: `Volume` is plain data, every
//! operation is a free function. A host drives it once per tick: call
//! [`begin_frame`] to drain the dirty queue, apply edits (directly via
//! [`set_at`]/[`fill_sphere`]/[`fill_box`], or batched via
//! [`edit_begin`]/[`edit_set`]/[`edit_end`]), then read back dirty chunks for
//! upload and `last_edit_chunks` for connectivity analysis.

use glam::Vec3;

use crate::constants::chunk::CHUNK_SIZE;
use crate::constants::volume::{DIRTY_RING_SIZE, EDIT_BATCH_MAX_CHUNKS, SHADOW_DIRTY_MAX};
use crate::voxel::chunk::{self, Chunk, ChunkState, MATERIAL_EMPTY};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds3D {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
struct DirtyChunkEntry {
    chunk_index: i32,
    dirty_frame: u32,
}

pub struct Volume {
    pub chunks: Vec<Chunk>,
    pub chunks_x: i32,
    pub chunks_y: i32,
    pub chunks_z: i32,
    pub total_chunks: i32,

    pub bounds: Bounds3D,
    pub voxel_size: f32,

    dirty_queue: Vec<DirtyChunkEntry>,
    current_frame: u32,

    dirty_ring: [i32; DIRTY_RING_SIZE],
    dirty_ring_head: usize,
    dirty_ring_tail: usize,
    dirty_ring_overflow: bool,
    dirty_bitmap: Vec<u64>,
    dirty_bitmap_scan_pos: i32,

    edit_batch_active: bool,
    edit_count: usize,
    edit_touched_chunks: Vec<i32>,
    edit_touched_bitmap: Vec<u64>,

    /// Chunks touched by the most recently completed edit batch — consumed
    /// by connectivity analysis so it only rescans what actually changed.
    pub last_edit_chunks: Vec<i32>,

    pub total_solid_voxels: i64,
    pub active_chunks: i32,

    shadow_dirty_bitmap: Vec<u64>,
    shadow_dirty_chunks: Vec<i32>,
    shadow_needs_full_rebuild: bool,
}

fn bitmap_words(total_chunks: i32) -> usize {
    ((total_chunks + 63) / 64) as usize
}

fn bitmap_set(bitmap: &mut [u64], index: i32) {
    bitmap[(index >> 6) as usize] |= 1u64 << (index & 63);
}

fn bitmap_clear(bitmap: &mut [u64], index: i32) {
    bitmap[(index >> 6) as usize] &= !(1u64 << (index & 63));
}

fn bitmap_test(bitmap: &[u64], index: i32) -> bool {
    bitmap[(index >> 6) as usize] & (1u64 << (index & 63)) != 0
}

fn bitmap_find_first_set(bitmap: &[u64], word_start: usize) -> i32 {
    for (w, &word) in bitmap.iter().enumerate().skip(word_start) {
        if word != 0 {
            return (w * 64) as i32 + word.trailing_zeros() as i32;
        }
    }
    -1
}

/// Build a volume with `voxel_size` chosen so the chunk grid exactly fills
/// `bounds` along its tightest axis.
pub fn create(chunks_x: i32, chunks_y: i32, chunks_z: i32, bounds: Bounds3D) -> Volume {
    let width = bounds.max.x - bounds.min.x;
    let height = bounds.max.y - bounds.min.y;
    let depth = bounds.max.z - bounds.min.z;

    let voxels_x = (chunks_x * CHUNK_SIZE) as f32;
    let voxels_y = (chunks_y * CHUNK_SIZE) as f32;
    let voxels_z = (chunks_z * CHUNK_SIZE) as f32;

    let voxel_size = (width / voxels_x)
        .min(height / voxels_y)
        .min(depth / voxels_z);

    create_internal(chunks_x, chunks_y, chunks_z, bounds, voxel_size)
}

/// Build a volume from an explicit voxel size and world-space origin.
pub fn create_dims(chunks_x: i32, chunks_y: i32, chunks_z: i32, origin: Vec3, voxel_size: f32) -> Volume {
    let chunk_world_size = voxel_size * CHUNK_SIZE as f32;
    let bounds = Bounds3D {
        min: origin,
        max: origin
            + Vec3::new(
                chunks_x as f32 * chunk_world_size,
                chunks_y as f32 * chunk_world_size,
                chunks_z as f32 * chunk_world_size,
            ),
    };
    create_internal(chunks_x, chunks_y, chunks_z, bounds, voxel_size)
}

fn create_internal(chunks_x: i32, chunks_y: i32, chunks_z: i32, bounds: Bounds3D, voxel_size: f32) -> Volume {
    let chunks_x = chunks_x.min(crate::constants::volume::MAX_CHUNKS_X);
    let chunks_y = chunks_y.min(crate::constants::volume::MAX_CHUNKS_Y);
    let chunks_z = chunks_z.min(crate::constants::volume::MAX_CHUNKS_Z);
    let total = chunks_x * chunks_y * chunks_z;

    let mut chunks = Vec::with_capacity(total as usize);
    for cz in 0..chunks_z {
        for cy in 0..chunks_y {
            for cx in 0..chunks_x {
                let mut c = chunk::create(cx, cy, cz);
                c.state = ChunkState::Active;
                chunks.push(c);
            }
        }
    }

    let words = bitmap_words(total);
    Volume {
        chunks,
        chunks_x,
        chunks_y,
        chunks_z,
        total_chunks: total,
        bounds,
        voxel_size,
        dirty_queue: Vec::new(),
        current_frame: 0,
        dirty_ring: [0; DIRTY_RING_SIZE],
        dirty_ring_head: 0,
        dirty_ring_tail: 0,
        dirty_ring_overflow: false,
        dirty_bitmap: vec![0u64; words],
        dirty_bitmap_scan_pos: 0,
        edit_batch_active: false,
        edit_count: 0,
        edit_touched_chunks: Vec::new(),
        edit_touched_bitmap: vec![0u64; words],
        last_edit_chunks: Vec::new(),
        total_solid_voxels: 0,
        active_chunks: total,
        shadow_dirty_bitmap: vec![0u64; words],
        shadow_dirty_chunks: Vec::new(),
        shadow_needs_full_rebuild: true,
    }
}

pub fn clear(vol: &mut Volume) {
    for c in &mut vol.chunks {
        chunk::fill(c, MATERIAL_EMPTY);
        c.state = ChunkState::Dirty;
    }
    vol.total_solid_voxels = 0;
}

fn push_dirty_ring(vol: &mut Volume, chunk_index: i32) {
    bitmap_set(&mut vol.dirty_bitmap, chunk_index);

    let next_head = (vol.dirty_ring_head + 1) % DIRTY_RING_SIZE;
    if next_head == vol.dirty_ring_tail {
        vol.dirty_ring_overflow = true;
        return;
    }
    vol.dirty_ring[vol.dirty_ring_head] = chunk_index;
    vol.dirty_ring_head = next_head;
}

pub fn world_to_chunk(vol: &Volume, pos: Vec3) -> (i32, i32, i32) {
    let local = pos - vol.bounds.min;
    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;
    let f = local / chunk_world_size;
    (
        floor_to_i32(f.x),
        floor_to_i32(f.y),
        floor_to_i32(f.z),
    )
}

fn floor_to_i32(v: f32) -> i32 {
    let i = v as i32;
    if i as f32 > v {
        i - 1
    } else {
        i
    }
}

pub fn world_to_local(vol: &Volume, pos: Vec3) -> (i32, i32, i32, i32, i32, i32) {
    let local = pos - vol.bounds.min;
    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;
    let f = local / chunk_world_size;
    let (cx, cy, cz) = (floor_to_i32(f.x), floor_to_i32(f.y), floor_to_i32(f.z));

    let chunk_base = Vec3::new(cx as f32, cy as f32, cz as f32) * chunk_world_size;
    let fl = (local - chunk_base) / vol.voxel_size;
    (cx, cy, cz, floor_to_i32(fl.x), floor_to_i32(fl.y), floor_to_i32(fl.z))
}

pub fn voxel_to_world(vol: &Volume, cx: i32, cy: i32, cz: i32, lx: i32, ly: i32, lz: i32) -> Vec3 {
    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;
    vol.bounds.min
        + Vec3::new(cx as f32, cy as f32, cz as f32) * chunk_world_size
        + (Vec3::new(lx as f32, ly as f32, lz as f32) + Vec3::splat(0.5)) * vol.voxel_size
}

pub fn chunk_index(vol: &Volume, cx: i32, cy: i32, cz: i32) -> Option<usize> {
    if cx < 0 || cx >= vol.chunks_x || cy < 0 || cy >= vol.chunks_y || cz < 0 || cz >= vol.chunks_z {
        return None;
    }
    Some((cx + cy * vol.chunks_x + cz * vol.chunks_x * vol.chunks_y) as usize)
}

pub fn get_chunk(vol: &Volume, cx: i32, cy: i32, cz: i32) -> Option<&Chunk> {
    chunk_index(vol, cx, cy, cz).map(|i| &vol.chunks[i])
}

pub fn get_at(vol: &Volume, pos: Vec3) -> u8 {
    let (cx, cy, cz, lx, ly, lz) = world_to_local(vol, pos);
    match chunk_index(vol, cx, cy, cz) {
        Some(idx) => chunk::get(&vol.chunks[idx], lx, ly, lz),
        None => MATERIAL_EMPTY,
    }
}

pub fn is_solid_at(vol: &Volume, pos: Vec3) -> bool {
    get_at(vol, pos) != MATERIAL_EMPTY
}

pub fn set_at(vol: &mut Volume, pos: Vec3, material: u8) {
    let (cx, cy, cz, lx, ly, lz) = world_to_local(vol, pos);
    let Some(idx) = chunk_index(vol, cx, cy, cz) else {
        return;
    };

    let old_mat = chunk::get(&vol.chunks[idx], lx, ly, lz);
    if old_mat == material {
        return;
    }

    chunk::set(&mut vol.chunks[idx], lx, ly, lz, material);
    vol.chunks[idx].dirty_frame = vol.current_frame;
    push_dirty_ring(vol, idx as i32);

    if old_mat == MATERIAL_EMPTY && material != MATERIAL_EMPTY {
        vol.total_solid_voxels += 1;
    } else if old_mat != MATERIAL_EMPTY && material == MATERIAL_EMPTY {
        vol.total_solid_voxels -= 1;
    }
}

fn record_batch_touch(vol: &mut Volume, chunk_idx: i32, modified: u32) {
    if !vol.edit_batch_active {
        return;
    }
    if !bitmap_test(&vol.edit_touched_bitmap, chunk_idx) {
        bitmap_set(&mut vol.edit_touched_bitmap, chunk_idx);
        if vol.edit_touched_chunks.len() < EDIT_BATCH_MAX_CHUNKS {
            vol.edit_touched_chunks.push(chunk_idx);
        }
    }
    let max_edits = crate::constants::volume::MAX_EDITS_PER_TICK;
    if vol.edit_count < max_edits {
        let remaining = max_edits - vol.edit_count;
        vol.edit_count += (modified as usize).min(remaining);
    }
}

/// Fill a world-space sphere across every chunk it overlaps; returns voxels
/// whose material changed.
pub fn fill_sphere(vol: &mut Volume, center: Vec3, radius: f32, material: u8) -> u32 {
    let mut total_modified = 0u32;
    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;

    let cx_min = ((center.x - radius - vol.bounds.min.x) / chunk_world_size).floor() as i32;
    let cx_max = ((center.x + radius - vol.bounds.min.x) / chunk_world_size).ceil() as i32;
    let cy_min = ((center.y - radius - vol.bounds.min.y) / chunk_world_size).floor() as i32;
    let cy_max = ((center.y + radius - vol.bounds.min.y) / chunk_world_size).ceil() as i32;
    let cz_min = ((center.z - radius - vol.bounds.min.z) / chunk_world_size).floor() as i32;
    let cz_max = ((center.z + radius - vol.bounds.min.z) / chunk_world_size).ceil() as i32;

    let cx_min = cx_min.max(0);
    let cy_min = cy_min.max(0);
    let cz_min = cz_min.max(0);
    let cx_max = cx_max.min(vol.chunks_x);
    let cy_max = cy_max.min(vol.chunks_y);
    let cz_max = cz_max.min(vol.chunks_z);

    for cz in cz_min..cz_max {
        for cy in cy_min..cy_max {
            for cx in cx_min..cx_max {
                let Some(idx) = chunk_index(vol, cx, cy, cz) else {
                    continue;
                };

                let chunk_base = Vec3::new(cx as f32, cy as f32, cz as f32) * chunk_world_size;
                let local_center = (center - vol.bounds.min - chunk_base) / vol.voxel_size;
                let local_radius = radius / vol.voxel_size;

                let old_solid = vol.chunks[idx].occupancy.solid_count;
                let old_state = vol.chunks[idx].state;
                let modified = chunk::fill_sphere(
                    &mut vol.chunks[idx],
                    local_center.x,
                    local_center.y,
                    local_center.z,
                    local_radius,
                    material,
                );

                if modified > 0 {
                    vol.chunks[idx].dirty_frame = vol.current_frame;
                    let new_solid = vol.chunks[idx].occupancy.solid_count;
                    vol.total_solid_voxels += new_solid as i64 - old_solid as i64;
                    total_modified += modified;

                    record_batch_touch(vol, idx as i32, modified);

                    if old_state == ChunkState::Active && vol.chunks[idx].state == ChunkState::Dirty {
                        push_dirty_ring(vol, idx as i32);
                    }
                }
            }
        }
    }

    total_modified
}

/// Fill a world-space AABB across every chunk it overlaps; returns voxels
/// whose material changed.
pub fn fill_box(vol: &mut Volume, min_corner: Vec3, max_corner: Vec3, material: u8) -> u32 {
    let mut total_modified = 0u32;
    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;

    let cx_min = ((min_corner.x - vol.bounds.min.x) / chunk_world_size).floor() as i32;
    let cx_max = ((max_corner.x - vol.bounds.min.x) / chunk_world_size).ceil() as i32;
    let cy_min = ((min_corner.y - vol.bounds.min.y) / chunk_world_size).floor() as i32;
    let cy_max = ((max_corner.y - vol.bounds.min.y) / chunk_world_size).ceil() as i32;
    let cz_min = ((min_corner.z - vol.bounds.min.z) / chunk_world_size).floor() as i32;
    let cz_max = ((max_corner.z - vol.bounds.min.z) / chunk_world_size).ceil() as i32;

    let cx_min = cx_min.max(0);
    let cy_min = cy_min.max(0);
    let cz_min = cz_min.max(0);
    let cx_max = cx_max.min(vol.chunks_x);
    let cy_max = cy_max.min(vol.chunks_y);
    let cz_max = cz_max.min(vol.chunks_z);

    for cz in cz_min..cz_max {
        for cy in cy_min..cy_max {
            for cx in cx_min..cx_max {
                let Some(idx) = chunk_index(vol, cx, cy, cz) else {
                    continue;
                };

                let chunk_base = vol.bounds.min + Vec3::new(cx as f32, cy as f32, cz as f32) * chunk_world_size;
                let lx0 = ((min_corner.x - chunk_base.x) / vol.voxel_size).floor() as i32;
                let ly0 = ((min_corner.y - chunk_base.y) / vol.voxel_size).floor() as i32;
                let lz0 = ((min_corner.z - chunk_base.z) / vol.voxel_size).floor() as i32;
                let lx1 = ((max_corner.x - chunk_base.x) / vol.voxel_size).ceil() as i32 - 1;
                let ly1 = ((max_corner.y - chunk_base.y) / vol.voxel_size).ceil() as i32 - 1;
                let lz1 = ((max_corner.z - chunk_base.z) / vol.voxel_size).ceil() as i32 - 1;

                let old_solid = vol.chunks[idx].occupancy.solid_count;
                let old_state = vol.chunks[idx].state;
                let modified = chunk::fill_box(&mut vol.chunks[idx], lx0, ly0, lz0, lx1, ly1, lz1, material);

                if modified > 0 {
                    vol.chunks[idx].dirty_frame = vol.current_frame;
                    let new_solid = vol.chunks[idx].occupancy.solid_count;
                    vol.total_solid_voxels += new_solid as i64 - old_solid as i64;
                    total_modified += modified;

                    record_batch_touch(vol, idx as i32, modified);

                    if old_state == ChunkState::Active && vol.chunks[idx].state == ChunkState::Dirty {
                        push_dirty_ring(vol, idx as i32);
                    }
                }
            }
        }
    }

    total_modified
}

pub fn mark_chunk_dirty(vol: &mut Volume, chunk_index: i32) {
    if chunk_index < 0 || chunk_index >= vol.total_chunks {
        return;
    }
    if vol.chunks[chunk_index as usize].state == ChunkState::Active {
        vol.chunks[chunk_index as usize].state = ChunkState::Dirty;
        vol.chunks[chunk_index as usize].dirty_frame = vol.current_frame;
        push_dirty_ring(vol, chunk_index);
    }
}

/// Advance the frame counter and refill the bounded dirty queue from the
/// ring buffer (or, if the ring overflowed, from an O(1)-per-chunk bitmap
/// scan that resumes where the previous frame left off).
pub fn begin_frame(vol: &mut Volume) {
    vol.current_frame += 1;
    vol.dirty_queue.clear();
    let max_per_frame = crate::constants::volume::MAX_DIRTY_PER_FRAME;

    if vol.dirty_ring_overflow {
        let bitmap_word_count = bitmap_words(vol.total_chunks);
        let mut word_start = (vol.dirty_bitmap_scan_pos >> 6) as usize;

        while vol.dirty_queue.len() < max_per_frame {
            let chunk_idx = bitmap_find_first_set(&vol.dirty_bitmap[..bitmap_word_count], word_start);
            if chunk_idx < 0 || chunk_idx >= vol.total_chunks {
                vol.dirty_ring_overflow = false;
                vol.dirty_bitmap_scan_pos = 0;
                vol.dirty_ring_head = 0;
                vol.dirty_ring_tail = 0;
                break;
            }

            if vol.chunks[chunk_idx as usize].state == ChunkState::Dirty {
                vol.dirty_queue.push(DirtyChunkEntry {
                    chunk_index: chunk_idx,
                    dirty_frame: vol.chunks[chunk_idx as usize].dirty_frame,
                });
            }

            bitmap_clear(&mut vol.dirty_bitmap, chunk_idx);
            word_start = (chunk_idx >> 6) as usize;
        }

        if vol.dirty_ring_overflow {
            if let Some(last) = vol.dirty_queue.last() {
                vol.dirty_bitmap_scan_pos = last.chunk_index + 1;
            }
        }
        return;
    }

    while vol.dirty_ring_tail != vol.dirty_ring_head && vol.dirty_queue.len() < max_per_frame {
        let chunk_index = vol.dirty_ring[vol.dirty_ring_tail];
        vol.dirty_ring_tail = (vol.dirty_ring_tail + 1) % DIRTY_RING_SIZE;

        if chunk_index >= 0
            && chunk_index < vol.total_chunks
            && vol.chunks[chunk_index as usize].state == ChunkState::Dirty
        {
            vol.dirty_queue.push(DirtyChunkEntry {
                chunk_index,
                dirty_frame: vol.chunks[chunk_index as usize].dirty_frame,
            });
            bitmap_clear(&mut vol.dirty_bitmap, chunk_index);
        }
    }
}

pub fn dirty_chunks(vol: &Volume) -> Vec<i32> {
    vol.dirty_queue.iter().map(|e| e.chunk_index).collect()
}

pub fn mark_chunks_uploaded(vol: &mut Volume, chunk_indices: &[i32]) {
    for &idx in chunk_indices {
        if idx >= 0 && idx < vol.total_chunks {
            let state = &mut vol.chunks[idx as usize].state;
            if *state == ChunkState::Dirty || *state == ChunkState::Uploading {
                *state = ChunkState::Active;
            }
        }
    }
}

pub fn rebuild_all_occupancy(vol: &mut Volume) {
    vol.total_solid_voxels = 0;
    vol.active_chunks = 0;
    for c in &mut vol.chunks {
        chunk::rebuild_occupancy(c);
        vol.total_solid_voxels += c.occupancy.solid_count as i64;
        if c.occupancy.has_any {
            vol.active_chunks += 1;
        }
    }
}

/// Rebuild occupancy only for chunks known to have changed, preferring the
/// most specific tracking source available: `last_edit_chunks` (from a just
/// completed edit batch), then the current dirty queue, then — only if
/// neither is populated — a full scan.
pub fn rebuild_dirty_occupancy(vol: &mut Volume) {
    if !vol.last_edit_chunks.is_empty() {
        for &idx in &vol.last_edit_chunks.clone() {
            if idx >= 0 && idx < vol.total_chunks && vol.chunks[idx as usize].state == ChunkState::Dirty {
                chunk::rebuild_occupancy(&mut vol.chunks[idx as usize]);
            }
        }
        return;
    }

    if !vol.dirty_queue.is_empty() {
        for entry in vol.dirty_queue.clone() {
            let idx = entry.chunk_index;
            if idx >= 0 && idx < vol.total_chunks && vol.chunks[idx as usize].state == ChunkState::Dirty {
                chunk::rebuild_occupancy(&mut vol.chunks[idx as usize]);
            }
        }
        return;
    }

    for c in &mut vol.chunks {
        if c.state == ChunkState::Dirty {
            chunk::rebuild_occupancy(c);
        }
    }
}

pub fn edit_begin(vol: &mut Volume) {
    if vol.edit_batch_active {
        return;
    }
    vol.edit_batch_active = true;
    vol.edit_count = 0;
    vol.edit_touched_chunks.clear();
    vol.edit_touched_bitmap.iter_mut().for_each(|w| *w = 0);
}

pub fn edit_set(vol: &mut Volume, pos: Vec3, material: u8) {
    if !vol.edit_batch_active {
        return;
    }
    if vol.edit_count >= crate::constants::volume::MAX_EDITS_PER_TICK {
        return;
    }

    let (cx, cy, cz, lx, ly, lz) = world_to_local(vol, pos);
    let Some(idx) = chunk_index(vol, cx, cy, cz) else {
        return;
    };

    let old_mat = chunk::get(&vol.chunks[idx], lx, ly, lz);
    if old_mat == material {
        return;
    }

    chunk::set(&mut vol.chunks[idx], lx, ly, lz, material);
    vol.edit_count += 1;

    if old_mat == MATERIAL_EMPTY && material != MATERIAL_EMPTY {
        vol.total_solid_voxels += 1;
    } else if old_mat != MATERIAL_EMPTY && material == MATERIAL_EMPTY {
        vol.total_solid_voxels -= 1;
    }

    if !bitmap_test(&vol.edit_touched_bitmap, idx as i32) {
        bitmap_set(&mut vol.edit_touched_bitmap, idx as i32);
        if vol.edit_touched_chunks.len() < EDIT_BATCH_MAX_CHUNKS {
            vol.edit_touched_chunks.push(idx as i32);
        }
    }
}

fn mark_shadow_dirty(vol: &mut Volume, chunk_idx: i32) {
    if bitmap_test(&vol.shadow_dirty_bitmap, chunk_idx) {
        return;
    }
    bitmap_set(&mut vol.shadow_dirty_bitmap, chunk_idx);
    if vol.shadow_dirty_chunks.len() < SHADOW_DIRTY_MAX {
        vol.shadow_dirty_chunks.push(chunk_idx);
    } else {
        vol.shadow_needs_full_rebuild = true;
    }
}

/// Close an edit batch: rebuild occupancy and mark every touched chunk dirty
/// exactly once, regardless of how many edits it received. Returns the
/// number of edits applied since `edit_begin`.
pub fn edit_end(vol: &mut Volume) -> usize {
    if !vol.edit_batch_active {
        return 0;
    }
    vol.edit_batch_active = false;

    vol.last_edit_chunks = vol.edit_touched_chunks.clone();

    for &chunk_idx in &vol.edit_touched_chunks.clone() {
        chunk::rebuild_occupancy(&mut vol.chunks[chunk_idx as usize]);
        mark_shadow_dirty(vol, chunk_idx);

        if vol.chunks[chunk_idx as usize].state == ChunkState::Active {
            vol.chunks[chunk_idx as usize].state = ChunkState::Dirty;
        }
        if vol.chunks[chunk_idx as usize].state == ChunkState::Dirty {
            vol.chunks[chunk_idx as usize].dirty_frame = vol.current_frame;
            push_dirty_ring(vol, chunk_idx);
        }
    }

    let total_edits = vol.edit_count;
    vol.edit_count = 0;
    vol.edit_touched_chunks.clear();
    total_edits
}

/// 3-D DDA raycast with occupancy-accelerated region skipping. Returns the
/// hit distance, or a negative value on miss.
pub fn raycast(
    vol: &Volume,
    origin: Vec3,
    dir: Vec3,
    max_dist: f32,
) -> Option<(f32, Vec3, Vec3, u8)> {
    let inv_voxel = 1.0 / vol.voxel_size;
    let pos = (origin - vol.bounds.min) * inv_voxel;

    let total_voxels_x = vol.chunks_x * CHUNK_SIZE;
    let total_voxels_y = vol.chunks_y * CHUNK_SIZE;
    let total_voxels_z = vol.chunks_z * CHUNK_SIZE;

    let mut vx = pos.x.floor() as i32;
    let mut vy = pos.y.floor() as i32;
    let mut vz = pos.z.floor() as i32;

    let step_x = if dir.x >= 0.0 { 1 } else { -1 };
    let step_y = if dir.y >= 0.0 { 1 } else { -1 };
    let step_z = if dir.z >= 0.0 { 1 } else { -1 };

    let delta_x = if dir.x.abs() > 0.0001 { (1.0 / dir.x).abs() } else { 1e10 };
    let delta_y = if dir.y.abs() > 0.0001 { (1.0 / dir.y).abs() } else { 1e10 };
    let delta_z = if dir.z.abs() > 0.0001 { (1.0 / dir.z).abs() } else { 1e10 };

    let mut t_max_x = if dir.x.abs() < 0.0001 {
        1e10
    } else {
        ((if step_x > 0 { (vx + 1) as f32 } else { vx as f32 }) - pos.x) / dir.x
    };
    let mut t_max_y = if dir.y.abs() < 0.0001 {
        1e10
    } else {
        ((if step_y > 0 { (vy + 1) as f32 } else { vy as f32 }) - pos.y) / dir.y
    };
    let mut t_max_z = if dir.z.abs() < 0.0001 {
        1e10
    } else {
        ((if step_z > 0 { (vz + 1) as f32 } else { vz as f32 }) - pos.z) / dir.z
    };

    let mut t = 0.0f32;
    let max_t = max_dist * inv_voxel;
    let mut normal = Vec3::ZERO;

    let mut last_chunk_idx: i32 = -1;
    let mut chunk_has_any = false;
    let mut chunk_level0 = 0u64;

    while t < max_t {
        if vx >= 0 && vx < total_voxels_x && vy >= 0 && vy < total_voxels_y && vz >= 0 && vz < total_voxels_z {
            let cx = vx / CHUNK_SIZE;
            let cy = vy / CHUNK_SIZE;
            let cz = vz / CHUNK_SIZE;
            let lx = vx % CHUNK_SIZE;
            let ly = vy % CHUNK_SIZE;
            let lz = vz % CHUNK_SIZE;

            let chunk_idx = cx + cy * vol.chunks_x + cz * vol.chunks_x * vol.chunks_y;

            if chunk_idx != last_chunk_idx {
                last_chunk_idx = chunk_idx;
                let c = &vol.chunks[chunk_idx as usize];
                chunk_has_any = c.occupancy.has_any;
                chunk_level0 = c.occupancy.level0;
            }

            if chunk_has_any {
                let rx = lx / 8;
                let ry = ly / 8;
                let rz = lz / 8;
                let region_bit = rx + ry * 4 + rz * 16;

                if (chunk_level0 >> region_bit) & 1 != 0 {
                    let mat = chunk::get(&vol.chunks[chunk_idx as usize], lx, ly, lz);
                    if mat != MATERIAL_EMPTY {
                        let hit_dist = t * vol.voxel_size;
                        let hit_pos = origin + dir * hit_dist;
                        return Some((hit_dist, hit_pos, normal, mat));
                    }
                }
            }
        }

        if t_max_x < t_max_y && t_max_x < t_max_z {
            t = t_max_x;
            t_max_x += delta_x;
            vx += step_x;
            normal = Vec3::new(-step_x as f32, 0.0, 0.0);
        } else if t_max_y < t_max_z {
            t = t_max_y;
            t_max_y += delta_y;
            vy += step_y;
            normal = Vec3::new(0.0, -step_y as f32, 0.0);
        } else {
            t = t_max_z;
            t_max_z += delta_z;
            vz += step_z;
            normal = Vec3::new(0.0, 0.0, -step_z as f32);
        }

        if (step_x > 0 && vx >= total_voxels_x)
            || (step_x < 0 && vx < 0)
            || (step_y > 0 && vy >= total_voxels_y)
            || (step_y < 0 && vy < 0)
            || (step_z > 0 && vz >= total_voxels_z)
            || (step_z < 0 && vz < 0)
        {
            break;
        }
    }

    None
}

/// Cheap boolean raycast: coarse chunk-space DDA testing only
/// `occupancy.has_any` per chunk, for "is anything in the way" queries that
/// don't need a hit point.
pub fn ray_hits_any_occupancy(vol: &Volume, origin: Vec3, dir: Vec3, max_dist: f32) -> bool {
    if vol.total_solid_voxels == 0 {
        return false;
    }

    let chunk_world_size = vol.voxel_size * CHUNK_SIZE as f32;
    let pos = (origin - vol.bounds.min) / chunk_world_size;

    let mut cx = pos.x.floor() as i32;
    let mut cy = pos.y.floor() as i32;
    let mut cz = pos.z.floor() as i32;

    let step_x = if dir.x >= 0.0 { 1 } else { -1 };
    let step_y = if dir.y >= 0.0 { 1 } else { -1 };
    let step_z = if dir.z >= 0.0 { 1 } else { -1 };

    let delta_x = if dir.x.abs() > 0.0001 { (chunk_world_size / dir.x).abs() } else { 1e10 };
    let delta_y = if dir.y.abs() > 0.0001 { (chunk_world_size / dir.y).abs() } else { 1e10 };
    let delta_z = if dir.z.abs() > 0.0001 { (chunk_world_size / dir.z).abs() } else { 1e10 };

    let mut t_max_x = if dir.x.abs() < 0.0001 {
        1e10
    } else {
        ((if step_x > 0 { (cx + 1) as f32 } else { cx as f32 }) - pos.x) * chunk_world_size / dir.x
    };
    let mut t_max_y = if dir.y.abs() < 0.0001 {
        1e10
    } else {
        ((if step_y > 0 { (cy + 1) as f32 } else { cy as f32 }) - pos.y) * chunk_world_size / dir.y
    };
    let mut t_max_z = if dir.z.abs() < 0.0001 {
        1e10
    } else {
        ((if step_z > 0 { (cz + 1) as f32 } else { cz as f32 }) - pos.z) * chunk_world_size / dir.z
    };

    let mut t = 0.0f32;

    while t < max_dist {
        if cx >= 0 && cx < vol.chunks_x && cy >= 0 && cy < vol.chunks_y && cz >= 0 && cz < vol.chunks_z {
            let idx = (cx + cy * vol.chunks_x + cz * vol.chunks_x * vol.chunks_y) as usize;
            if vol.chunks[idx].occupancy.has_any {
                return true;
            }
        }

        if t_max_x < t_max_y && t_max_x < t_max_z {
            t = t_max_x;
            t_max_x += delta_x;
            cx += step_x;
        } else if t_max_y < t_max_z {
            t = t_max_y;
            t_max_y += delta_y;
            cy += step_y;
        } else {
            t = t_max_z;
            t_max_z += delta_z;
            cz += step_z;
        }

        if (step_x > 0 && cx >= vol.chunks_x)
            || (step_x < 0 && cx < 0)
            || (step_y > 0 && cy >= vol.chunks_y)
            || (step_y < 0 && cy < 0)
            || (step_z > 0 && cz >= vol.chunks_z)
            || (step_z < 0 && cz < 0)
        {
            break;
        }
    }

    false
}

/// Pack occupancy for the whole volume into a half-resolution bitmask: each
/// output byte covers a 2x2x2 block of voxels, one bit per sub-voxel.
/// Returns `(packed, width, height, depth)`.
pub fn pack_shadow_volume(vol: &Volume) -> (Vec<u8>, u32, u32, u32) {
    let total_voxels_x = vol.chunks_x * CHUNK_SIZE;
    let total_voxels_y = vol.chunks_y * CHUNK_SIZE;
    let total_voxels_z = vol.chunks_z * CHUNK_SIZE;

    let w = (total_voxels_x >> 1) as u32;
    let h = (total_voxels_y >> 1) as u32;
    let d = (total_voxels_z >> 1) as u32;

    let mut packed = vec![0u8; (w * h * d) as usize];

    for cz in 0..vol.chunks_z {
        for cy in 0..vol.chunks_y {
            for cx in 0..vol.chunks_x {
                let idx = (cx + cy * vol.chunks_x + cz * vol.chunks_x * vol.chunks_y) as usize;
                let c = &vol.chunks[idx];
                if !c.occupancy.has_any {
                    continue;
                }
                pack_chunk_into(c, cx, cy, cz, &mut packed, w, h);
            }
        }
    }

    (packed, w, h, d)
}

fn pack_chunk_into(chunk: &Chunk, cx: i32, cy: i32, cz: i32, packed: &mut [u8], w: u32, h: u32) {
    let base_vx = cx * CHUNK_SIZE;
    let base_vy = cy * CHUNK_SIZE;
    let base_vz = cz * CHUNK_SIZE;

    for lz in 0..CHUNK_SIZE {
        for ly in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                if chunk.voxels[chunk::voxel_index(lx, ly, lz)] == MATERIAL_EMPTY {
                    continue;
                }
                let vx = base_vx + lx;
                let vy = base_vy + ly;
                let vz = base_vz + lz;
                let bit = (vx & 1) + ((vy & 1) << 1) + ((vz & 1) << 2);
                let px = (vx >> 1) as u32;
                let py = (vy >> 1) as u32;
                let pz = (vz >> 1) as u32;
                let packed_idx = (px + py * w + pz * w * h) as usize;
                packed[packed_idx] |= 1u8 << bit;
            }
        }
    }
}

/// Repack only `chunk_idx` into an already-allocated mip0 buffer (clears its
/// region first), for incremental shadow updates driven by `shadow_dirty_chunks`.
pub fn pack_shadow_chunk(vol: &Volume, chunk_idx: i32, mip0: &mut [u8], w0: u32, h0: u32) {
    if chunk_idx < 0 || chunk_idx >= vol.total_chunks {
        return;
    }
    let chunk = &vol.chunks[chunk_idx as usize];
    let (cx, cy, cz) = chunk.coord;

    let base_vx = cx * CHUNK_SIZE;
    let base_vy = cy * CHUNK_SIZE;
    let base_vz = cz * CHUNK_SIZE;
    let base_px = (base_vx >> 1) as u32;
    let base_py = (base_vy >> 1) as u32;
    let base_pz = (base_vz >> 1) as u32;
    let region_size = (CHUNK_SIZE >> 1) as u32;

    for pz in 0..region_size {
        for py in 0..region_size {
            let row_start = (base_px + (base_py + py) * w0 + (base_pz + pz) * w0 * h0) as usize;
            for b in &mut mip0[row_start..row_start + region_size as usize] {
                *b = 0;
            }
        }
    }

    if !chunk.occupancy.has_any {
        return;
    }

    pack_chunk_into(chunk, cx, cy, cz, mip0, w0, h0);
}

/// Coarsen a packed mip0 bitmask into mip1 (half resolution) and mip2
/// (quarter resolution), OR-reducing 2x2x2 neighborhoods into each output bit.
pub fn generate_shadow_mips(mip0: &[u8], w: u32, h: u32, d: u32) -> (Vec<u8>, u32, u32, u32, Vec<u8>, u32, u32, u32) {
    let w1 = (w >> 1).max(1);
    let h1 = (h >> 1).max(1);
    let d1 = (d >> 1).max(1);
    let mut mip1 = vec![0u8; (w1 * h1 * d1) as usize];

    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let idx0 = (x + y * w + z * w * h) as usize;
                if mip0[idx0] == 0 {
                    continue;
                }
                let (x1, y1, z1) = (x >> 1, y >> 1, z >> 1);
                let bit = (x & 1) + ((y & 1) << 1) + ((z & 1) << 2);
                let idx1 = (x1 + y1 * w1 + z1 * w1 * h1) as usize;
                mip1[idx1] |= 1u8 << bit;
            }
        }
    }

    let w2 = (w1 >> 1).max(1);
    let h2 = (h1 >> 1).max(1);
    let d2 = (d1 >> 1).max(1);
    let mut mip2 = vec![0u8; (w2 * h2 * d2) as usize];

    for z in 0..d1 {
        for y in 0..h1 {
            for x in 0..w1 {
                let idx1 = (x + y * w1 + z * w1 * h1) as usize;
                if mip1[idx1] == 0 {
                    continue;
                }
                let (x2, y2, z2) = (x >> 1, y >> 1, z >> 1);
                let bit = (x & 1) + ((y & 1) << 1) + ((z & 1) << 2);
                let idx2 = (x2 + y2 * w2 + z2 * w2 * h2) as usize;
                mip2[idx2] |= 1u8 << bit;
            }
        }
    }

    (mip1, w1, h1, d1, mip2, w2, h2, d2)
}

pub fn shadow_dirty_chunks(vol: &Volume) -> &[i32] {
    &vol.shadow_dirty_chunks
}

pub fn clear_shadow_dirty(vol: &mut Volume) {
    for &idx in &vol.shadow_dirty_chunks {
        bitmap_clear(&mut vol.shadow_dirty_bitmap, idx);
    }
    vol.shadow_dirty_chunks.clear();
    vol.shadow_needs_full_rebuild = false;
}

pub fn shadow_needs_full_rebuild(vol: &Volume) -> bool {
    vol.shadow_needs_full_rebuild
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_volume() -> Volume {
        create_dims(2, 2, 2, Vec3::ZERO, 1.0)
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut vol = small_volume();
        let p = Vec3::new(10.5, 10.5, 10.5);
        set_at(&mut vol, p, 7);
        assert!(is_solid_at(&vol, p));
        assert_eq!(get_at(&vol, p), 7);
    }

    #[test]
    fn begin_frame_drains_dirty_ring() {
        let mut vol = small_volume();
        set_at(&mut vol, Vec3::new(1.0, 1.0, 1.0), 3);
        begin_frame(&mut vol);
        let dirty = dirty_chunks(&vol);
        assert_eq!(dirty.len(), 1);
    }

    #[test]
    fn edit_batch_defers_occupancy_rebuild() {
        let mut vol = small_volume();
        edit_begin(&mut vol);
        edit_set(&mut vol, Vec3::new(1.0, 1.0, 1.0), 2);
        edit_set(&mut vol, Vec3::new(2.0, 2.0, 2.0), 2);
        let applied = edit_end(&mut vol);
        assert_eq!(applied, 2);
        assert_eq!(vol.last_edit_chunks.len(), 1);
    }

    #[test]
    fn raycast_hits_filled_voxel() {
        let mut vol = small_volume();
        set_at(&mut vol, Vec3::new(5.5, 5.5, 5.5), 1);
        let hit = raycast(&vol, Vec3::new(5.5, -10.0, 5.5), Vec3::new(0.0, 1.0, 0.0), 100.0);
        assert!(hit.is_some());
    }

    #[test]
    fn raycast_misses_empty_volume() {
        let vol = small_volume();
        let hit = raycast(&vol, Vec3::new(5.5, -10.0, 5.5), Vec3::new(0.0, 1.0, 0.0), 100.0);
        assert!(hit.is_none());
    }

    #[test]
    fn ray_hits_any_occupancy_short_circuits_when_empty() {
        let vol = small_volume();
        assert!(!ray_hits_any_occupancy(&vol, Vec3::ZERO, Vec3::X, 10.0));
    }

    #[test]
    fn shadow_pack_bit_matches_voxel() {
        let mut vol = small_volume();
        set_at(&mut vol, Vec3::new(0.5, 0.5, 0.5), 1);
        let (packed, w, h, _d) = pack_shadow_volume(&vol);
        let idx = 0usize;
        assert_ne!(packed[idx] & 1, 0);
        let _ = (w, h);
    }

    #[test]
    fn shadow_mips_coarsen_monotonically() {
        let mut vol = small_volume();
        fill_box(&mut vol, Vec3::ZERO, Vec3::splat(64.0), 1);
        let (packed, w, h, d) = pack_shadow_volume(&vol);
        let (mip1, w1, h1, d1, mip2, w2, h2, d2) = generate_shadow_mips(&packed, w, h, d);
        assert!(mip1.iter().any(|&b| b != 0));
        assert!(mip2.iter().any(|&b| b != 0));
        assert_eq!(w1, w / 2);
        assert_eq!(h1, h / 2);
        assert_eq!(d1, d / 2);
        assert_eq!(w2, w1 / 2);
        assert_eq!(h2, h1 / 2);
        assert_eq!(d2, d1 / 2);
    }
}
