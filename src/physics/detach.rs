//! Detach / terrain-detach (C8): carving a body-local sphere out of an
//! already-detached body, and the per-tick orchestration that turns floating
//! terrain islands into new rigid bodies.
//!
//! Grounded on `engine/sim/terrain_detach.h/.c` for the island-to-body
//! pipeline (connectivity scan → per-island size policy → spawn with a
//! jittered initial velocity) and `engine/sim/detach.h` for the point-based
//! destruction entry point.

use glam::Vec3;

use crate::constants::detach as detach_const;
use crate::constants::vobj;
use crate::physics::body::{self, VoxelObjectWorld};
use crate::rng::Rng;
use crate::voxel::connectivity::{self, ConnectivityWorkBuffer, IslandInfo};
use crate::voxel::volume::{self, Volume};

/// Carve a sphere of voxels out of a body's own local grid (§4.7 object
/// destruction). Marks the body's shape dirty and queues it for a split pass
/// so any resulting disconnected pieces become their own bodies.
pub fn destroy_at_point(world: &mut VoxelObjectWorld, body_index: usize, world_point: Vec3, radius: f32) -> u32 {
    if body_index >= world.objects.len() || !world.objects[body_index].active {
        return 0;
    }

    let (local_point, voxel_size, grid_len) = {
        let obj = &world.objects[body_index];
        let inv_orientation = obj.orientation.conjugate();
        let local = inv_orientation * (world_point - obj.position);
        (local, obj.voxel_size, obj.voxels.len())
    };

    let half = vobj::GRID_SIZE as f32 * 0.5;
    let voxel_radius = (radius / voxel_size).max(0.5);
    let mut removed = 0u32;

    let obj = &mut world.objects[body_index];
    for z in 0..vobj::GRID_SIZE {
        for y in 0..vobj::GRID_SIZE {
            for x in 0..vobj::GRID_SIZE {
                let idx = (x + y * vobj::GRID_SIZE + z * vobj::GRID_SIZE * vobj::GRID_SIZE) as usize;
                if idx >= grid_len || obj.voxels[idx] == 0 {
                    continue;
                }
                let center = Vec3::new(x as f32 + 0.5 - half, y as f32 + 0.5 - half, z as f32 + 0.5 - half);
                if (center - local_point / voxel_size).length_squared() <= voxel_radius * voxel_radius {
                    obj.voxels[idx] = 0;
                    removed += 1;
                }
            }
        }
    }

    if removed > 0 {
        obj.shape_dirty = true;
        body::queue_split(world, body_index);
    }

    removed
}

#[derive(Debug, Clone, Copy)]
pub struct TerrainDetachConfig {
    pub enabled: bool,
    pub max_islands_per_tick: i32,
    pub min_voxels_per_island: i32,
    pub max_voxels_per_island: i32,
    pub max_bodies_alive: i32,
    pub anchor_y_offset: f32,
    /// Scale applied to the impact→island-center direction per axis before
    /// RNG jitter is added (§4.7); `y` also sets the positive vertical kick.
    pub initial_impulse_scale: Vec3,
}

impl Default for TerrainDetachConfig {
    fn default() -> Self {
        TerrainDetachConfig {
            enabled: true,
            max_islands_per_tick: detach_const::DEFAULT_MAX_ISLANDS_PER_TICK,
            min_voxels_per_island: detach_const::DEFAULT_MIN_VOXELS_PER_ISLAND,
            max_voxels_per_island: vobj::TOTAL_VOXELS as i32,
            max_bodies_alive: (vobj::MAX_OBJECTS - 8) as i32,
            anchor_y_offset: detach_const::DEFAULT_ANCHOR_Y_OFFSET,
            initial_impulse_scale: Vec3::new(2.0, 4.0, 2.0),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TerrainDetachResult {
    pub islands_found: i32,
    pub bodies_spawned: i32,
    pub voxels_removed: i64,
    pub islands_too_small: i32,
    pub islands_too_large: i32,
    pub islands_at_capacity: i32,
}

/// Find floating islands and spawn rigid bodies for every one that fits in a
/// body's 16^3 grid, up to `cfg.max_islands_per_tick` per call. Uses the
/// volume's dirty-edit tracking when the last edit touched chunks, a
/// full-volume scan otherwise (mirrors `vol->last_edit_count > 0` in the
/// original `terrain_detach_process`). `impact_point` is the center of the
/// destruction that triggered this call; spawned bodies are kicked away from
/// it (§4.7).
pub fn terrain_detach_process(
    vol: &mut Volume,
    obj_world: &mut VoxelObjectWorld,
    cfg: &TerrainDetachConfig,
    work: &mut ConnectivityWorkBuffer,
    impact_point: Vec3,
    rng: &mut Rng,
) -> TerrainDetachResult {
    let mut result = TerrainDetachResult::default();
    if !cfg.enabled {
        return result;
    }

    let mut active_bodies = obj_world.objects.iter().filter(|o| o.active).count() as i32;

    let anchor_y = vol.bounds.min.y + cfg.anchor_y_offset;
    let analysis = if !vol.last_edit_chunks.is_empty() {
        connectivity::analyze_dirty(vol, anchor_y, 0, work)
    } else {
        connectivity::analyze_volume(vol, anchor_y, 0, work)
    };

    result.islands_found = analysis.floating_count;

    let mut processed = 0;
    for island in &analysis.islands {
        if !island.is_floating {
            continue;
        }
        if processed >= cfg.max_islands_per_tick {
            break;
        }
        processed += 1;

        if island.voxel_count < cfg.min_voxels_per_island {
            result.islands_too_small += 1;
            connectivity::remove_island(vol, island, work);
            result.voxels_removed += island.voxel_count as i64;
            continue;
        }

        if island.voxel_count > cfg.max_voxels_per_island || !fits_in_body_grid(island) {
            result.islands_too_large += 1;
            continue;
        }

        if active_bodies >= cfg.max_bodies_alive {
            result.islands_at_capacity += 1;
            continue;
        }

        match spawn_body_from_island(vol, obj_world, island, work, cfg, impact_point, rng) {
            Some(voxels_copied) => {
                result.bodies_spawned += 1;
                result.voxels_removed += voxels_copied as i64;
                active_bodies += 1;
            }
            None => {
                result.islands_at_capacity += 1;
            }
        }
    }

    result
}

fn fits_in_body_grid(island: &IslandInfo) -> bool {
    let size_x = island.voxel_max.0 - island.voxel_min.0 + 1;
    let size_y = island.voxel_max.1 - island.voxel_min.1 + 1;
    let size_z = island.voxel_max.2 - island.voxel_min.2 + 1;
    size_x <= vobj::GRID_SIZE && size_y <= vobj::GRID_SIZE && size_z <= vobj::GRID_SIZE
}

fn spawn_body_from_island(
    vol: &mut Volume,
    obj_world: &mut VoxelObjectWorld,
    island: &IslandInfo,
    work: &ConnectivityWorkBuffer,
    cfg: &TerrainDetachConfig,
    impact_point: Vec3,
    rng: &mut Rng,
) -> Option<u32> {
    let mut buffer = vec![0u8; vobj::TOTAL_VOXELS];
    let (copied, origin) = connectivity::extract_island_with_ids(
        vol,
        island,
        work,
        &mut buffer,
        (vobj::GRID_SIZE, vobj::GRID_SIZE, vobj::GRID_SIZE),
    );
    if copied == 0 {
        return None;
    }

    // Direction from the impact toward the island's center of mass, scaled
    // per axis and RNG-jittered (§4.7, `terrain_detach_process` in the
    // original source).
    let to_island = island.center_of_mass - impact_point;
    let dist = to_island.length();
    let dir = if dist > 1e-3 { to_island / dist } else { Vec3::Y };

    let initial_vel = Vec3::new(
        dir.x * cfg.initial_impulse_scale.x + rng.range_f32(-0.5, 0.5),
        dir.y * cfg.initial_impulse_scale.y + rng.range_f32(0.0, 1.0),
        dir.z * cfg.initial_impulse_scale.z + rng.range_f32(-0.5, 0.5),
    );

    // `origin` is the world position of the extracted grid's (0,0,0) corner;
    // VoxelObject::position is its geometric center, so offset by half the
    // island's world-space size.
    let size_x = (island.voxel_max.0 - island.voxel_min.0 + 1) as f32 * vol.voxel_size;
    let size_y = (island.voxel_max.1 - island.voxel_min.1 + 1) as f32 * vol.voxel_size;
    let size_z = (island.voxel_max.2 - island.voxel_min.2 + 1) as f32 * vol.voxel_size;
    let center = origin + Vec3::new(size_x, size_y, size_z) * 0.5;

    let spawned = body::add_from_voxels(obj_world, buffer, vol.voxel_size, center, initial_vel);
    if spawned.is_some() {
        connectivity::remove_island(vol, island, work);
    }
    spawned.map(|_| copied as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::volume::Bounds3D;

    fn small_volume() -> Volume {
        volume::create_dims(4, 4, 4, Vec3::ZERO, 1.0)
    }

    #[test]
    fn destroy_at_point_removes_voxels_and_queues_split() {
        let bounds = Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) };
        let mut world = body::create_world(bounds, Vec3::ZERO);
        let idx = body::add_box(&mut world, Vec3::new(0.0, 20.0, 0.0), Vec3::splat(0.8), Vec3::ZERO).unwrap();
        let removed = destroy_at_point(&mut world, idx, Vec3::new(0.0, 20.0, 0.0), 0.5);
        assert!(removed > 0);
        assert!(world.objects[idx].shape_dirty);
    }

    #[test]
    fn terrain_detach_spawns_body_for_small_floating_island() {
        let mut vol = small_volume();
        volume::fill_box(&mut vol, Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 1.0, 4.0), 1);
        volume::fill_box(&mut vol, Vec3::new(1.0, 3.0, 1.0), Vec3::new(3.0, 5.0, 3.0), 1);
        volume::rebuild_all_occupancy(&mut vol);

        let bounds = Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) };
        let mut obj_world = body::create_world(bounds, Vec3::ZERO);
        let mut work = connectivity::work_init(&vol);
        let cfg = TerrainDetachConfig::default();
        let mut rng = Rng::new(1);

        let result = terrain_detach_process(&mut vol, &mut obj_world, &cfg, &mut work, Vec3::ZERO, &mut rng);
        assert!(result.bodies_spawned >= 1);
    }

    #[test]
    fn too_small_islands_are_removed_without_spawning() {
        let mut vol = small_volume();
        volume::fill_box(&mut vol, Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 1.0, 4.0), 1);
        volume::set_at(&mut vol, Vec3::new(1.5, 3.0, 1.5), 1);
        volume::rebuild_all_occupancy(&mut vol);

        let bounds = Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) };
        let mut obj_world = body::create_world(bounds, Vec3::ZERO);
        let mut work = connectivity::work_init(&vol);
        let mut cfg = TerrainDetachConfig::default();
        cfg.min_voxels_per_island = 4;
        let mut rng = Rng::new(2);

        let result = terrain_detach_process(&mut vol, &mut obj_world, &cfg, &mut work, Vec3::ZERO, &mut rng);
        assert_eq!(result.bodies_spawned, 0);
        assert!(result.islands_too_small >= 1);
    }

    #[test]
    fn spawned_body_velocity_points_away_from_impact() {
        let mut vol = small_volume();
        volume::fill_box(&mut vol, Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 1.0, 4.0), 1);
        volume::fill_box(&mut vol, Vec3::new(1.0, 3.0, 1.0), Vec3::new(3.0, 5.0, 3.0), 1);
        volume::rebuild_all_occupancy(&mut vol);

        let bounds = Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) };
        let mut obj_world = body::create_world(bounds, Vec3::ZERO);
        let mut work = connectivity::work_init(&vol);
        let cfg = TerrainDetachConfig::default();
        let mut rng = Rng::new(3);

        // Impact directly below the island: the spawned body's kick should
        // point upward, away from the impact (§4.7).
        let result = terrain_detach_process(&mut vol, &mut obj_world, &cfg, &mut work, Vec3::new(2.0, -10.0, 2.0), &mut rng);
        assert!(result.bodies_spawned >= 1);
        let spawned = obj_world.objects.iter().find(|o| o.active).unwrap();
        assert!(spawned.linear_velocity.y > 0.0);
    }

    #[test]
    fn capacity_cap_blocks_spawn_before_extraction() {
        let mut vol = small_volume();
        volume::fill_box(&mut vol, Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 1.0, 4.0), 1);
        volume::fill_box(&mut vol, Vec3::new(1.0, 3.0, 1.0), Vec3::new(3.0, 5.0, 3.0), 1);
        volume::rebuild_all_occupancy(&mut vol);

        let bounds = Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) };
        let mut obj_world = body::create_world(bounds, Vec3::ZERO);
        let mut work = connectivity::work_init(&vol);
        let mut cfg = TerrainDetachConfig::default();
        cfg.max_bodies_alive = 0;
        let mut rng = Rng::new(4);

        let result = terrain_detach_process(&mut vol, &mut obj_world, &cfg, &mut work, Vec3::ZERO, &mut rng);
        assert_eq!(result.bodies_spawned, 0);
        assert!(result.islands_at_capacity >= 1);
        assert!(volume::is_solid_at(&vol, Vec3::new(2.0, 4.0, 2.0)));
    }
}
