//! Detachable voxel-body rigid body physics (C6): per-body voxel grid,
//! inertia, integration, and the world that owns a fixed pool of bodies.
//!
//! Grounded on `engine/sim/voxel_object.h`, `engine/voxel/voxel_object.h`, and
//! `engine/physics/voxel_body.c` for the per-body grid/shape-cache layout and
//! the floor/terrain collision response; the inertia and integration pipeline
//! additionally follows `engine/physics/rigid_body.h/.c`'s Padé damping and
//! small-angle quaternion update. The object pool itself (fixed `Vec` sized to
//! `MAX_OBJECTS`, `active` flag instead of removal) matches the teacher's
//! `memory`-module pooling convention used throughout its ECS-adjacent types.

use glam::{Mat3, Quat, Vec3};

use crate::constants::vobj;
use crate::physics::aabb::AABB;
use crate::physics::broadphase::{self, SpatialHash};
use crate::physics::bvh::{self, Bvh};
use crate::physics::contact;
use crate::rng::Rng;
use crate::voxel::volume::{Bounds3D, Volume};

const HIGH_IMPACT_THRESHOLD: f32 = 4.0;
const ANGULAR_DAMPING_ON_IMPACT: f32 = 0.6;
const ANGULAR_IMPACT_COEFF: f32 = 0.4;
const GROUNDED_NORMAL_THRESHOLD: f32 = 0.5;
const TOPPLE_STRENGTH: f32 = 1.5;
const MAX_ANGULAR_VELOCITY: f32 = 12.0;
const TUNNELING_SPEED_FACTOR: f32 = 0.9;
const MIN_INERTIA: f32 = 1e-5;

/// 14 evenly spread directions (6 face normals + 8 corner diagonals of a
/// cube) used to probe a body's bounding sphere against terrain for a rough,
/// cheap contact normal without a full voxel-vs-voxel sweep.
fn probe_directions() -> [Vec3; 14] {
    let c = 0.577_350_26_f32; // 1/sqrt(3), corner diagonal component
    [
        Vec3::X,
        Vec3::NEG_X,
        Vec3::Y,
        Vec3::NEG_Y,
        Vec3::Z,
        Vec3::NEG_Z,
        Vec3::new(c, c, c),
        Vec3::new(c, c, -c),
        Vec3::new(c, -c, c),
        Vec3::new(c, -c, -c),
        Vec3::new(-c, c, c),
        Vec3::new(-c, c, -c),
        Vec3::new(-c, -c, c),
        Vec3::new(-c, -c, -c),
    ]
}

fn voxel_index(x: i32, y: i32, z: i32) -> usize {
    (x + y * vobj::GRID_SIZE + z * vobj::GRID_SIZE * vobj::GRID_SIZE) as usize
}

fn in_bounds(x: i32, y: i32, z: i32) -> bool {
    x >= 0 && y >= 0 && z >= 0 && x < vobj::GRID_SIZE && y < vobj::GRID_SIZE && z < vobj::GRID_SIZE
}

/// One detached voxel structure: a 16^3 local grid plus rigid-body state.
pub struct VoxelObject {
    pub active: bool,
    pub sleeping: bool,
    pub on_ground: bool,
    pub settle_timer: f32,
    pub shape_dirty: bool,

    pub position: Vec3,
    pub linear_velocity: Vec3,
    pub orientation: Quat,
    pub angular_velocity: Vec3,

    pub mass: f32,
    pub inv_mass: f32,
    pub inv_inertia_local: Mat3,

    pub half_extents: Vec3,
    pub bounding_radius: f32,
    pub world_min: Vec3,
    pub world_max: Vec3,
    pub bounds_dirty: bool,

    pub voxels: Vec<u8>,
    pub voxel_size: f32,
    pub solid_count: u32,
    /// One bit per 2x2x2-of-8^3-voxel octant; set if any voxel there is solid.
    pub octant_mask: u8,
}

fn empty_object() -> VoxelObject {
    VoxelObject {
        active: false,
        sleeping: false,
        on_ground: false,
        settle_timer: 0.0,
        shape_dirty: false,
        position: Vec3::ZERO,
        linear_velocity: Vec3::ZERO,
        orientation: Quat::IDENTITY,
        angular_velocity: Vec3::ZERO,
        mass: 1.0,
        inv_mass: 1.0,
        inv_inertia_local: Mat3::IDENTITY,
        half_extents: Vec3::ONE,
        bounding_radius: 1.0,
        world_min: Vec3::ZERO,
        world_max: Vec3::ZERO,
        bounds_dirty: true,
        voxels: Vec::new(),
        voxel_size: 0.1,
        solid_count: 0,
        octant_mask: 0,
    }
}

/// Recompute `half_extents`, `bounding_radius`, `solid_count`, `octant_mask`
/// and inertia from the current voxel grid. Called after carving voxels out
/// (detach destruction) or on initial creation from an arbitrary buffer.
pub fn rebuild_shape(obj: &mut VoxelObject) {
    let mut min = (i32::MAX, i32::MAX, i32::MAX);
    let mut max = (i32::MIN, i32::MIN, i32::MIN);
    let mut count = 0u32;
    let mut octant_mask = 0u8;

    for z in 0..vobj::GRID_SIZE {
        for y in 0..vobj::GRID_SIZE {
            for x in 0..vobj::GRID_SIZE {
                if obj.voxels[voxel_index(x, y, z)] == 0 {
                    continue;
                }
                count += 1;
                min = (min.0.min(x), min.1.min(y), min.2.min(z));
                max = (max.0.max(x), max.1.max(y), max.2.max(z));

                let half = vobj::GRID_SIZE / 2;
                let ox = if x >= half { 1 } else { 0 };
                let oy = if y >= half { 1 } else { 0 };
                let oz = if z >= half { 1 } else { 0 };
                octant_mask |= 1 << (ox | (oy << 1) | (oz << 2));
            }
        }
    }

    obj.solid_count = count;
    obj.octant_mask = octant_mask;

    if count == 0 {
        obj.half_extents = Vec3::ZERO;
        obj.bounding_radius = 0.0;
        obj.mass = 0.0;
        obj.inv_mass = 0.0;
        obj.shape_dirty = false;
        return;
    }

    let size_x = (max.0 - min.0 + 1) as f32 * obj.voxel_size;
    let size_y = (max.1 - min.1 + 1) as f32 * obj.voxel_size;
    let size_z = (max.2 - min.2 + 1) as f32 * obj.voxel_size;
    obj.half_extents = Vec3::new(size_x, size_y, size_z) * 0.5;
    obj.bounding_radius = obj.half_extents.length();

    let voxel_mass = 1.0;
    obj.mass = count as f32 * voxel_mass;
    obj.inv_mass = if obj.mass > 0.0 { 1.0 / obj.mass } else { 0.0 };

    let inertia = compute_box_inertia(obj.half_extents, obj.mass);
    obj.inv_inertia_local = Mat3::from_cols(
        Vec3::new(1.0 / inertia.x.max(MIN_INERTIA), 0.0, 0.0),
        Vec3::new(0.0, 1.0 / inertia.y.max(MIN_INERTIA), 0.0),
        Vec3::new(0.0, 0.0, 1.0 / inertia.z.max(MIN_INERTIA)),
    );

    obj.shape_dirty = false;
    obj.bounds_dirty = true;
}

fn compute_box_inertia(half_extents: Vec3, mass: f32) -> Vec3 {
    let w = 2.0 * half_extents.x;
    let h = 2.0 * half_extents.y;
    let d = 2.0 * half_extents.z;
    Vec3::new(
        mass / 12.0 * (h * h + d * d),
        mass / 12.0 * (w * w + d * d),
        mass / 12.0 * (w * w + h * h),
    )
}

fn update_bounds_cache(obj: &mut VoxelObject) {
    if !obj.bounds_dirty {
        return;
    }
    let r = Mat3::from_quat(obj.orientation);
    let abs_r = Mat3::from_cols(r.x_axis.abs(), r.y_axis.abs(), r.z_axis.abs());
    let world_half = abs_r * obj.half_extents;
    obj.world_min = obj.position - world_half;
    obj.world_max = obj.position + world_half;
    obj.bounds_dirty = false;
}

pub fn world_aabb(obj: &VoxelObject) -> AABB {
    AABB { min: obj.world_min, max: obj.world_max }
}

fn velocity_dependent_restitution(impact_speed: f32, base_restitution: f32) -> f32 {
    velocity_dependent_restitution_scaled(impact_speed, base_restitution, 0.1)
}

/// Velocity-dependent restitution with a caller-chosen low-speed scale: full
/// `base_restitution` above `HIGH_IMPACT_THRESHOLD`, `base_restitution *
/// low_speed_scale` between `MIN_BOUNCE_VELOCITY` and that, zero below.
/// Floor/terrain contacts use a 0.1x low-speed scale; body-body contacts use
/// 0.3x (`engine/physics/voxel_body.c`'s `resolve_object_collision`).
fn velocity_dependent_restitution_scaled(impact_speed: f32, base_restitution: f32, low_speed_scale: f32) -> f32 {
    if impact_speed < vobj::MIN_BOUNCE_VELOCITY {
        0.0
    } else if impact_speed > HIGH_IMPACT_THRESHOLD {
        base_restitution
    } else {
        base_restitution * low_speed_scale
    }
}

// ---------------------------------------------------------------------
// World: fixed pool of bodies plus shared broadphase/BVH state
// ---------------------------------------------------------------------

pub struct VoxelObjectWorld {
    pub objects: Vec<VoxelObject>,
    pub bounds: Bounds3D,
    pub gravity: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub floor_friction: f32,
    pub spatial_hash: SpatialHash,
    pub bvh: Bvh,
    split_queue: Vec<usize>,
    recalc_cursor: usize,
}

pub fn create_world(bounds: Bounds3D, gravity: Vec3) -> VoxelObjectWorld {
    let mut objects = Vec::with_capacity(vobj::MAX_OBJECTS);
    for _ in 0..vobj::MAX_OBJECTS {
        objects.push(empty_object());
    }
    VoxelObjectWorld {
        objects,
        bounds,
        gravity,
        linear_damping: 0.98,
        angular_damping: 0.95,
        restitution: 0.3,
        floor_friction: 0.4,
        spatial_hash: broadphase::create_spatial_hash(4.0),
        bvh: bvh::create(),
        split_queue: Vec::with_capacity(vobj::SPLIT_QUEUE_SIZE),
        recalc_cursor: 0,
    }
}

fn alloc_slot(world: &mut VoxelObjectWorld) -> Option<usize> {
    world.objects.iter().position(|o| !o.active)
}

/// Spawn a body whose grid is filled with a sphere of solid voxels.
pub fn add_sphere(
    world: &mut VoxelObjectWorld,
    center: Vec3,
    radius: f32,
    voxel_size: f32,
    velocity: Vec3,
) -> Option<usize> {
    let slot = alloc_slot(world)?;
    let mut voxels = vec![0u8; vobj::TOTAL_VOXELS];
    let grid_center = vobj::GRID_SIZE as f32 * 0.5;
    let voxel_radius = (radius / voxel_size).max(1.0);

    for z in 0..vobj::GRID_SIZE {
        for y in 0..vobj::GRID_SIZE {
            for x in 0..vobj::GRID_SIZE {
                let dx = x as f32 + 0.5 - grid_center;
                let dy = y as f32 + 0.5 - grid_center;
                let dz = z as f32 + 0.5 - grid_center;
                if dx * dx + dy * dy + dz * dz <= voxel_radius * voxel_radius {
                    voxels[voxel_index(x, y, z)] = 1;
                }
            }
        }
    }

    spawn_from_voxels(world, slot, voxels, voxel_size, center, velocity);
    Some(slot)
}

/// Spawn a body whose grid is entirely solid (a box of the given half-extents).
pub fn add_box(
    world: &mut VoxelObjectWorld,
    center: Vec3,
    half_extents: Vec3,
    velocity: Vec3,
) -> Option<usize> {
    let slot = alloc_slot(world)?;
    let voxel_size = (half_extents.max_element() * 2.0 / vobj::GRID_SIZE as f32).max(1e-4);
    let voxels = vec![1u8; vobj::TOTAL_VOXELS];
    spawn_from_voxels(world, slot, voxels, voxel_size, center, velocity);
    Some(slot)
}

/// Spawn a body from an externally supplied 16^3 voxel buffer, as used by
/// detachment (the buffer comes from [`crate::voxel::connectivity::extract_island_with_ids`]).
pub fn add_from_voxels(
    world: &mut VoxelObjectWorld,
    voxels: Vec<u8>,
    voxel_size: f32,
    position: Vec3,
    velocity: Vec3,
) -> Option<usize> {
    let slot = alloc_slot(world)?;
    spawn_from_voxels(world, slot, voxels, voxel_size, position, velocity);
    Some(slot)
}

fn spawn_from_voxels(
    world: &mut VoxelObjectWorld,
    slot: usize,
    voxels: Vec<u8>,
    voxel_size: f32,
    position: Vec3,
    velocity: Vec3,
) {
    let obj = &mut world.objects[slot];
    *obj = empty_object();
    obj.active = true;
    obj.position = position;
    obj.linear_velocity = velocity;
    obj.voxels = voxels;
    obj.voxel_size = voxel_size;
    rebuild_shape(obj);
    update_bounds_cache(obj);
}

pub fn destroy(world: &mut VoxelObjectWorld, index: usize) {
    if index < world.objects.len() {
        world.objects[index] = empty_object();
    }
}

/// Nearest active body hit by the ray, treating each body as its bounding
/// sphere (the cheap approximation the BVH queries already use).
pub fn raycast(world: &VoxelObjectWorld, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<(usize, f32)> {
    let dir = dir.normalize_or_zero();
    if dir == Vec3::ZERO {
        return None;
    }

    let mut best: Option<(usize, f32)> = None;
    for (i, obj) in world.objects.iter().enumerate() {
        if !obj.active {
            continue;
        }
        let to_center = obj.position - origin;
        let proj = to_center.dot(dir);
        if proj < 0.0 || proj > max_dist {
            continue;
        }
        let closest = origin + dir * proj;
        let dist_sq = (closest - obj.position).length_squared();
        if dist_sq <= obj.bounding_radius * obj.bounding_radius {
            if best.map_or(true, |(_, bt)| proj < bt) {
                best = Some((i, proj));
            }
        }
    }
    best
}

pub fn queue_split(world: &mut VoxelObjectWorld, index: usize) {
    if world.split_queue.len() < vobj::SPLIT_QUEUE_SIZE && !world.split_queue.contains(&index) {
        world.split_queue.push(index);
    }
}

/// Advance every active, non-sleeping body by `dt`: gravity + topple torque,
/// damping, integration, floor/terrain/body-body collision, sleep tracking,
/// then bounded deferred split/recalc processing (§4.5).
pub fn update(world: &mut VoxelObjectWorld, dt: f32, terrain: Option<&Volume>, rng: &mut Rng) {
    let directions = probe_directions();

    for i in 0..world.objects.len() {
        if !world.objects[i].active || world.objects[i].sleeping {
            continue;
        }
        integrate_one(world, i, dt, terrain, &directions);
    }

    resolve_body_body_collisions(world);
    enforce_floor(world);
    update_sleep_states(world, dt);
    process_recalcs(world);
    process_splits(world, rng);
}

/// Post-collision ground enforcement: a bounded number of passes so stacked
/// bodies pushed below the floor by pair resolution cannot leak through it
/// (§4.5.4). Stops early once a pass makes no correction.
fn enforce_floor(world: &mut VoxelObjectWorld) {
    let floor_y = world.bounds.min.y;
    for _ in 0..vobj::COLLISION_GROUND_ITERATIONS {
        let mut any_correction = false;
        for obj in &mut world.objects {
            if !obj.active {
                continue;
            }
            update_bounds_cache(obj);
            if obj.world_min.y < floor_y {
                let penetration = floor_y - obj.world_min.y;
                obj.position.y += penetration;
                obj.world_min.y += penetration;
                obj.world_max.y += penetration;
                if obj.linear_velocity.y < 0.0 {
                    obj.linear_velocity.y = 0.0;
                }
                obj.on_ground = true;
                obj.bounds_dirty = true;
                any_correction = true;
            }
        }
        if !any_correction {
            break;
        }
    }
}

fn integrate_one(world: &mut VoxelObjectWorld, i: usize, dt: f32, terrain: Option<&Volume>, directions: &[Vec3; 14]) {
    let gravity = world.gravity;
    let linear_damping = world.linear_damping;
    let angular_damping = world.angular_damping;
    let restitution = world.restitution;
    let floor_friction = world.floor_friction;
    let floor_y = world.bounds.min.y;
    let out_of_bounds_y = floor_y - vobj::OUT_OF_BOUNDS_MARGIN;

    let obj = &mut world.objects[i];

    obj.linear_velocity += gravity * dt;
    apply_topple_torque(obj, dt);

    obj.linear_velocity /= 1.0 + dt * (1.0 - linear_damping);
    obj.angular_velocity /= 1.0 + dt * (1.0 - angular_damping);

    let speed = obj.linear_velocity.length();
    let max_speed = (obj.bounding_radius.max(0.01) * TUNNELING_SPEED_FACTOR) / dt.max(1e-4);
    if speed > max_speed {
        obj.linear_velocity *= max_speed / speed;
    }
    obj.angular_velocity = obj.angular_velocity.clamp_length_max(MAX_ANGULAR_VELOCITY);

    update_bounds_cache(obj);
    let predicted_lowest_y = obj.world_min.y + obj.linear_velocity.y * dt;
    if predicted_lowest_y < floor_y {
        obj.linear_velocity.y = (floor_y - obj.world_min.y) / dt.max(1e-4);
    }

    obj.position += obj.linear_velocity * dt;
    let half = obj.angular_velocity * dt * 0.5;
    let delta = Quat::from_xyzw(half.x, half.y, half.z, 1.0).normalize();
    obj.orientation = (delta * obj.orientation).normalize();
    obj.bounds_dirty = true;
    obj.on_ground = false;

    resolve_floor_collision(obj, floor_y, restitution, floor_friction);
    if let Some(vol) = terrain {
        resolve_terrain_collision(obj, vol, restitution, floor_friction, directions);
    }

    if obj.position.y < out_of_bounds_y {
        obj.active = false;
    }
}

fn apply_topple_torque(obj: &mut VoxelObject, dt: f32) {
    let speed = obj.linear_velocity.length();
    if speed < vobj::SETTLING_VELOCITY {
        return;
    }
    let to_lowest = Vec3::new(0.0, -obj.half_extents.y.max(1e-4), 0.0);
    let horizontal = Vec3::new(to_lowest.z, 0.0, -to_lowest.x).normalize_or_zero();
    if horizontal == Vec3::ZERO {
        return;
    }
    obj.angular_velocity += horizontal * TOPPLE_STRENGTH * speed.min(4.0) * dt;
}

fn resolve_floor_collision(obj: &mut VoxelObject, floor_y: f32, restitution: f32, friction: f32) {
    update_bounds_cache(obj);
    if obj.world_min.y >= floor_y {
        return;
    }

    let penetration = floor_y - obj.world_min.y;
    obj.position.y += penetration;
    obj.world_min.y += penetration;
    obj.world_max.y += penetration;

    let impact_speed = -obj.linear_velocity.y;
    if impact_speed > 0.0 {
        let r = velocity_dependent_restitution(impact_speed, restitution);
        obj.linear_velocity.y = impact_speed * r;
    }

    obj.linear_velocity.x *= 1.0 - friction;
    obj.linear_velocity.z *= 1.0 - friction;
    obj.angular_velocity *= ANGULAR_DAMPING_ON_IMPACT;

    if !is_settled(obj) {
        let horizontal_vel = Vec3::new(obj.linear_velocity.x, 0.0, obj.linear_velocity.z);
        if horizontal_vel != Vec3::ZERO {
            let torque = horizontal_vel.cross(Vec3::Y) * ANGULAR_IMPACT_COEFF;
            obj.angular_velocity += torque;
        }
    }

    obj.on_ground = true;
}

fn resolve_terrain_collision(
    obj: &mut VoxelObject,
    terrain: &Volume,
    restitution: f32,
    friction: f32,
    directions: &[Vec3; 14],
) {
    let mut push_sum = Vec3::ZERO;
    let mut inside_count = 0;

    for &dir in directions {
        let probe = obj.position + dir * obj.bounding_radius;
        if contact::contact_point(terrain, probe) {
            push_sum -= dir;
            inside_count += 1;
        }
    }

    if inside_count == 0 {
        return;
    }

    let push_dir = (push_sum / inside_count as f32).normalize_or_zero();
    if push_dir == Vec3::ZERO {
        return;
    }

    obj.position += push_dir * (terrain.voxel_size * 0.5);
    obj.bounds_dirty = true;

    let normal_vel = obj.linear_velocity.dot(push_dir);
    if normal_vel < 0.0 {
        let r = velocity_dependent_restitution(-normal_vel, restitution);
        obj.linear_velocity -= push_dir * (normal_vel * (1.0 + r));
    }

    let tangent_vel = obj.linear_velocity - push_dir * obj.linear_velocity.dot(push_dir);
    obj.linear_velocity -= tangent_vel * friction;

    if push_dir.y > GROUNDED_NORMAL_THRESHOLD {
        obj.on_ground = true;
    }
}

fn is_settled(obj: &VoxelObject) -> bool {
    obj.linear_velocity.length() < vobj::SETTLING_VELOCITY
}

/// Body-body collisions (§4.5.4), broadphased via the shared spatial hash.
fn resolve_body_body_collisions(world: &mut VoxelObjectWorld) {
    let bodies: Vec<(i32, Vec3, f32)> = world
        .objects
        .iter()
        .enumerate()
        .filter(|(_, o)| o.active)
        .map(|(i, o)| (i as i32, o.position, o.bounding_radius))
        .collect();

    if bodies.is_empty() {
        return;
    }

    let pairs = broadphase::spatial_hash_find_pairs(&mut world.spatial_hash, &bodies);

    for (a, b) in pairs {
        let (a, b) = (a as usize, b as usize);
        resolve_pair(world, a, b);
    }
}

fn resolve_pair(world: &mut VoxelObjectWorld, a: usize, b: usize) {
    let restitution = world.restitution;
    let (pos_a, pos_b, r_a, r_b, inv_mass_a, inv_mass_b, vel_a, vel_b) = {
        let oa = &world.objects[a];
        let ob = &world.objects[b];
        (
            oa.position,
            ob.position,
            oa.bounding_radius,
            ob.bounding_radius,
            oa.inv_mass,
            ob.inv_mass,
            oa.linear_velocity,
            ob.linear_velocity,
        )
    };

    let delta = pos_b - pos_a;
    let dist = delta.length();
    let overlap = r_a + r_b - dist;
    if overlap <= 0.0 || dist < 1e-6 {
        return;
    }

    let total_inv_mass = inv_mass_a + inv_mass_b;
    if total_inv_mass <= 0.0 {
        return;
    }

    let normal = delta / dist;

    // Slight over-correction to prevent persistent overlap (§4.5.4 step 3).
    let separation = overlap * vobj::COLLISION_OVER_CORRECTION;
    world.objects[a].position -= normal * (separation / total_inv_mass * inv_mass_a);
    world.objects[b].position += normal * (separation / total_inv_mass * inv_mass_b);
    world.objects[a].bounds_dirty = true;
    world.objects[b].bounds_dirty = true;

    let relative_vel = vel_a - vel_b;
    let closing_speed = relative_vel.dot(normal);

    // Separating: nothing further to resolve.
    if closing_speed > 0.0 {
        return;
    }

    let impact_speed = -closing_speed;
    if impact_speed < vobj::CONTACT_VELOCITY_THRESHOLD {
        // Low relative velocity: just remove the normal component to avoid jitter.
        world.objects[a].linear_velocity -= normal * (closing_speed * inv_mass_a / total_inv_mass);
        world.objects[b].linear_velocity += normal * (closing_speed * inv_mass_b / total_inv_mass);
        return;
    }

    // Significant impact: wake both bodies (§4.5.4 step 5).
    world.objects[a].sleeping = false;
    world.objects[b].sleeping = false;
    world.objects[a].settle_timer = 0.0;
    world.objects[b].settle_timer = 0.0;

    let effective_restitution =
        velocity_dependent_restitution_scaled(impact_speed, restitution, vobj::OBJECT_LOW_SPEED_RESTITUTION_SCALE);

    let j = -(1.0 + effective_restitution) * closing_speed / total_inv_mass;
    let impulse = normal * j;
    world.objects[a].linear_velocity += impulse * inv_mass_a;
    world.objects[b].linear_velocity -= impulse * inv_mass_b;

    // Friction impulse bounded by mu * |j_n|, with an angular response from
    // the tangent (§4.5.4 step 5).
    let tangent_vel = relative_vel - normal * closing_speed;
    let tangent_speed = tangent_vel.length();
    if tangent_speed > 1e-3 {
        let tangent = tangent_vel / tangent_speed;
        let friction_j = (tangent_speed * vobj::COLLISION_FRICTION_COEFF).min(j.abs() * vobj::COLLISION_FRICTION_COEFF);
        let friction_j = friction_j / total_inv_mass;

        let angular = normal.cross(tangent) * friction_j;
        world.objects[a].angular_velocity += angular * inv_mass_a;
        world.objects[b].angular_velocity -= angular * inv_mass_b;
    }
}

fn update_sleep_states(world: &mut VoxelObjectWorld, dt: f32) {
    for obj in &mut world.objects {
        if !obj.active {
            continue;
        }

        if obj.sleeping {
            if obj.linear_velocity.length() > vobj::WAKE_VELOCITY_THRESHOLD {
                obj.sleeping = false;
                obj.settle_timer = 0.0;
            }
            continue;
        }

        let calm = obj.on_ground
            && obj.linear_velocity.length() < vobj::SLEEP_VELOCITY_THRESHOLD
            && obj.angular_velocity.length() < vobj::SLEEP_ANGULAR_THRESHOLD;

        if calm {
            obj.settle_timer += dt;
            if obj.settle_timer >= vobj::SLEEP_TIME_REQUIRED {
                obj.sleeping = true;
                obj.linear_velocity = Vec3::ZERO;
                obj.angular_velocity = Vec3::ZERO;
            }
        } else {
            obj.settle_timer = 0.0;
        }
    }
}

/// Re-measure shape for up to `MAX_RECALCS_PER_TICK` dirty bodies per call,
/// round-robin across the pool so no body starves under sustained load.
fn process_recalcs(world: &mut VoxelObjectWorld) {
    let len = world.objects.len();
    if len == 0 {
        return;
    }

    let mut processed = 0;
    let mut cursor = world.recalc_cursor;

    for _ in 0..len {
        if processed >= vobj::MAX_RECALCS_PER_TICK {
            break;
        }
        if world.objects[cursor].active && world.objects[cursor].shape_dirty {
            rebuild_shape(&mut world.objects[cursor]);
            processed += 1;
        }
        cursor = (cursor + 1) % len;
    }

    world.recalc_cursor = cursor;
}

/// Split each queued body's grid into its connected components (§4.5.5),
/// 6-connected flood fill over the body's own 16^3 grid with no anchor
/// concept (a detached body has nothing to anchor to). The largest resulting
/// component keeps the original slot; the rest spawn new bodies if capacity
/// allows, and are otherwise discarded.
fn process_splits(world: &mut VoxelObjectWorld, rng: &mut Rng) {
    let mut processed = 0;
    let mut remaining = Vec::new();

    while let Some(index) = world.split_queue.pop() {
        if processed >= vobj::MAX_SPLITS_PER_TICK {
            remaining.push(index);
            continue;
        }
        if !world.objects[index].active {
            continue;
        }
        split_object(world, index, rng);
        processed += 1;
    }

    world.split_queue = remaining;
}

fn split_object(world: &mut VoxelObjectWorld, index: usize, rng: &mut Rng) {
    let components = flood_fill_grid(&world.objects[index].voxels);
    if components.len() <= 1 {
        world.objects[index].shape_dirty = false;
        return;
    }

    let (largest_idx, _) = components
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| c.len())
        .expect("split only runs when components.len() > 1");

    let voxel_size = world.objects[index].voxel_size;
    let base_position = world.objects[index].position;
    let base_velocity = world.objects[index].linear_velocity;

    for (i, component) in components.iter().enumerate() {
        if i == largest_idx {
            continue;
        }
        if component.len() < vobj::MIN_RESIDUAL_COMPONENT_VOXELS {
            continue;
        }
        let mut voxels = vec![0u8; vobj::TOTAL_VOXELS];
        for &(x, y, z) in component {
            voxels[voxel_index(x, y, z)] = 1;
        }
        let jitter = Vec3::new(rng.range_f32(-0.2, 0.2), 0.0, rng.range_f32(-0.2, 0.2));
        add_from_voxels(world, voxels, voxel_size, base_position, base_velocity + jitter);
    }

    let mut voxels = vec![0u8; vobj::TOTAL_VOXELS];
    for &(x, y, z) in &components[largest_idx] {
        voxels[voxel_index(x, y, z)] = 1;
    }
    world.objects[index].voxels = voxels;
    rebuild_shape(&mut world.objects[index]);
}

/// 6-connected flood fill over a 16^3 local grid. Returns each connected
/// component as a list of local voxel coordinates.
fn flood_fill_grid(voxels: &[u8]) -> Vec<Vec<(i32, i32, i32)>> {
    let mut visited = vec![false; voxels.len()];
    let mut components = Vec::new();

    for z in 0..vobj::GRID_SIZE {
        for y in 0..vobj::GRID_SIZE {
            for x in 0..vobj::GRID_SIZE {
                let idx = voxel_index(x, y, z);
                if visited[idx] || voxels[idx] == 0 {
                    continue;
                }

                let mut stack = vec![(x, y, z)];
                let mut component = Vec::new();
                visited[idx] = true;

                while let Some((cx, cy, cz)) = stack.pop() {
                    component.push((cx, cy, cz));
                    for &(dx, dy, dz) in &[(-1, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0), (0, 0, -1), (0, 0, 1)] {
                        let (nx, ny, nz) = (cx + dx, cy + dy, cz + dz);
                        if !in_bounds(nx, ny, nz) {
                            continue;
                        }
                        let nidx = voxel_index(nx, ny, nz);
                        if visited[nidx] || voxels[nidx] == 0 {
                            continue;
                        }
                        visited[nidx] = true;
                        stack.push((nx, ny, nz));
                    }
                }

                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::volume::Bounds3D;

    fn test_bounds() -> Bounds3D {
        Bounds3D { min: Vec3::new(-50.0, 0.0, -50.0), max: Vec3::new(50.0, 50.0, 50.0) }
    }

    #[test]
    fn add_sphere_produces_solid_voxels() {
        let mut world = create_world(test_bounds(), Vec3::new(0.0, -9.8, 0.0));
        let idx = add_sphere(&mut world, Vec3::new(0.0, 20.0, 0.0), 0.5, 0.1, Vec3::ZERO).unwrap();
        assert!(world.objects[idx].solid_count > 0);
        assert!(world.objects[idx].mass > 0.0);
    }

    #[test]
    fn gravity_integrates_downward_velocity() {
        let mut world = create_world(test_bounds(), Vec3::new(0.0, -9.8, 0.0));
        let idx = add_box(&mut world, Vec3::new(0.0, 20.0, 0.0), Vec3::splat(0.5), Vec3::ZERO).unwrap();
        let mut rng = Rng::new(1);
        update(&mut world, 0.1, None, &mut rng);
        assert!(world.objects[idx].linear_velocity.y < 0.0);
    }

    #[test]
    fn body_rests_on_floor_without_sinking() {
        let bounds = test_bounds();
        let mut world = create_world(bounds, Vec3::new(0.0, -9.8, 0.0));
        let idx = add_box(&mut world, Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5), Vec3::ZERO).unwrap();
        let mut rng = Rng::new(1);
        for _ in 0..200 {
            update(&mut world, 1.0 / 60.0, None, &mut rng);
        }
        update_bounds_cache_pub(&mut world.objects[idx]);
        assert!(world.objects[idx].world_min.y >= bounds.min.y - 0.01);
    }

    fn update_bounds_cache_pub(obj: &mut VoxelObject) {
        obj.bounds_dirty = true;
        update_bounds_cache(obj);
    }

    #[test]
    fn orientation_stays_normalized_after_many_ticks() {
        let mut world = create_world(test_bounds(), Vec3::new(0.0, -9.8, 0.0));
        let idx = add_box(&mut world, Vec3::new(0.0, 30.0, 0.0), Vec3::splat(0.5), Vec3::new(1.0, 0.0, 0.5)).unwrap();
        world.objects[idx].angular_velocity = Vec3::new(2.0, 1.0, 0.5);
        let mut rng = Rng::new(7);
        for _ in 0..60 {
            update(&mut world, 1.0 / 60.0, None, &mut rng);
        }
        let len = world.objects[idx].orientation.length();
        assert!((len - 1.0).abs() < 1e-3);
    }

    #[test]
    fn sleeping_body_stops_accumulating_velocity_changes() {
        let bounds = test_bounds();
        let mut world = create_world(bounds, Vec3::new(0.0, -9.8, 0.0));
        let idx = add_box(&mut world, Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5), Vec3::ZERO).unwrap();
        let mut rng = Rng::new(3);
        for _ in 0..300 {
            update(&mut world, 1.0 / 60.0, None, &mut rng);
        }
        assert!(world.objects[idx].sleeping);
        assert_eq!(world.objects[idx].linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn flood_fill_splits_disconnected_voxels() {
        let mut voxels = vec![0u8; vobj::TOTAL_VOXELS];
        voxels[voxel_index(0, 0, 0)] = 1;
        voxels[voxel_index(15, 15, 15)] = 1;
        let components = flood_fill_grid(&voxels);
        assert_eq!(components.len(), 2);
    }

    #[test]
    fn raycast_hits_body_bounding_sphere() {
        let mut world = create_world(test_bounds(), Vec3::ZERO);
        add_sphere(&mut world, Vec3::new(0.0, 20.0, 5.0), 0.5, 0.1, Vec3::ZERO).unwrap();
        let hit = raycast(&world, Vec3::new(0.0, 20.0, -50.0), Vec3::Z, 200.0);
        assert!(hit.is_some());
    }
}
