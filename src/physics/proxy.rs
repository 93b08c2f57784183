//! Generic proxy physics step (C10): a lightweight, non-rotating dynamics
//! object for things that don't need a full voxel body — player capsules,
//! pickups, fired projectiles, and destruction fragments.
//!
//! No surviving `physics_step.c` exists in the retrieval pack for this
//! component, so the step pipeline is built directly from SPEC_FULL.md §4.8;
//! the gravity/integrate/collide/damp shape mirrors [`crate::physics::body`]'s
//! tick (same teacher-grounded source), and the pairwise-collision
//! warm-starting pattern (tolerate a pair disappearing between ticks) is
//! adapted from `src/physics/collision_data.rs`'s `previous_pairs`/
//! `previous_impulses` scheme.

use glam::Vec3;

use crate::constants::uniform_grid::MAX_OBJECTS as MAX_PROXIES;
use crate::physics::broadphase::{self, UniformGrid};
use crate::physics::contact;
use crate::rng::Rng;
use crate::voxel::volume::{Bounds3D, Volume};

/// Below this many active proxies, pairwise collision runs as a direct O(n^2)
/// scan; above it, the uniform-grid broadphase takes over.
const BROADPHASE_THRESHOLD: usize = 64;
const TUNNELING_SPEED_FACTOR: f32 = 0.9;
const FRAGMENT_GRAVITY_SCALE: f32 = 1.0;
const FRAGMENT_MAX_LIFETIME: f32 = 8.0;
/// Lighter than a default [`Proxy`]'s restitution — fragments are debris, not
/// bouncy dynamics objects.
const FRAGMENT_RESTITUTION: f32 = 0.1;
const FRAGMENT_FLOOR_FRICTION: f32 = 0.5;
/// Below this combined linear+angular speed while on the floor, a fragment
/// snaps to rest instead of asymptotically settling forever.
const FRAGMENT_REST_VELOCITY: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProxyShape {
    Sphere { radius: f32 },
    Aabb { half_extents: Vec3 },
    Capsule { half_height: f32, radius: f32 },
}

impl ProxyShape {
    fn bounding_radius(&self) -> f32 {
        match *self {
            ProxyShape::Sphere { radius } => radius,
            ProxyShape::Aabb { half_extents } => half_extents.length(),
            ProxyShape::Capsule { half_height, radius } => half_height + radius,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyFlags {
    pub is_static: bool,
    pub affected_by_gravity: bool,
    pub collides_with_voxels: bool,
    pub collides_with_proxies: bool,
}

pub struct Proxy {
    pub active: bool,
    pub shape: ProxyShape,
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub inv_mass: f32,
    pub restitution: f32,
    pub friction: f32,
    pub flags: ProxyFlags,
    pub user_id: u32,
    pub grounded: bool,
}

fn empty_proxy() -> Proxy {
    Proxy {
        active: false,
        shape: ProxyShape::Sphere { radius: 0.5 },
        position: Vec3::ZERO,
        velocity: Vec3::ZERO,
        mass: 1.0,
        inv_mass: 1.0,
        restitution: 0.2,
        friction: 0.3,
        flags: ProxyFlags::default(),
        user_id: 0,
        grounded: false,
    }
}

/// Non-rotating debris spawned by destruction; simpler than a [`Proxy`] (no
/// flags, no collision against other fragments) since it only needs to look
/// right while falling, not participate fully in the simulation.
pub struct Fragment {
    pub active: bool,
    pub position: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub material: u8,
    pub lifetime: f32,
}

fn empty_fragment() -> Fragment {
    Fragment {
        active: false,
        position: Vec3::ZERO,
        velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        material: 0,
        lifetime: 0.0,
    }
}

pub struct ProxyPhysicsState {
    pub proxies: Vec<Proxy>,
    pub fragments: Vec<Fragment>,
    pub gravity: Vec3,
    pub damping: f32,
    pub bounds: Bounds3D,
    uniform_grid: UniformGrid,
}

pub fn state_init(bounds: Bounds3D, gravity: Vec3, max_fragments: usize) -> ProxyPhysicsState {
    let mut proxies = Vec::with_capacity(MAX_PROXIES);
    for _ in 0..MAX_PROXIES {
        proxies.push(empty_proxy());
    }
    let mut fragments = Vec::with_capacity(max_fragments);
    for _ in 0..max_fragments {
        fragments.push(empty_fragment());
    }
    ProxyPhysicsState {
        proxies,
        fragments,
        gravity,
        damping: 0.98,
        bounds,
        uniform_grid: broadphase::create_uniform_grid(bounds.min, 4.0),
    }
}

pub fn proxy_alloc(state: &mut ProxyPhysicsState, shape: ProxyShape, position: Vec3, mass: f32, flags: ProxyFlags, user_id: u32) -> Option<usize> {
    let slot = state.proxies.iter().position(|p| !p.active)?;
    let proxy = &mut state.proxies[slot];
    *proxy = empty_proxy();
    proxy.active = true;
    proxy.shape = shape;
    proxy.position = position;
    proxy.mass = mass;
    proxy.inv_mass = if mass > 0.0 { 1.0 / mass } else { 0.0 };
    proxy.flags = flags;
    proxy.user_id = user_id;
    Some(slot)
}

pub fn proxy_get(state: &ProxyPhysicsState, index: usize) -> Option<&Proxy> {
    state.proxies.get(index).filter(|p| p.active)
}

pub fn proxy_free(state: &mut ProxyPhysicsState, index: usize) {
    if let Some(p) = state.proxies.get_mut(index) {
        *p = empty_proxy();
    }
}

pub fn fragment_spawn(state: &mut ProxyPhysicsState, position: Vec3, velocity: Vec3, material: u8) -> Option<usize> {
    let slot = state.fragments.iter().position(|f| !f.active)?;
    let fragment = &mut state.fragments[slot];
    *fragment = empty_fragment();
    fragment.active = true;
    fragment.position = position;
    fragment.velocity = velocity;
    fragment.angular_velocity = Vec3::new(velocity.z, 0.0, -velocity.x) * 2.0;
    fragment.material = material;
    Some(slot)
}

pub fn fragment_get(state: &ProxyPhysicsState, index: usize) -> Option<&Fragment> {
    state.fragments.get(index).filter(|f| f.active)
}

pub fn fragment_free(state: &mut ProxyPhysicsState, index: usize) {
    if let Some(f) = state.fragments.get_mut(index) {
        *f = empty_fragment();
    }
}

/// Advance every active proxy and fragment by `dt`: gravity, voxel contact,
/// proxy-proxy pair resolution, floor fallback, and fragment expiry (§4.8).
pub fn step(state: &mut ProxyPhysicsState, dt: f32, terrain: Option<&Volume>, rng: &mut Rng) {
    let _ = rng; // reserved for future jittered fragment spawns; kept for API symmetry with body::update.

    for i in 0..state.proxies.len() {
        if !state.proxies[i].active || state.proxies[i].flags.is_static {
            continue;
        }
        integrate_proxy(state, i, dt, terrain);
    }

    resolve_proxy_pairs(state);

    for fragment in &mut state.fragments {
        if !fragment.active {
            continue;
        }
        fragment.velocity += state.gravity * FRAGMENT_GRAVITY_SCALE * dt;
        fragment.position += fragment.velocity * dt;
        fragment.lifetime += dt;

        if fragment.position.y <= state.bounds.min.y {
            fragment.position.y = state.bounds.min.y;
            if fragment.velocity.y < 0.0 {
                fragment.velocity.y = -fragment.velocity.y * FRAGMENT_RESTITUTION;
            }
            fragment.velocity.x *= FRAGMENT_FLOOR_FRICTION;
            fragment.velocity.z *= FRAGMENT_FLOOR_FRICTION;
            fragment.angular_velocity *= FRAGMENT_FLOOR_FRICTION;

            // Near-rest and near-floor: snap to rest rather than settle forever.
            if fragment.velocity.length() < FRAGMENT_REST_VELOCITY {
                fragment.velocity = Vec3::ZERO;
                fragment.angular_velocity = Vec3::ZERO;
            }
        }

        if fragment.lifetime > FRAGMENT_MAX_LIFETIME {
            fragment.active = false;
        }
    }
}

fn integrate_proxy(state: &mut ProxyPhysicsState, i: usize, dt: f32, terrain: Option<&Volume>) {
    let gravity = state.gravity;
    let damping = state.damping;
    let floor_y = state.bounds.min.y;

    let proxy = &mut state.proxies[i];
    if proxy.flags.affected_by_gravity {
        proxy.velocity += gravity * dt;
    }
    proxy.velocity *= damping;

    let radius = proxy.shape.bounding_radius();
    let speed = proxy.velocity.length();
    let max_speed = (radius.max(0.01) * TUNNELING_SPEED_FACTOR) / dt.max(1e-4);
    if speed > max_speed {
        proxy.velocity *= max_speed / speed;
    }

    proxy.position += proxy.velocity * dt;
    proxy.grounded = false;

    if proxy.position.y - radius < floor_y {
        proxy.position.y = floor_y + radius;
        if proxy.velocity.y < 0.0 {
            proxy.velocity.y = -proxy.velocity.y * proxy.restitution;
        }
        proxy.velocity.x *= 1.0 - proxy.friction;
        proxy.velocity.z *= 1.0 - proxy.friction;
        proxy.grounded = true;
    }

    if proxy.flags.collides_with_voxels {
        if let Some(vol) = terrain {
            resolve_voxel_contact(proxy, vol);
        }
    }
}

fn resolve_voxel_contact(proxy: &mut Proxy, terrain: &Volume) {
    let radius = match proxy.shape {
        ProxyShape::Sphere { radius } => radius,
        ProxyShape::Aabb { half_extents } => half_extents.length(),
        ProxyShape::Capsule { radius, .. } => radius,
    };

    let result = contact::contact_sphere(terrain, proxy.position, radius);
    if !result.any_contact {
        return;
    }

    let push = contact::contact_resolve(&result);
    proxy.position += push;

    let normal = result.average_normal;
    let normal_vel = proxy.velocity.dot(normal);
    if normal_vel < 0.0 {
        proxy.velocity -= normal * (normal_vel * (1.0 + proxy.restitution));
    }
    if normal.y > 0.5 {
        proxy.grounded = true;
    }
}

fn resolve_proxy_pairs(state: &mut ProxyPhysicsState) {
    let active: Vec<(i32, Vec3, f32)> = state
        .proxies
        .iter()
        .enumerate()
        .filter(|(_, p)| p.active && p.flags.collides_with_proxies)
        .map(|(i, p)| (i as i32, p.position, p.shape.bounding_radius()))
        .collect();

    if active.len() < 2 {
        return;
    }

    let pairs: Vec<(i32, i32)> = if active.len() <= BROADPHASE_THRESHOLD {
        let mut pairs = Vec::new();
        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                pairs.push((active[i].0, active[j].0));
            }
        }
        pairs
    } else {
        let positions: Vec<(i32, Vec3)> = active.iter().map(|&(idx, pos, _)| (idx, pos)).collect();
        let max_radius = active.iter().map(|&(_, _, r)| r).fold(0.0f32, f32::max);
        broadphase::uniform_grid_find_pairs(&mut state.uniform_grid, &positions, max_radius * 2.0)
    };

    for (a, b) in pairs {
        resolve_proxy_pair(state, a as usize, b as usize);
    }
}

fn resolve_proxy_pair(state: &mut ProxyPhysicsState, a: usize, b: usize) {
    let (pos_a, pos_b, r_a, r_b, inv_mass_a, inv_mass_b, vel_a, vel_b, restitution) = {
        let pa = &state.proxies[a];
        let pb = &state.proxies[b];
        (
            pa.position,
            pb.position,
            pa.shape.bounding_radius(),
            pb.shape.bounding_radius(),
            pa.inv_mass,
            pb.inv_mass,
            pa.velocity,
            pb.velocity,
            (pa.restitution + pb.restitution) * 0.5,
        )
    };

    let delta = pos_b - pos_a;
    let dist = delta.length();
    let overlap = r_a + r_b - dist;
    if overlap <= 0.0 || dist < 1e-6 {
        return;
    }

    let normal = delta / dist;
    let total_inv_mass = inv_mass_a + inv_mass_b;
    if total_inv_mass <= 0.0 {
        return;
    }

    let correction = normal * (overlap / total_inv_mass);
    state.proxies[a].position -= correction * inv_mass_a;
    state.proxies[b].position += correction * inv_mass_b;

    let closing_speed = (vel_b - vel_a).dot(normal);
    if closing_speed < 0.0 {
        let impulse_mag = -(1.0 + restitution) * closing_speed / total_inv_mass;
        let impulse = normal * impulse_mag;
        state.proxies[a].velocity -= impulse * inv_mass_a;
        state.proxies[b].velocity += impulse * inv_mass_b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bounds() -> Bounds3D {
        Bounds3D { min: Vec3::ZERO, max: Vec3::splat(100.0) }
    }

    fn dynamic_flags() -> ProxyFlags {
        ProxyFlags { is_static: false, affected_by_gravity: true, collides_with_voxels: true, collides_with_proxies: true }
    }

    #[test]
    fn proxy_alloc_and_free_round_trip() {
        let mut state = state_init(test_bounds(), Vec3::new(0.0, -9.8, 0.0), 16);
        let idx = proxy_alloc(&mut state, ProxyShape::Sphere { radius: 0.5 }, Vec3::splat(10.0), 1.0, dynamic_flags(), 42).unwrap();
        assert!(proxy_get(&state, idx).is_some());
        proxy_free(&mut state, idx);
        assert!(proxy_get(&state, idx).is_none());
    }

    #[test]
    fn gravity_pulls_proxy_downward() {
        let mut state = state_init(test_bounds(), Vec3::new(0.0, -9.8, 0.0), 16);
        let idx = proxy_alloc(&mut state, ProxyShape::Sphere { radius: 0.5 }, Vec3::new(50.0, 50.0, 50.0), 1.0, dynamic_flags(), 1).unwrap();
        let mut rng = Rng::new(1);
        step(&mut state, 0.1, None, &mut rng);
        assert!(state.proxies[idx].velocity.y < 0.0);
    }

    #[test]
    fn proxy_rests_on_floor() {
        let mut state = state_init(test_bounds(), Vec3::new(0.0, -9.8, 0.0), 16);
        let idx = proxy_alloc(&mut state, ProxyShape::Sphere { radius: 0.5 }, Vec3::new(50.0, 1.0, 50.0), 1.0, dynamic_flags(), 1).unwrap();
        let mut rng = Rng::new(1);
        for _ in 0..120 {
            step(&mut state, 1.0 / 60.0, None, &mut rng);
        }
        assert!(state.proxies[idx].position.y >= 0.49);
        assert!(state.proxies[idx].grounded);
    }

    #[test]
    fn fragment_expires_after_lifetime() {
        let mut state = state_init(test_bounds(), Vec3::ZERO, 4);
        let idx = fragment_spawn(&mut state, Vec3::splat(50.0), Vec3::ZERO, 1).unwrap();
        let mut rng = Rng::new(1);
        for _ in 0..((FRAGMENT_MAX_LIFETIME / (1.0 / 30.0)) as u32 + 2) {
            step(&mut state, 1.0 / 30.0, None, &mut rng);
        }
        assert!(fragment_get(&state, idx).is_none());
    }

    #[test]
    fn overlapping_proxies_separate() {
        let mut state = state_init(test_bounds(), Vec3::ZERO, 4);
        let a = proxy_alloc(&mut state, ProxyShape::Sphere { radius: 1.0 }, Vec3::new(50.0, 50.0, 50.0), 1.0, dynamic_flags(), 1).unwrap();
        let b = proxy_alloc(&mut state, ProxyShape::Sphere { radius: 1.0 }, Vec3::new(50.5, 50.0, 50.0), 1.0, dynamic_flags(), 2).unwrap();
        let mut rng = Rng::new(1);
        step(&mut state, 1.0 / 60.0, None, &mut rng);
        let dist = (state.proxies[a].position - state.proxies[b].position).length();
        assert!(dist > 0.5);
    }
}
