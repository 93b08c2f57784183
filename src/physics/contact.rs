//! VolumeContact: collision queries between geometric primitives and a voxel
//! [`Volume`](crate::voxel::volume::Volume).
//!
//! Same data/operation split as [`crate::physics::aabb`]: contacts are plain
//! data, every query is a free function over `&Volume`.

use glam::Vec3;

use crate::constants::contact::MAX_VOXELS;
use crate::voxel::volume::{self, Volume};

/// A single voxel's intersection with a queried primitive.
#[derive(Debug, Clone, Copy)]
pub struct VoxelContact {
    pub voxel_center: Vec3,
    pub penetration: Vec3,
    pub depth: f32,
    pub material: u8,
}

/// Up to [`MAX_VOXELS`] contacts collected by one query, plus a pre-averaged
/// push-out direction so callers that only need "am I stuck, which way is
/// out" don't have to walk `contacts` themselves.
#[derive(Debug, Clone, Default)]
pub struct ContactResult {
    pub contacts: Vec<VoxelContact>,
    pub average_normal: Vec3,
    pub max_depth: f32,
    pub any_contact: bool,
}

fn push_contact(result: &mut ContactResult, normal_sum: &mut Vec3, contact: VoxelContact) -> bool {
    if result.contacts.len() >= MAX_VOXELS {
        return false;
    }
    *normal_sum += contact.penetration.normalize_or_zero();
    if contact.depth > result.max_depth {
        result.max_depth = contact.depth;
    }
    result.contacts.push(contact);
    true
}

fn finalize(result: &mut ContactResult, normal_sum: Vec3) {
    result.any_contact = !result.contacts.is_empty();
    if result.any_contact {
        result.average_normal = normal_sum.normalize_or_zero();
    }
}

/// True iff `point` lands inside any solid voxel.
pub fn contact_point(vol: &Volume, point: Vec3) -> bool {
    volume::is_solid_at(vol, point)
}

/// Sphere vs volume: closest-point-on-voxel-box test against every voxel in
/// range. When the sphere center lies inside a voxel (closest point == the
/// center itself) pushes out along whichever axis is most penetrated instead
/// of dividing by a near-zero distance.
pub fn contact_sphere(vol: &Volume, center: Vec3, radius: f32) -> ContactResult {
    let mut result = ContactResult::default();
    let mut normal_sum = Vec3::ZERO;

    let vs = vol.voxel_size;
    let half_vs = vs * 0.5;
    let range = (radius / vs).ceil() as i32 + 1;

    'outer: for dz in -range..=range {
        for dy in -range..=range {
            for dx in -range..=range {
                let check_pos = center + Vec3::new(dx as f32, dy as f32, dz as f32) * vs;
                let mat = volume::get_at(vol, check_pos);
                if mat == 0 {
                    continue;
                }

                let voxel_center = voxel_center_of(vol, check_pos);
                let closest = closest_point_on_voxel(voxel_center, half_vs, center);
                let diff = center - closest;
                let dist_sq = diff.length_squared();

                if dist_sq >= radius * radius {
                    continue;
                }

                let dist = dist_sq.sqrt();
                let (normal, depth) = if dist > 0.0001 {
                    (diff / dist, radius - dist)
                } else {
                    (push_axis(center - voxel_center), half_vs + radius)
                };

                let contact = VoxelContact {
                    voxel_center,
                    penetration: normal * depth,
                    depth,
                    material: mat,
                };
                if !push_contact(&mut result, &mut normal_sum, contact) {
                    break 'outer;
                }
            }
        }
    }

    finalize(&mut result, normal_sum);
    result
}

/// AABB vs volume: standard AABB-vs-AABB overlap test against every voxel in
/// the queried box's range, resolving along the minimum-overlap axis per voxel.
pub fn contact_aabb(vol: &Volume, min_corner: Vec3, max_corner: Vec3) -> ContactResult {
    let mut result = ContactResult::default();
    let mut normal_sum = Vec3::ZERO;

    let vs = vol.voxel_size;
    let half_vs = vs * 0.5;
    let aabb_center = (min_corner + max_corner) * 0.5;
    let aabb_half = (max_corner - min_corner) * 0.5;

    let (sx, ex, sy, ey, sz, ez) = voxel_range(vol, min_corner, max_corner);

    'outer: for vz in sz..=ez {
        for vy in sy..=ey {
            for vx in sx..=ex {
                let check_pos = vol.bounds.min + (Vec3::new(vx as f32, vy as f32, vz as f32) + Vec3::splat(0.5)) * vs;
                let mat = volume::get_at(vol, check_pos);
                if mat == 0 {
                    continue;
                }

                let voxel_center = voxel_center_of(vol, check_pos);
                let ox = (aabb_half.x + half_vs) - (aabb_center.x - voxel_center.x).abs();
                let oy = (aabb_half.y + half_vs) - (aabb_center.y - voxel_center.y).abs();
                let oz = (aabb_half.z + half_vs) - (aabb_center.z - voxel_center.z).abs();

                if ox <= 0.0 || oy <= 0.0 || oz <= 0.0 {
                    continue;
                }

                let (normal, depth) = if ox <= oy && ox <= oz {
                    (Vec3::new(sign(aabb_center.x - voxel_center.x), 0.0, 0.0), ox)
                } else if oy <= oz {
                    (Vec3::new(0.0, sign(aabb_center.y - voxel_center.y), 0.0), oy)
                } else {
                    (Vec3::new(0.0, 0.0, sign(aabb_center.z - voxel_center.z)), oz)
                };

                let contact = VoxelContact {
                    voxel_center,
                    penetration: normal * depth,
                    depth,
                    material: mat,
                };
                if !push_contact(&mut result, &mut normal_sum, contact) {
                    break 'outer;
                }
            }
        }
    }

    finalize(&mut result, normal_sum);
    result
}

/// Capsule (two end points + radius) vs volume: per-voxel closest-point on
/// the capsule's spine segment, then closest-point-on-voxel-box as in
/// [`contact_sphere`].
pub fn contact_capsule(vol: &Volume, p0: Vec3, p1: Vec3, radius: f32) -> ContactResult {
    let mut result = ContactResult::default();
    let mut normal_sum = Vec3::ZERO;

    let vs = vol.voxel_size;
    let half_vs = vs * 0.5;

    let seg = p1 - p0;
    let seg_len = seg.length();
    let seg_dir = if seg_len > 0.0001 { seg / seg_len } else { Vec3::Y };

    let min_corner = p0.min(p1) - Vec3::splat(radius);
    let max_corner = p0.max(p1) + Vec3::splat(radius);
    let (sx, ex, sy, ey, sz, ez) = voxel_range(vol, min_corner, max_corner);

    'outer: for vz in sz..=ez {
        for vy in sy..=ey {
            for vx in sx..=ex {
                let check_pos = vol.bounds.min + (Vec3::new(vx as f32, vy as f32, vz as f32) + Vec3::splat(0.5)) * vs;
                let mat = volume::get_at(vol, check_pos);
                if mat == 0 {
                    continue;
                }

                let voxel_center = voxel_center_of(vol, check_pos);

                let to_voxel = voxel_center - p0;
                let t = to_voxel.dot(seg_dir).clamp(0.0, seg_len);
                let closest_on_seg = p0 + seg_dir * t;

                let closest_on_voxel = closest_point_on_voxel(voxel_center, half_vs, closest_on_seg);
                let diff = closest_on_seg - closest_on_voxel;
                let dist_sq = diff.length_squared();

                if dist_sq >= radius * radius {
                    continue;
                }

                let dist = dist_sq.sqrt();
                let (normal, depth) = if dist > 0.0001 {
                    (diff / dist, radius - dist)
                } else {
                    (Vec3::Y, half_vs + radius)
                };

                let contact = VoxelContact {
                    voxel_center,
                    penetration: normal * depth,
                    depth,
                    material: mat,
                };
                if !push_contact(&mut result, &mut normal_sum, contact) {
                    break 'outer;
                }
            }
        }
    }

    finalize(&mut result, normal_sum);
    result
}

/// First voxel hit along a bounded segment, cheaper than a full raycast
/// since it need not search past `end`.
pub fn contact_segment(vol: &Volume, start: Vec3, end: Vec3) -> Option<(Vec3, Vec3, u8)> {
    let dir = end - start;
    let max_dist = dir.length();
    if max_dist < 0.0001 {
        return None;
    }
    let dir = dir / max_dist;
    volume::raycast(vol, start, dir, max_dist).map(|(_, pos, normal, mat)| (pos, normal, mat))
}

/// Minimum-translation push-out vector for a contact result: penetration
/// vectors weighted by depth, then rescaled so the result's length equals
/// the single deepest contact's depth.
pub fn contact_resolve(result: &ContactResult) -> Vec3 {
    if result.contacts.is_empty() {
        return Vec3::ZERO;
    }

    let mut push = Vec3::ZERO;
    let mut total_depth = 0.0f32;
    for c in &result.contacts {
        push += c.penetration * c.depth;
        total_depth += c.depth;
    }

    if total_depth > 0.0001 {
        push /= total_depth;
        let push_len = push.length();
        if push_len > 0.0001 {
            push *= result.max_depth / push_len;
        }
    }

    push
}

/// Step a sphere along `direction` up to `distance`, stopping at the first
/// voxel contact. Returns the fraction of `distance` actually travelled.
pub fn sweep_sphere(vol: &Volume, start: Vec3, direction: Vec3, distance: f32, radius: f32) -> (f32, Option<(Vec3, Vec3)>) {
    if distance < 0.0001 {
        return (1.0, None);
    }

    let step = vol.voxel_size * 0.5;
    let steps = (distance / step).ceil() as i32;

    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let pos = start + direction * (t * distance);
        let contacts = contact_sphere(vol, pos, radius);
        if contacts.any_contact {
            return (t, Some((pos, contacts.average_normal)));
        }
    }

    (1.0, None)
}

/// Step an AABB (given by half extents) along `direction`, stopping at the
/// first voxel contact. Returns the fraction of `distance` actually travelled.
pub fn sweep_aabb(
    vol: &Volume,
    start: Vec3,
    half_extents: Vec3,
    direction: Vec3,
    distance: f32,
) -> (f32, Option<(Vec3, Vec3)>) {
    if distance < 0.0001 {
        return (1.0, None);
    }

    let step = vol.voxel_size * 0.5;
    let steps = (distance / step).ceil() as i32;

    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let pos = start + direction * (t * distance);
        let contacts = contact_aabb(vol, pos - half_extents, pos + half_extents);
        if contacts.any_contact {
            return (t, Some((pos, contacts.average_normal)));
        }
    }

    (1.0, None)
}

fn voxel_center_of(vol: &Volume, world_pos: Vec3) -> Vec3 {
    let (cx, cy, cz, lx, ly, lz) = volume::world_to_local(vol, world_pos);
    volume::voxel_to_world(vol, cx, cy, cz, lx, ly, lz)
}

fn closest_point_on_voxel(voxel_center: Vec3, half_vs: f32, point: Vec3) -> Vec3 {
    point.clamp(voxel_center - Vec3::splat(half_vs), voxel_center + Vec3::splat(half_vs))
}

fn push_axis(to_center: Vec3) -> Vec3 {
    let (ax, ay, az) = (to_center.x.abs(), to_center.y.abs(), to_center.z.abs());
    if ay >= ax && ay >= az {
        Vec3::new(0.0, sign(to_center.y), 0.0)
    } else if ax >= az {
        Vec3::new(sign(to_center.x), 0.0, 0.0)
    } else {
        Vec3::new(0.0, 0.0, sign(to_center.z))
    }
}

fn sign(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

fn voxel_range(vol: &Volume, min_corner: Vec3, max_corner: Vec3) -> (i32, i32, i32, i32, i32, i32) {
    let vs = vol.voxel_size;
    let sx = ((min_corner.x - vol.bounds.min.x) / vs).floor() as i32 - 1;
    let ex = ((max_corner.x - vol.bounds.min.x) / vs).ceil() as i32 + 1;
    let sy = ((min_corner.y - vol.bounds.min.y) / vs).floor() as i32 - 1;
    let ey = ((max_corner.y - vol.bounds.min.y) / vs).ceil() as i32 + 1;
    let sz = ((min_corner.z - vol.bounds.min.z) / vs).floor() as i32 - 1;
    let ez = ((max_corner.z - vol.bounds.min.z) / vs).ceil() as i32 + 1;
    (sx, ex, sy, ey, sz, ez)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_volume() -> Volume {
        let mut vol = volume::create_dims(2, 2, 2, Vec3::ZERO, 1.0);
        volume::fill_box(&mut vol, Vec3::ZERO, Vec3::new(64.0, 1.0, 64.0), 1);
        vol
    }

    #[test]
    fn point_on_floor_reports_contact() {
        let vol = test_volume();
        assert!(contact_point(&vol, Vec3::new(5.5, 0.5, 5.5)));
    }

    #[test]
    fn sphere_resting_on_floor_has_contacts() {
        let vol = test_volume();
        let result = contact_sphere(&vol, Vec3::new(5.0, 1.3, 5.0), 1.0);
        assert!(result.any_contact);
        assert!(result.average_normal.y > 0.0);
    }

    #[test]
    fn sphere_far_above_floor_has_no_contacts() {
        let vol = test_volume();
        let result = contact_sphere(&vol, Vec3::new(5.0, 50.0, 5.0), 1.0);
        assert!(!result.any_contact);
    }

    #[test]
    fn aabb_overlapping_floor_resolves_upward() {
        let vol = test_volume();
        let result = contact_aabb(&vol, Vec3::new(4.0, 0.5, 4.0), Vec3::new(6.0, 1.5, 6.0));
        assert!(result.any_contact);
        let push = contact_resolve(&result);
        assert!(push.y > 0.0);
    }

    #[test]
    fn capsule_touching_floor_reports_contact() {
        let vol = test_volume();
        let result = contact_capsule(&vol, Vec3::new(5.0, 1.3, 5.0), Vec3::new(5.0, 3.0, 5.0), 0.8);
        assert!(result.any_contact);
    }

    #[test]
    fn sweep_sphere_stops_at_floor() {
        let vol = test_volume();
        let (t, hit) = sweep_sphere(&vol, Vec3::new(5.0, 10.0, 5.0), Vec3::new(0.0, -1.0, 0.0), 20.0, 1.0);
        assert!(t < 1.0);
        assert!(hit.is_some());
    }
}
